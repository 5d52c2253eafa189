use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification level of a single message.
///
/// Processes select a level per line with the `N::text` convention; lines without
/// a prefix take the level of the stream they were read from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Level(pub u16);

impl Level {
    pub const NONE: Level = Level(0);
    pub const STDOUT: Level = Level(1);
    pub const STDERR: Level = Level(2);
    pub const PUBLIC: Level = Level(3);
    pub const OPERATOR: Level = Level(4);
    pub const UNKNOWN: Level = Level(5);
    pub const WARNING: Level = Level(6);
    pub const OPS_ERROR: Level = Level(7);
    pub const CRITICAL: Level = Level(8);
    pub const STATSD: Level = Level(9);
    pub const DEBUG: Level = Level(10);

    pub const RESULT_JSON: Level = Level(20);
    pub const RESULT_YAML: Level = Level(21);
    pub const RESULT_TOML: Level = Level(22);
    pub const RESULT_HRD: Level = Level(23);
    pub const RESULT_JOB: Level = Level(24);
    pub const RESULT_HEX: Level = Level(25);
    pub const RESULT_ERROR: Level = Level(26);

    /// Everything at or above this level is consumed by the process itself
    /// and never reaches the manager.
    pub const INTERNAL: Level = Level(100);
    /// "Track this descendant PID": the payload is a decimal PID.
    pub const INTERNAL_MONITOR_PID: Level = Level(101);

    /// Levels that carry a structured job result.
    pub const RESULT_LEVELS: [Level; 7] = [
        Level::RESULT_JSON,
        Level::RESULT_YAML,
        Level::RESULT_TOML,
        Level::RESULT_HRD,
        Level::RESULT_JOB,
        Level::RESULT_HEX,
        Level::RESULT_ERROR,
    ];

    #[inline]
    pub fn is_result(self) -> bool {
        Self::RESULT_LEVELS.contains(&self)
    }

    #[inline]
    pub fn is_internal(self) -> bool {
        self >= Self::INTERNAL
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for Level {
    fn from(v: u16) -> Self {
        Level(v)
    }
}

/// Level plus flag bits of a message.
///
/// The low 16 bits hold the [`Level`]; the upper bits hold flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Meta(u32);

impl Meta {
    /// The process exited with status zero (always the last message).
    pub const EXIT_SUCCESS: u32 = 1 << 16;
    /// The process exited with a failure (always the last message).
    pub const EXIT_ERROR: u32 = 1 << 17;
    /// The message must be streamed live to interested consumers.
    pub const STREAM: u32 = 1 << 18;

    const LEVEL_MASK: u32 = 0xffff;

    pub fn new(level: Level, flags: u32) -> Self {
        Meta(u32::from(level.0) | (flags & !Self::LEVEL_MASK))
    }

    #[inline]
    pub fn level(self) -> Level {
        Level((self.0 & Self::LEVEL_MASK) as u16)
    }

    /// Returns `true` if any of the given flag bits are set.
    #[inline]
    pub fn is(self, flags: u32) -> bool {
        self.0 & flags & !Self::LEVEL_MASK != 0
    }

    /// Returns `true` if the level is one of `levels`.
    #[inline]
    pub fn assert(self, levels: &[Level]) -> bool {
        levels.contains(&self.level())
    }

    #[inline]
    pub fn set(&mut self, flags: u32) {
        self.0 |= flags & !Self::LEVEL_MASK;
    }

    #[inline]
    pub fn is_exit(self) -> bool {
        self.is(Self::EXIT_SUCCESS | Self::EXIT_ERROR)
    }

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl From<Level> for Meta {
    fn from(level: Level) -> Self {
        Meta::new(level, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_and_flags_are_independent() {
        let mut meta = Meta::new(Level::RESULT_JSON, Meta::EXIT_SUCCESS);
        assert_eq!(meta.level(), Level::RESULT_JSON);
        assert!(meta.is(Meta::EXIT_SUCCESS));
        assert!(!meta.is(Meta::EXIT_ERROR));
        assert!(meta.is_exit());

        meta.set(Meta::STREAM);
        assert!(meta.is(Meta::STREAM));
        assert_eq!(meta.level(), Level::RESULT_JSON);
    }

    #[test]
    fn flags_cannot_clobber_level() {
        let meta = Meta::new(Level::STDERR, 0xffff);
        assert_eq!(meta.level(), Level::STDERR);
        assert!(!meta.is_exit());
    }

    #[test]
    fn result_and_internal_ranges() {
        assert!(Level::RESULT_JSON.is_result());
        assert!(Level::RESULT_ERROR.is_result());
        assert!(!Level::STDOUT.is_result());
        assert!(Level::INTERNAL_MONITOR_PID.is_internal());
        assert!(!Level::CRITICAL.is_internal());
        assert!(Meta::from(Level::STDOUT).assert(&[Level::STDOUT, Level::STDERR]));
    }
}
