//! POSIX rlimits for spawned children.
//!
//! Limits are applied inside a `pre_exec` hook, after `fork()` and right
//! before `execve()`, so the program never runs unrestricted. On non-Unix
//! targets a non-empty config is logged and ignored.
use std::process::Command;

use serde::{Deserialize, Serialize};

/// Optional `limits` block of a system process.
///
/// `None` leaves the inherited limit untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlimitConfig {
    /// `RLIMIT_NOFILE`.
    pub max_open_files: Option<u64>,
    /// `RLIMIT_FSIZE`; writing past it raises `SIGXFSZ`.
    pub max_file_size_bytes: Option<u64>,
    /// Sets `RLIMIT_CORE` to zero.
    pub disable_core_dumps: bool,
}

impl RlimitConfig {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max_open_files.is_none() && !self.disable_core_dumps && self.max_file_size_bytes.is_none()
    }
}

/// Installs a `pre_exec` hook applying `config` to the child of `cmd`.
pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
    if config.is_empty() {
        return;
    }

    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            unix_impl::attach_rlimits(cmd, config);
        } else {
            tracing::warn!(target: "zpm.exec.limits", ?config, "rlimits are not supported on this OS; ignoring");
        }
    }
}

#[cfg(unix)]
mod unix_impl {
    use super::RlimitConfig;

    use std::{io, os::unix::process::CommandExt, process::Command};

    pub fn attach_rlimits(cmd: &mut Command, config: &RlimitConfig) {
        let RlimitConfig {
            max_open_files,
            max_file_size_bytes,
            disable_core_dumps,
        } = config.clone();

        // SAFETY: the hook only calls setrlimit, which is async-signal-safe.
        unsafe {
            cmd.pre_exec(move || {
                if let Some(nofile) = max_open_files {
                    check(libc::setrlimit(libc::RLIMIT_NOFILE, &rlimit(nofile)))?;
                }
                if let Some(fsize) = max_file_size_bytes {
                    check(libc::setrlimit(libc::RLIMIT_FSIZE, &rlimit(fsize)))?;
                }
                if disable_core_dumps {
                    check(libc::setrlimit(libc::RLIMIT_CORE, &rlimit(0)))?;
                }
                Ok(())
            });
        }
    }

    fn rlimit(value: u64) -> libc::rlimit {
        libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        }
    }

    fn check(rc: libc::c_int) -> io::Result<()> {
        if rc != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_noop() {
        let config = RlimitConfig::default();
        assert!(config.is_empty());

        let mut cmd = Command::new("sh");
        attach_rlimits(&mut cmd, &config);
    }

    #[test]
    fn decodes_partial_limits() {
        let config: RlimitConfig = serde_json::from_str(r#"{"max_open_files": 64}"#).unwrap();
        assert_eq!(config.max_open_files, Some(64));
        assert_eq!(config.max_file_size_bytes, None);
        assert!(!config.disable_core_dumps);
        assert!(!config.is_empty());
    }
}
