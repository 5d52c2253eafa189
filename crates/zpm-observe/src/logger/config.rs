use std::io::IsTerminal;

use serde::{Deserialize, Serialize};

use crate::logger::format::LoggerFormat;

/// Logger settings, usually read from the `logger` section of a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// An `EnvFilter` directive such as `info` or `zpm.core=debug,warn`.
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color: std::io::stdout().is_terminal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: LoggerConfig = serde_json::from_str(r#"{"format": "json", "use_color": false}"#).unwrap();
        assert_eq!(cfg.format, LoggerFormat::Json);
        assert_eq!(cfg.level, "info");
        assert!(cfg.with_targets);
        assert!(!cfg.use_color);
    }

    #[test]
    fn bad_format_fails_to_decode() {
        assert!(serde_json::from_str::<LoggerConfig>(r#"{"format": "yaml"}"#).is_err());
    }
}
