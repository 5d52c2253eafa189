use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

/// Errors produced while decoding command arguments.
#[derive(Debug, Error)]
pub enum ArgumentsError {
    #[error("command has no arguments")]
    Missing,
    #[error("invalid arguments: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Opaque argument payload of a command.
///
/// The manager never looks inside; only the process variant selected for the
/// command decodes it into its own argument type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Arguments(Value);

impl Arguments {
    /// Wraps an already decoded JSON value.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Serializes any value into an argument payload.
    pub fn from_serialize<T: Serialize>(args: &T) -> Result<Self, ArgumentsError> {
        Ok(Self(serde_json::to_value(args)?))
    }

    /// Decodes the payload into the type the process variant expects.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ArgumentsError> {
        Ok(T::deserialize(&self.0)?)
    }

    /// Returns the raw JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Looks up a string field of an object payload.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

impl From<Value> for Arguments {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Echo {
        name: String,
        #[serde(default)]
        args: Vec<String>,
    }

    #[test]
    fn parse_into_typed_arguments() {
        let args = Arguments::new(serde_json::json!({"name": "echo", "args": ["hi"]}));
        let echo: Echo = args.parse().unwrap();
        assert_eq!(echo.name, "echo");
        assert_eq!(echo.args, vec!["hi".to_string()]);
        assert_eq!(args.get_str("name"), Some("echo"));
    }

    #[test]
    fn parse_reports_decode_errors() {
        let args = Arguments::new(serde_json::json!({"args": 1}));
        let res: Result<Echo, _> = args.parse();
        assert!(matches!(res, Err(ArgumentsError::Decode(_))));
    }
}
