use serde_json::{Map, Value};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading component configuration. A failure during a
/// sink's initialization is fatal for that sink only; the process keeps the
/// components that configured successfully.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration root must be a JSON object")]
    NotAnObject,
    #[error("missing required key '{0}'")]
    MissingKey(String),
    #[error("key '{key}' has wrong type (expected {expected})")]
    WrongType { key: String, expected: &'static str },
    #[error("key '{key}' is invalid: {reason}")]
    Invalid { key: String, reason: String },
}

/// Read-only view over one component's configuration section. Loading and
/// parsing of the file itself happens in the bootstrap layer; components
/// only see a key/value map.
#[derive(Debug, Clone, Default)]
pub struct ConfigView {
    values: Map<String, Value>,
}

impl ConfigView {
    pub fn new(root: Value) -> Result<Self, ConfigError> {
        match root {
            Value::Object(values) => Ok(Self { values }),
            _ => Err(ConfigError::NotAnObject),
        }
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Nested section, e.g. the per-sink object under the root.
    pub fn section(&self, key: &str) -> Result<Option<ConfigView>, ConfigError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(ConfigView::from_map(map.clone()))),
            Some(_) => Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "object",
            }),
        }
    }

    pub fn required_str(&self, key: &str) -> Result<String, ConfigError> {
        self.opt_str(key)?
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    pub fn opt_str(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.clone())),
            Some(_) => Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    pub fn required_path(&self, key: &str) -> Result<PathBuf, ConfigError> {
        Ok(PathBuf::from(self.required_str(key)?))
    }

    pub fn opt_path(&self, key: &str) -> Result<Option<PathBuf>, ConfigError> {
        Ok(self.opt_str(key)?.map(PathBuf::from))
    }

    pub fn opt_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(num)) => num.as_u64().map(Some).ok_or(ConfigError::WrongType {
                key: key.to_string(),
                expected: "unsigned integer",
            }),
            Some(_) => Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "unsigned integer",
            }),
        }
    }

    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        Ok(self.opt_u64(key)?.unwrap_or(default))
    }

    /// Positive integer knob; zero is rejected because every current caller
    /// treats zero as a misconfiguration (intervals, batch limits).
    pub fn positive_u64_or(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        let value = self.u64_or(key, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(_) => Err(ConfigError::WrongType {
                key: key.to_string(),
                expected: "boolean",
            }),
        }
    }
}
