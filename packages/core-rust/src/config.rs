//! Named configuration values and the layered settings source.
//!
//! Keys are hierarchical (`Section:Key`) and case-insensitive. `AppSettings`
//! loads a JSON settings file, flattens nested objects into `Section:Key`
//! names, and lets environment variables override individual entries.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde_json::Value as JsonValue;
use tracing::debug;

/// Names of every configuration key the service reads.
pub mod keys {
    /// Enables the mock license endpoint and its secondary port.
    pub const MOCK_LICENSE_ENABLED: &str = "MockLunitLicense";
    /// Simulated inference processing time, in whole seconds.
    pub const INFERENCE_DELAY_SECONDS: &str = "LunitAnalysisWaitime";

    pub const LICENSE_IS_USABLE: &str = "LicenseMock:is_usable";
    pub const LICENSE_IS_EXPIRED: &str = "LicenseMock:is_expired";
    pub const LICENSE_CURRENT_USAGE_COUNT: &str = "LicenseMock:current_usage_count";
    pub const LICENSE_LIMIT_USAGE_COUNT: &str = "LicenseMock:limit_usage_count";
    pub const LICENSE_EXPIRATION_DATE: &str = "LicenseMock:expiration_date";

    pub const LISTENER_HOST: &str = "Listener:Host";
    pub const LISTENER_PRIMARY_PORT: &str = "Listener:PrimaryPort";
    pub const LISTENER_LICENSE_PORT: &str = "Listener:LicensePort";
    pub const LISTENER_REQUEST_TIMEOUT_SECONDS: &str = "Listener:RequestTimeoutSeconds";
}

/// Errors raised while loading or reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration key '{key}' has value '{value}', expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("settings file {path} must contain a JSON object at the top level")]
    NotAnObject { path: String },
}

/// Supplies raw configuration values by name.
pub trait ConfigSource: Send + Sync {
    /// Returns the raw string value for `key`, or `None` when unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// Typed accessors with defaults, available on every `ConfigSource`.
pub trait ConfigSourceExt: ConfigSource {
    /// Reads a boolean (`true`/`false`, case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the key is set to anything else.
    fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(invalid(key, raw, "a boolean")),
            },
        }
    }

    /// Reads an unsigned integer.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the value does not parse.
    fn get_u64(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        self.get_parsed(key, default, "an unsigned integer")
    }

    /// Reads a TCP port number.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the value is not a valid port.
    fn get_port(&self, key: &str, default: u16) -> Result<u16, ConfigError> {
        self.get_parsed(key, default, "a port number (0-65535)")
    }

    /// Reads a string value, falling back to `default` when unset.
    fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Parses any `FromStr` value, naming `expected` in the error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the value does not parse.
    fn get_parsed<T: FromStr>(
        &self,
        key: &str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => {
                let parsed = raw.trim().parse();
                parsed.map_err(|_| invalid(key, raw, expected))
            }
        }
    }
}

impl<T: ConfigSource + ?Sized> ConfigSourceExt for T {}

fn invalid(key: &str, value: String, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value,
        expected,
    }
}

/// Layered, case-insensitive settings: JSON file first, environment last.
#[derive(Debug, Clone, Default)]
pub struct AppSettings {
    values: HashMap<String, String>,
}

impl AppSettings {
    /// Creates an empty settings source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds settings from explicit `(key, value)` pairs.
    #[must_use]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut settings = Self::new();
        for (key, value) in pairs {
            settings.set(key.as_ref(), value);
        }
        settings
    }

    /// Sets (or overrides) a single value.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(normalize(key), value.into());
    }

    /// Layers a JSON settings document over the current values.
    ///
    /// Nested objects become `Section:Key` names and array elements become
    /// `Section:0`, `Section:1`, ... `null` entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` or `ConfigError::NotAnObject` for an
    /// unusable document.
    pub fn merge_json_str(&mut self, origin: &str, json: &str) -> Result<(), ConfigError> {
        let root: JsonValue = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        if !root.is_object() {
            return Err(ConfigError::NotAnObject {
                path: origin.to_string(),
            });
        }
        flatten_into(&mut self.values, "", &root);
        Ok(())
    }

    /// Layers a JSON settings file. A missing file is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn merge_json_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let shown = path.display().to_string();
        match std::fs::read_to_string(path) {
            Ok(contents) => self.merge_json_str(&shown, &contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %shown, "settings file not found, skipping");
                Ok(())
            }
            Err(source) => Err(ConfigError::Io {
                path: shown,
                source,
            }),
        }
    }

    /// Layers environment-style variables whose name starts with `prefix`.
    ///
    /// The prefix is stripped and `__` becomes the `:` section separator,
    /// so `MOCK_ANALYSIS_LicenseMock__is_usable` sets `LicenseMock:is_usable`.
    pub fn merge_env_vars<K, V>(&mut self, prefix: &str, vars: impl IntoIterator<Item = (K, V)>)
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in vars {
            if let Some(stripped) = name.as_ref().strip_prefix(prefix) {
                if !stripped.is_empty() {
                    self.set(&stripped.replace("__", ":"), value);
                }
            }
        }
    }

    /// Layers the current process environment.
    pub fn merge_process_env(&mut self, prefix: &str) {
        self.merge_env_vars(prefix, std::env::vars());
    }

    /// Number of distinct keys currently set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ConfigSource for AppSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(&normalize(key)).cloned()
    }
}

fn normalize(key: &str) -> String {
    key.to_ascii_lowercase()
}

fn flatten_into(out: &mut HashMap<String, String>, prefix: &str, value: &JsonValue) {
    let child = |segment: &str| {
        if prefix.is_empty() {
            segment.to_string()
        } else {
            format!("{prefix}:{segment}")
        }
    };
    match value {
        JsonValue::Object(map) => {
            for (k, v) in map {
                flatten_into(out, &child(k), v);
            }
        }
        JsonValue::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(out, &child(&i.to_string()), v);
            }
        }
        JsonValue::Null => {}
        JsonValue::String(s) => {
            out.insert(normalize(prefix), s.clone());
        }
        JsonValue::Bool(_) | JsonValue::Number(_) => {
            out.insert(normalize(prefix), value.to_string());
        }
    }
}
