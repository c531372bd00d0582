use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::env::is_truthy;
use crate::error::ConfigError;

/// Recognized option names. Anything else is carried through untouched.
pub mod keys {
    pub const DEBUG: &str = "DEBUG";
    pub const NUM_WORKERS: &str = "NUM_WORKERS";
    pub const TIMEOUT_WORKER: &str = "TIMEOUT_WORKER";
    pub const DOCUMENT_ROOT: &str = "DOCUMENT_ROOT";
    pub const ENTRY_POINT: &str = "ENTRY_POINT";
    pub const SERVER_ADDR: &str = "SERVER_ADDR";
    pub const SERVER_NAME: &str = "SERVER_NAME";
    pub const SERVER_SOFTWARE: &str = "SERVER_SOFTWARE";
    pub const SERVER_PORT: &str = "SERVER_PORT";

    pub const ALL: [&str; 9] = [
        DEBUG,
        NUM_WORKERS,
        TIMEOUT_WORKER,
        DOCUMENT_ROOT,
        ENTRY_POINT,
        SERVER_ADDR,
        SERVER_NAME,
        SERVER_SOFTWARE,
        SERVER_PORT,
    ];
}

/// Upper bound for `NUM_WORKERS`; each worker is an OS thread.
pub const MAX_WORKERS: usize = 256;

/// Prefix for environment overrides, e.g. `PHPBOX_NUM_WORKERS=4`.
pub const ENV_PREFIX: &str = "PHPBOX_";

/// A scalar option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ConfigValue {
    /// Infer a typed value from raw text (`true`/`false`, numbers, else string).
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            "true" => return ConfigValue::Bool(true),
            "false" => return ConfigValue::Bool(false),
            _ => {}
        }
        if let Ok(value) = trimmed.parse::<i64>() {
            return ConfigValue::Int(value);
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            if value.is_finite() {
                return ConfigValue::Float(value);
            }
        }
        ConfigValue::Str(raw.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "boolean",
            ConfigValue::Int(_) | ConfigValue::Float(_) => "number",
            ConfigValue::Str(_) => "string",
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(value) => write!(f, "{}", value),
            ConfigValue::Int(value) => write!(f, "{}", value),
            ConfigValue::Float(value) => write!(f, "{}", value),
            ConfigValue::Str(value) => f.write_str(value),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        ConfigValue::Float(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}

/// Named scalar options. Every value is also exposed to the engine as a
/// `$_SERVER` entry, so the map stays flat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    values: BTreeMap<String, ConfigValue>,
}

impl Config {
    /// Empty map, no defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defaults() -> Self {
        Self::new()
            .with(keys::DEBUG, false)
            .with(keys::NUM_WORKERS, 2i64)
            .with(keys::TIMEOUT_WORKER, 1000i64)
            .with(keys::DOCUMENT_ROOT, "/www")
            .with(keys::ENTRY_POINT, "")
            .with(keys::SERVER_ADDR, "127.0.0.1")
            .with(keys::SERVER_NAME, "browser-localhost")
            .with(keys::SERVER_SOFTWARE, "wasm-server-0.0.8")
            .with(keys::SERVER_PORT, "8080")
    }

    /// `defaults ⊕ overrides`, overrides win.
    pub fn with_defaults(overrides: &Config) -> Self {
        let mut config = Self::defaults();
        config.merge(overrides);
        config
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Copy every entry of `other` over this map.
    pub fn merge(&mut self, other: &Config) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse a flat TOML table of scalars.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Overrides for recognized keys taken from `PHPBOX_<KEY>` variables.
    pub fn from_env_with<F>(env_get: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new();
        for key in keys::ALL {
            if let Some(raw) = env_get(&format!("{}{}", ENV_PREFIX, key)) {
                let value = if key == keys::DEBUG {
                    ConfigValue::Bool(is_truthy(&raw))
                } else {
                    ConfigValue::parse(&raw)
                };
                config.set(key, value);
            }
        }
        config
    }

    pub fn from_env() -> Self {
        Self::from_env_with(&|key| std::env::var(key).ok())
    }

    /// Parse a `KEY=VALUE` assignment as given on the command line.
    pub fn parse_assignment(raw: &str) -> Result<(String, ConfigValue), ConfigError> {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| ConfigError::Assignment(raw.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::Assignment(raw.to_string()));
        }
        Ok((key.to_string(), ConfigValue::parse(value)))
    }

    pub fn debug(&self) -> bool {
        match self.get(keys::DEBUG) {
            Some(ConfigValue::Bool(value)) => *value,
            Some(ConfigValue::Int(value)) => *value != 0,
            Some(ConfigValue::Str(value)) => is_truthy(value),
            _ => false,
        }
    }

    pub fn num_workers(&self) -> Result<usize, ConfigError> {
        match self.get(keys::NUM_WORKERS) {
            Some(ConfigValue::Int(value)) if (1..=MAX_WORKERS as i64).contains(value) => {
                Ok(*value as usize)
            }
            Some(other) => Err(ConfigError::invalid(
                keys::NUM_WORKERS,
                "an integer between 1 and 256",
                other,
            )),
            None => Err(ConfigError::Missing(keys::NUM_WORKERS.to_string())),
        }
    }

    /// Per-task timeout (`TIMEOUT_WORKER`, milliseconds).
    pub fn task_timeout(&self) -> Result<Duration, ConfigError> {
        match self.get(keys::TIMEOUT_WORKER) {
            Some(ConfigValue::Int(value)) if *value >= 0 => Ok(Duration::from_millis(*value as u64)),
            Some(found @ ConfigValue::Float(value)) if *value >= 0.0 => {
                Duration::try_from_secs_f64(*value / 1000.0).map_err(|_| {
                    ConfigError::invalid(keys::TIMEOUT_WORKER, "a representable duration", found)
                })
            }
            Some(other) => Err(ConfigError::invalid(
                keys::TIMEOUT_WORKER,
                "a non-negative number of milliseconds",
                other,
            )),
            None => Err(ConfigError::Missing(keys::TIMEOUT_WORKER.to_string())),
        }
    }

    pub fn document_root(&self) -> String {
        self.string_or(keys::DOCUMENT_ROOT, "/www")
    }

    /// Configured front controller, `None` when unset or empty.
    pub fn entry_point(&self) -> Option<String> {
        let entry = self.string_or(keys::ENTRY_POINT, "");
        if entry.trim().is_empty() {
            None
        } else {
            Some(entry)
        }
    }

    fn string_or(&self, key: &str, fallback: &str) -> String {
        self.get(key)
            .map(|value| value.to_string())
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Check the recognized keys that the runtime itself interprets.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.num_workers()?;
        self.task_timeout()?;
        Ok(())
    }
}
