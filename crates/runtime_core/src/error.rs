use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigValue;
use crate::request::TaskId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("expected KEY=VALUE, got '{0}'")]
    Assignment(String),

    #[error("option {0} is missing")]
    Missing(String),

    #[error("option {key} must be {expected}, got {found}")]
    Invalid {
        key: String,
        expected: &'static str,
        found: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, expected: &'static str, found: &ConfigValue) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            expected,
            found: format!("{} {}", found.kind(), found),
        }
    }
}

/// Errors surfaced to callers of `init` and of the run methods.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No worker answered within the task's window. The task may still run.
    #[error("task {id} timed out after {}ms", after.as_millis())]
    Timeout { id: TaskId, after: Duration },

    #[error("fetching {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("installation failed: {0}")]
    Installation(String),

    #[error("runtime is not initialized; call init() and wait for it to finish first")]
    NotInitialized,

    #[error("runtime is already initialized")]
    AlreadyInitialized,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("engine failed to start: {0}")]
    Engine(String),

    #[error("coordinator has shut down")]
    Shutdown,

    #[error("worker {0} exited unexpectedly")]
    WorkerLost(usize),
}

impl RuntimeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RuntimeError::Timeout { .. })
    }
}
