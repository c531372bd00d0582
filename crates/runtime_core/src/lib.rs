pub mod config;
pub mod env;
pub mod error;
pub mod php_pipeline;
pub mod request;

pub use config::{Config, ConfigValue, MAX_WORKERS, keys};
pub use error::{ConfigError, RuntimeError};
pub use php_pipeline::{build_execution_preamble, build_request_program};
pub use request::{RequestDescriptor, TaskId};
