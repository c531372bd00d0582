//! Caller-facing execution runtime.
//!
//! A [`Runtime`] owns one pool of engine workers. `init` resolves the engine
//! image, installs the application on a cold start and spawns the pool;
//! afterwards `run_inline` and `run_request` can be called from any task.

mod lifecycle;
pub mod maintenance;

pub use lifecycle::{InitReport, Runtime, RuntimeBuilder};

pub use engine::{EngineFactory, ProcessEngineFactory, StubEngineFactory};
pub use install::{Fetcher, HttpFetcher, InstallOptions, InstallOutcome, MemoryFetcher};
pub use runtime_core::{Config, ConfigValue, RequestDescriptor, RuntimeError};
pub use store::Store;
