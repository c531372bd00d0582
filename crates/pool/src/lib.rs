//! Worker threads and the coordinator that feeds them.

pub mod coordinator;
pub mod message;
pub mod setup;
mod table;
pub mod worker;

pub use coordinator::Pool;
pub use message::{ERROR_MARKER, TaskPayload, WorkerCommand, WorkerEvent};
pub use setup::{install_once, prewarm};
pub use worker::{WorkerContext, WorkerThread, spawn_worker};
