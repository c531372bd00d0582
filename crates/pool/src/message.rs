use std::sync::Arc;

use bytes::Bytes;
use install::{InstallError, InstallOutcome};
use runtime_core::{Config, RequestDescriptor, TaskId};

/// Prefix of every result produced by a failed run.
pub const ERROR_MARKER: &str = "PHP ERROR: ";

/// Coordinator → worker.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    /// Boot the engine. Answered with `Ready` once; later loads are ignored.
    Load { image: Bytes, config: Arc<Config> },
    RunInline { id: TaskId, code: String },
    RunRequest { id: TaskId, request: RequestDescriptor },
    /// Install the application tree through the loaded engine.
    Install,
    Shutdown,
}

/// Worker → coordinator. `worker` is the sender's index.
#[derive(Debug)]
pub enum WorkerEvent {
    Ready { worker: usize },
    LoadFailed { worker: usize, reason: String },
    Result { worker: usize, id: TaskId, result: String },
    InstallComplete { worker: usize, outcome: InstallOutcome },
    InstallFailed { worker: usize, error: InstallError },
    Exited { worker: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPayload {
    Inline(String),
    Request(RequestDescriptor),
}

impl TaskPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskPayload::Inline(_) => "inline",
            TaskPayload::Request(_) => "request",
        }
    }

    pub(crate) fn into_command(self, id: TaskId) -> WorkerCommand {
        match self {
            TaskPayload::Inline(code) => WorkerCommand::RunInline { id, code },
            TaskPayload::Request(request) => WorkerCommand::RunRequest { id, request },
        }
    }
}
