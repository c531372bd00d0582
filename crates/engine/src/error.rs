use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("path escapes the filesystem root: {0}")]
    OutsideRoot(String),

    #[error("io error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("sync failed: {0}")]
    Sync(String),
}

impl FsError {
    pub(crate) fn io(path: impl Into<String>, err: std::io::Error) -> Self {
        FsError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine failed to boot: {0}")]
    Boot(String),

    /// Uncaught failure inside the running program.
    #[error("{0}")]
    Execution(String),

    #[error("engine process exited with status {code:?}")]
    Exit { code: Option<i32> },

    #[error("engine io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fs(#[from] FsError),
}
