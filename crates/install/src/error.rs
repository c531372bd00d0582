use engine::FsError;
use runtime_core::RuntimeError;
use store::StoreError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("archive truncated at byte {offset}: needed {needed} more bytes")]
    Truncated { offset: usize, needed: usize },

    #[error("archive declares {count} entries but holds only {available} bytes")]
    ImplausibleCount { count: u32, available: usize },

    #[error("archive has {0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("archive entry name is not utf-8 at byte {0}")]
    NameEncoding(usize),

    #[error("archive entry '{0}' escapes the mount point")]
    UnsafeName(String),

    #[error("directory entry '{0}' carries content")]
    DirectoryWithContent(String),

    #[error("archive entry '{name}' is too large ({len} bytes)")]
    TooLarge { name: String, len: usize },

    #[error("nothing to pack in {0}")]
    Empty(String),

    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("fetching {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("no {0} source configured")]
    MissingSource(&'static str),

    #[error("failed to decompress {what}: {reason}")]
    Decompress { what: &'static str, reason: String },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("extraction failed: {0}")]
    Fs(#[from] FsError),

    #[error("storage: {0}")]
    Storage(#[from] StoreError),

    #[error("engine is not loaded")]
    NotLoaded,

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<InstallError> for RuntimeError {
    fn from(err: InstallError) -> Self {
        match err {
            InstallError::Transport { url, reason } => RuntimeError::Transport { url, reason },
            InstallError::Storage(err) => RuntimeError::Storage(err.to_string()),
            other => RuntimeError::Installation(other.to_string()),
        }
    }
}
