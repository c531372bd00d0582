//! The interpreter seam: what a worker needs from an engine and the two
//! backends that ship with phpbox.

pub mod error;
pub mod events;
pub mod fs;
pub mod host_fs;
pub mod memory_fs;
pub mod process;
pub mod stub;

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use store::Namespace;

pub use error::{EngineError, FsError};
pub use events::{EventStream, Stream, SubscriberId};
pub use fs::{FileSystem, FsResult, SyncDirection};
pub use host_fs::HostFs;
pub use memory_fs::MemoryFs;
pub use process::{ProcessEngine, ProcessEngineFactory};
pub use stub::{StubEngine, StubEngineFactory};

/// One running interpreter, owned by a single worker thread.
#[async_trait(?Send)]
pub trait Engine {
    /// Fresh global scope for the next run. The filesystem is untouched.
    async fn reset(&mut self) -> Result<(), EngineError>;

    /// Run `code` to completion, emitting chunks on [`Engine::events`].
    async fn run(&mut self, code: &str) -> Result<(), EngineError>;

    fn fs(&self) -> &dyn FileSystem;

    fn events(&self) -> &EventStream;
}

/// Boots engines from a binary image. Shared by every worker.
#[async_trait(?Send)]
pub trait EngineFactory: Send + Sync + 'static {
    /// A successful boot is the engine's `ready`.
    async fn boot(&self, image: Bytes, options: BootOptions) -> Result<Box<dyn Engine>, EngineError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct BootOptions {
    /// Virtual path the application tree is mounted at.
    pub mount: String,
    /// Where the mounted tree is persisted, if anywhere.
    pub persist: Option<Namespace>,
    /// Scratch directory for backends that need host files.
    pub work_dir: PathBuf,
    pub debug: bool,
}

impl BootOptions {
    pub fn new(mount: impl Into<String>) -> Self {
        Self {
            mount: mount.into(),
            persist: None,
            work_dir: std::env::temp_dir().join("phpbox"),
            debug: false,
        }
    }

    pub fn with_persist(mut self, namespace: Namespace) -> Self {
        self.persist = Some(namespace);
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}
