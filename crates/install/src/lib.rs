//! Getting the engine image and the application tree into place.

pub mod archive;
pub mod cache;
pub mod error;
pub mod fetch;
pub mod gzip;
pub mod installer;
pub mod warm;

pub use archive::ArchiveEntry;
pub use cache::BinaryCache;
pub use error::{ArchiveError, InstallError};
pub use fetch::{Fetcher, HttpFetcher, MemoryFetcher};
pub use installer::{
    DEFAULT_IMAGE_NAME, InstallOptions, InstallOutcome, InstallPlan, MARKER_FILE, ensure_installed,
};
pub use warm::WarmMarker;
