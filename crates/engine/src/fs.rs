use std::path::{Component, Path};

use crate::error::FsError;

pub type FsResult<T> = std::result::Result<T, FsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Replace the live view with what persistent storage holds.
    Load,
    /// Write the live view back to persistent storage.
    Flush,
}

/// The engine's private file tree as seen from the host.
///
/// Paths are absolute, `/`-separated virtual paths (`/www/index.php`).
pub trait FileSystem {
    fn read_file(&self, path: &str) -> FsResult<Vec<u8>>;

    /// Create or truncate `path`. The parent directory must exist.
    fn write_file(&self, path: &str, data: &[u8]) -> FsResult<()>;

    fn create_dir_all(&self, path: &str) -> FsResult<()>;

    fn exists(&self, path: &str) -> bool;

    fn sync(&self, direction: SyncDirection) -> FsResult<()>;

    /// Where the engine itself finds `path`. Engines that live inside the
    /// tree see virtual paths unchanged.
    fn host_path(&self, path: &str) -> FsResult<String> {
        Ok(path.to_string())
    }
}

/// Split a virtual path into normal segments, refusing `..`.
pub(crate) fn path_components(path: &str) -> FsResult<Vec<String>> {
    let mut components = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(segment) => {
                let segment = segment
                    .to_str()
                    .ok_or_else(|| FsError::NotFound(path.to_string()))?;
                components.push(segment.to_string());
            }
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(FsError::OutsideRoot(path.to_string()));
            }
        }
    }
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_ignore_root_and_dots() {
        assert_eq!(
            path_components("/www/./app/index.php").unwrap(),
            vec!["www", "app", "index.php"]
        );
        assert!(path_components("/").unwrap().is_empty());
        assert_eq!(
            path_components("/www/../etc"),
            Err(FsError::OutsideRoot("/www/../etc".to_string()))
        );
    }
}
