use std::path::{Path, PathBuf};

use crate::error::FsError;
use crate::fs::{FileSystem, FsResult, SyncDirection, path_components};

/// A host directory seen as the engine's file tree.
///
/// Virtual `/a/b` maps to `<root>/a/b`. Writes land on disk immediately, so
/// both sync directions are no-ops.
#[derive(Debug, Clone)]
pub struct HostFs {
    root: PathBuf,
}

impl HostFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &str) -> FsResult<PathBuf> {
        let mut resolved = self.root.clone();
        for component in path_components(path)? {
            resolved.push(component);
        }
        Ok(resolved)
    }
}

impl FileSystem for HostFs {
    fn read_file(&self, path: &str) -> FsResult<Vec<u8>> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        std::fs::read(&resolved).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            _ => FsError::io(path, err),
        })
    }

    fn write_file(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let resolved = self.resolve(path)?;
        if resolved.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        match resolved.parent() {
            Some(parent) if !parent.is_dir() => return Err(FsError::NotFound(path.to_string())),
            _ => {}
        }
        std::fs::write(&resolved, data).map_err(|err| FsError::io(path, err))
    }

    fn create_dir_all(&self, path: &str) -> FsResult<()> {
        let resolved = self.resolve(path)?;
        std::fs::create_dir_all(&resolved).map_err(|err| match err.kind() {
            std::io::ErrorKind::AlreadyExists => FsError::NotADirectory(path.to_string()),
            _ => FsError::io(path, err),
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|resolved| resolved.exists()).unwrap_or(false)
    }

    fn sync(&self, _direction: SyncDirection) -> FsResult<()> {
        Ok(())
    }

    fn host_path(&self, path: &str) -> FsResult<String> {
        let resolved = self.resolve(path)?;
        resolved
            .to_str()
            .map(str::to_string)
            .ok_or_else(|| FsError::NotFound(resolved.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_virtual_paths_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path());
        fs.create_dir_all("/www/lib").unwrap();
        fs.write_file("/www/lib/a.php", b"<?php").unwrap();

        assert_eq!(std::fs::read(dir.path().join("www/lib/a.php")).unwrap(), b"<?php");
        assert_eq!(fs.read_file("/www/lib/a.php").unwrap(), b"<?php");
        assert!(fs.exists("/www/lib"));
        assert_eq!(
            fs.read_file("/www/nope.php"),
            Err(FsError::NotFound("/www/nope.php".to_string()))
        );
    }

    #[test]
    fn refuses_to_leave_root() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path().join("jail"));
        assert_eq!(
            fs.write_file("/../escape.txt", b"x"),
            Err(FsError::OutsideRoot("/../escape.txt".to_string()))
        );
        assert!(!fs.exists("/../"));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn engine_sees_host_paths() {
        let dir = tempfile::tempdir().unwrap();
        let fs = HostFs::new(dir.path());
        let expected = dir.path().join("www").join("index.php");
        assert_eq!(fs.host_path("/www/index.php").unwrap(), expected.to_str().unwrap());
        assert!(fs.host_path("/www/../../etc").is_err());
        assert_eq!(
            crate::MemoryFs::new().host_path("/www/index.php").unwrap(),
            "/www/index.php"
        );
    }
}
