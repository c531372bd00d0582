//! Operator-side inspection and reset of what a runtime keeps between runs.

use install::{InstallOptions, WarmMarker};
use runtime_core::{Config, RuntimeError};
use store::{BINARY_NAMESPACE, Store, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    pub image_name: String,
    /// Stored size of the cached image, `None` when nothing is cached.
    pub image_size: Option<u64>,
    pub warm: bool,
    /// Entries persisted for the mounted application tree.
    pub installed_entries: usize,
}

impl CacheStatus {
    pub fn image_cached(&self) -> bool {
        self.image_size.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cleared {
    pub image: bool,
    pub warm_marker: bool,
    pub fs_entries: usize,
}

fn storage(err: StoreError) -> RuntimeError {
    RuntimeError::Storage(err.to_string())
}

pub fn cache_status(
    store: &Store,
    install: &InstallOptions,
    config: &Config,
) -> Result<CacheStatus, RuntimeError> {
    let image_size = store
        .namespace(BINARY_NAMESPACE)
        .size_of(&install.image_name)
        .map_err(storage)?;
    let warm = WarmMarker::new(store).is_warm()?;
    let installed_entries = store
        .namespace(config.document_root())
        .len()
        .map_err(storage)?;
    Ok(CacheStatus {
        image_name: install.image_name.clone(),
        image_size,
        warm,
        installed_entries,
    })
}

/// Forget the cached image, the warm marker and the persisted tree, so the
/// next `init` is a cold start that fetches and installs again.
///
/// Must not run while a runtime is using the same store.
pub fn clear_cache(
    store: &Store,
    install: &InstallOptions,
    config: &Config,
) -> Result<Cleared, RuntimeError> {
    let image = store
        .namespace(BINARY_NAMESPACE)
        .delete(&install.image_name)
        .map_err(storage)?;
    let warm_marker = WarmMarker::new(store).clear()?;
    let fs_entries = store
        .namespace(config.document_root())
        .clear()
        .map_err(storage)?;
    tracing::info!(
        "cache cleared: image={} warm={} fs_entries={}",
        image,
        warm_marker,
        fs_entries
    );
    Ok(Cleared {
        image,
        warm_marker,
        fs_entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Store {
        let store = Store::in_memory().unwrap();
        store
            .namespace(BINARY_NAMESPACE)
            .put("php-engine", b"image-bytes")
            .unwrap();
        WarmMarker::new(&store).mark_warm().unwrap();
        let www = store.namespace("/www");
        www.put("index.php", b"<?php echo 1;").unwrap();
        www.put("lib/", b"").unwrap();
        store
    }

    #[test]
    fn status_reports_what_is_stored() {
        let store = seeded();
        let status = cache_status(&store, &InstallOptions::default(), &Config::defaults()).unwrap();
        assert_eq!(status.image_name, "php-engine");
        assert_eq!(status.image_size, Some(11));
        assert!(status.warm);
        assert_eq!(status.installed_entries, 2);
    }

    #[test]
    fn empty_store_is_cold() {
        let store = Store::in_memory().unwrap();
        let status = cache_status(&store, &InstallOptions::default(), &Config::defaults()).unwrap();
        assert!(!status.image_cached());
        assert!(!status.warm);
        assert_eq!(status.installed_entries, 0);
    }

    #[test]
    fn clear_removes_everything_once() {
        let store = seeded();
        let install = InstallOptions::default();
        let config = Config::defaults();

        let cleared = clear_cache(&store, &install, &config).unwrap();
        assert_eq!(
            cleared,
            Cleared {
                image: true,
                warm_marker: true,
                fs_entries: 2,
            }
        );
        assert_eq!(clear_cache(&store, &install, &config).unwrap(), Cleared::default());
        assert!(!cache_status(&store, &install, &config).unwrap().warm);
    }
}
