use std::path::PathBuf;

use engine::{FileSystem, SyncDirection};
use runtime_core::Config;
use runtime_core::env::data_dir;
use serde::Deserialize;

use crate::archive::{self, ArchiveEntry};
use crate::error::InstallError;
use crate::fetch::Fetcher;
use crate::gzip;

pub const DEFAULT_IMAGE_NAME: &str = "php-engine";
pub const MARKER_FILE: &str = ".phpbox-installed";

/// Where the image and the application archive come from, and where they
/// are kept. Read from the `[install]` table of `phpbox.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallOptions {
    pub image_url: Option<String>,
    pub image_name: String,
    pub archive_url: Option<String>,
    /// Marker path inside the engine filesystem.
    pub marker: Option<String>,
    pub database: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    /// Host directory that process-backed engines use as their file tree.
    pub engine_root: Option<PathBuf>,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            image_url: None,
            image_name: DEFAULT_IMAGE_NAME.to_string(),
            archive_url: None,
            marker: None,
            database: None,
            work_dir: None,
            engine_root: None,
        }
    }
}

impl InstallOptions {
    /// `<DOCUMENT_ROOT>/.phpbox-installed` unless overridden.
    pub fn marker_path(&self, config: &Config) -> String {
        self.marker.clone().unwrap_or_else(|| {
            format!(
                "{}/{}",
                config.document_root().trim_end_matches('/'),
                MARKER_FILE
            )
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| data_dir().join("store.db"))
    }

    pub fn work_dir_path(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| data_dir().join("work"))
    }

    pub fn engine_root_path(&self) -> PathBuf {
        self.engine_root.clone().unwrap_or_else(|| data_dir().join("root"))
    }

    /// What a worker needs to install the application for `config`.
    pub fn plan(&self, config: &Config) -> InstallPlan {
        InstallPlan {
            mount: config.document_root(),
            marker: self.marker_path(config),
            archive_url: self.archive_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    pub mount: String,
    pub marker: String,
    pub archive_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Marker found; nothing fetched.
    AlreadyInstalled,
    Installed { entries: usize, bytes: usize },
    /// No archive configured, so there is nothing to install.
    NoArchive,
}

/// Make sure the application tree is present in `fs`.
///
/// The archive is fetched and fully decoded before anything is written, so a
/// corrupt archive leaves the filesystem untouched. Racing installers may
/// both extract; the writes are identical and the marker makes the next
/// start skip the work.
pub async fn ensure_installed(
    fs: &dyn FileSystem,
    fetcher: &dyn Fetcher,
    plan: &InstallPlan,
) -> Result<InstallOutcome, InstallError> {
    if fs.exists(&plan.marker) {
        fs.sync(SyncDirection::Load)?;
        tracing::debug!("marker {} present, skipping install", plan.marker);
        return Ok(InstallOutcome::AlreadyInstalled);
    }
    let Some(url) = plan.archive_url.as_deref() else {
        tracing::debug!("no archive configured for {}", plan.mount);
        return Ok(InstallOutcome::NoArchive);
    };

    let fetched = fetcher.fetch(url).await?;
    let entries = tokio::task::spawn_blocking(move || unpack(&fetched))
        .await
        .map_err(|err| InstallError::Task(err.to_string()))??;
    let bytes = extract(fs, &plan.mount, &entries)?;

    write_marker(fs, &plan.marker)?;
    fs.sync(SyncDirection::Flush)?;
    tracing::info!(
        "installed {} entries ({} bytes) into {}",
        entries.len(),
        bytes,
        plan.mount
    );
    Ok(InstallOutcome::Installed {
        entries: entries.len(),
        bytes,
    })
}

fn unpack(fetched: &[u8]) -> Result<Vec<ArchiveEntry>, InstallError> {
    let raw = gzip::maybe_gunzip(fetched.to_vec()).map_err(|err| InstallError::Decompress {
        what: "application archive",
        reason: err.to_string(),
    })?;
    Ok(archive::decode(&raw)?)
}

fn extract(fs: &dyn FileSystem, mount: &str, entries: &[ArchiveEntry]) -> Result<usize, InstallError> {
    let mount = mount.trim_end_matches('/');
    fs.create_dir_all(if mount.is_empty() { "/" } else { mount })?;
    let mut bytes = 0;
    for entry in entries {
        let path = format!("{}/{}", mount, entry.name.trim_end_matches('/'));
        if entry.is_dir() {
            fs.create_dir_all(&path)?;
            continue;
        }
        if let Some((parent, _)) = path.rsplit_once('/') {
            if !parent.is_empty() {
                fs.create_dir_all(parent)?;
            }
        }
        fs.write_file(&path, &entry.data)?;
        bytes += entry.data.len();
    }
    Ok(bytes)
}

fn write_marker(fs: &dyn FileSystem, marker: &str) -> Result<(), InstallError> {
    if let Some((parent, _)) = marker.rsplit_once('/') {
        if !parent.is_empty() {
            fs.create_dir_all(parent)?;
        }
    }
    fs.write_file(marker, b"")?;
    Ok(())
}
