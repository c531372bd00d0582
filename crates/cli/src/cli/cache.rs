use anyhow::Result;
use clap::Subcommand;
use runtime::Store;
use runtime::maintenance::{cache_status, clear_cache};

use super::{GlobalArgs, Settings};

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum CacheAction {
    /// Show the cached image and the warm flag
    Status,
    /// Remove the cached image, the warm flag and the installed files
    Clear,
}

pub fn cmd(global: &GlobalArgs, action: CacheAction) -> Result<()> {
    let settings = Settings::load(global)?;
    let config = settings.effective_config();
    let path = settings.install.database_path();
    let store = Store::open(&path)?;

    match action {
        CacheAction::Status => {
            let status = cache_status(&store, &settings.install, &config)?;
            stdio::info("store", &path.display().to_string());
            let image = match status.image_size {
                Some(size) => stdio::human_bytes(size),
                None => "not cached".to_string(),
            };
            stdio::info(&status.image_name, &image);
            stdio::info("warm", if status.warm { "yes" } else { "no" });
            stdio::info("files", &status.installed_entries.to_string());
        }
        CacheAction::Clear => {
            let cleared = clear_cache(&store, &settings.install, &config)?;
            if cleared.image {
                stdio::detail("removed engine image");
            }
            if cleared.warm_marker {
                stdio::detail("removed warm marker");
            }
            if cleared.fs_entries > 0 {
                stdio::detail(&format!("removed {} installed entries", cleared.fs_entries));
            }
            stdio::success("cache cleared");
        }
    }
    Ok(())
}
