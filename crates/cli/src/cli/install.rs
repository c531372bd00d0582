use anyhow::Result;
use runtime::InstallOutcome;

use super::{GlobalArgs, Settings, start};

pub async fn cmd(global: &GlobalArgs) -> Result<()> {
    let settings = Settings::load(global)?;
    stdio::log("install", "resolving engine image...");
    let (runtime, report) = start(global, &settings).await?;
    let warmed = runtime.wait_for_warmup().await;
    runtime.shutdown().await;

    match &report.install {
        Some(outcome) => stdio::log("install", &describe(outcome)),
        None => stdio::log("install", "warm start, nothing to do"),
    }
    let status = runtime::maintenance::cache_status(
        runtime.store(),
        runtime.install_options(),
        &settings.effective_config(),
    )?;
    if let Some(size) = status.image_size {
        stdio::info("image", &stdio::human_bytes(size));
    }
    stdio::info("files", &status.installed_entries.to_string());
    if warmed || status.warm {
        stdio::success("ready; next start is warm");
    } else {
        stdio::success("ready");
    }
    Ok(())
}

fn describe(outcome: &InstallOutcome) -> String {
    match outcome {
        InstallOutcome::AlreadyInstalled => "already installed".to_string(),
        InstallOutcome::Installed { entries, bytes } => format!(
            "extracted {} entries ({})",
            entries,
            stdio::human_bytes(*bytes as u64)
        ),
        InstallOutcome::NoArchive => "no application archive configured".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_read_naturally() {
        assert_eq!(
            describe(&InstallOutcome::Installed { entries: 3, bytes: 2048 }),
            "extracted 3 entries (2.0 KiB)"
        );
        assert_eq!(describe(&InstallOutcome::AlreadyInstalled), "already installed");
    }
}
