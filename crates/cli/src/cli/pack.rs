use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use ::install::{archive, gzip};

#[derive(Args, Debug)]
pub struct PackArgs {
    /// Project directory to pack
    pub dir: PathBuf,
    /// Output file, conventionally `app.dat.gz`
    pub out: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackReport {
    pub entries: usize,
    pub raw_bytes: usize,
    pub compressed_bytes: usize,
}

impl PackReport {
    /// Compressed size as a fraction of the encoded size.
    pub fn ratio(&self) -> f64 {
        if self.raw_bytes == 0 {
            return 0.0;
        }
        self.compressed_bytes as f64 / self.raw_bytes as f64
    }
}

pub fn pack(dir: &Path, out: &Path) -> Result<PackReport> {
    let entries = archive::pack_dir(dir).with_context(|| format!("packing {}", dir.display()))?;
    let raw = archive::encode(&entries)?;
    let compressed = gzip::gzip(&raw).context("compressing archive")?;
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(out, &compressed).with_context(|| format!("writing {}", out.display()))?;
    Ok(PackReport {
        entries: entries.len(),
        raw_bytes: raw.len(),
        compressed_bytes: compressed.len(),
    })
}

pub fn cmd(args: PackArgs) -> Result<()> {
    stdio::log("pack", &format!("packing {}", args.dir.display()));
    let report = pack(&args.dir, &args.out)?;
    stdio::info("entries", &report.entries.to_string());
    stdio::info("size", &stdio::human_bytes(report.compressed_bytes as u64));
    stdio::info("ratio", &format!("{:.1}%", report.ratio() * 100.0));
    stdio::success(&format!("wrote {}", args.out.display()));
    Ok(())
}
