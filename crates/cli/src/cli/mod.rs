use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use clap::{Args, ValueEnum};
use ::install::{Fetcher, HttpFetcher, InstallError};
use runtime::{
    Config, InitReport, InstallOptions, ProcessEngineFactory, Runtime, StubEngineFactory,
};
use serde::Deserialize;

pub mod cache;
pub mod install;
pub mod pack;
pub mod request;
pub mod run;

/// Read from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "phpbox.toml";

/// Image source used by the stub engine when none is configured.
const STUB_IMAGE_SOURCE: &str = "stub://php-engine";

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file (defaults to ./phpbox.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override an option, e.g. --set NUM_WORKERS=4
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    pub set: Vec<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Engine backend
    #[arg(long, value_enum, default_value_t = EngineKind::Process, global = true)]
    pub engine: EngineKind,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineKind {
    /// Spawn the engine image as a host process
    #[default]
    Process,
    /// Built-in scripted engine, for trying things out
    Stub,
}

/// Layout of `phpbox.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectFile {
    pub options: Config,
    pub install: InstallOptions,
}

impl ProjectFile {
    pub fn parse(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&source).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Options and install sources after every layer was applied.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Overrides only; the runtime merges them over the defaults.
    pub config: Config,
    pub install: InstallOptions,
}

impl Settings {
    pub fn load(global: &GlobalArgs) -> Result<Self> {
        let file = ProjectFile::load(global.config.as_deref())?;
        Self::layer(file, Config::from_env(), global)
    }

    /// defaults < file < environment < `--set` < `--debug`.
    fn layer(file: ProjectFile, env: Config, global: &GlobalArgs) -> Result<Self> {
        let mut config = file.options;
        config.merge(&env);
        for raw in &global.set {
            let (key, value) = Config::parse_assignment(raw)?;
            config.set(key, value);
        }
        if global.debug {
            config.set(runtime_core::keys::DEBUG, true);
        }
        Ok(Self {
            config,
            install: file.install,
        })
    }

    /// The session config as `init` will see it.
    pub fn effective_config(&self) -> Config {
        Config::with_defaults(&self.config)
    }

    pub fn runtime(&self, engine: EngineKind) -> Result<Runtime> {
        let mut install = self.install.clone();
        let builder = match engine {
            EngineKind::Process => {
                let factory = ProcessEngineFactory::new(install.engine_root_path());
                Runtime::builder(Arc::new(factory)).fetcher(Arc::new(HttpFetcher::new()))
            }
            EngineKind::Stub => {
                install.image_url.get_or_insert_with(|| STUB_IMAGE_SOURCE.to_string());
                Runtime::builder(Arc::new(StubEngineFactory::new()))
                    .fetcher(Arc::new(StubImageFetcher::default()))
            }
        };
        builder
            .install_options(install)
            .build()
            .context("opening the runtime store")
    }
}

/// Serves a placeholder image for the stub engine and defers everything
/// else to [`HttpFetcher`].
#[derive(Debug, Default)]
struct StubImageFetcher {
    http: HttpFetcher,
}

#[async_trait]
impl Fetcher for StubImageFetcher {
    async fn fetch(&self, source: &str) -> Result<Bytes, InstallError> {
        if source == STUB_IMAGE_SOURCE {
            return Ok(Bytes::from_static(b"stub"));
        }
        self.http.fetch(source).await
    }
}

/// Start a runtime, reporting what `init` did.
pub async fn start(global: &GlobalArgs, settings: &Settings) -> Result<(Runtime, InitReport)> {
    let runtime = settings.runtime(global.engine)?;
    let report = runtime
        .init(settings.config.clone())
        .await
        .context("initializing the runtime")?;
    stdio::debug(
        "init",
        &format!(
            "{} workers on the {} engine ({} start)",
            report.workers,
            report.engine,
            if report.warm_start { "warm" } else { "cold" }
        ),
    );
    Ok((runtime, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime::ConfigValue;

    fn global(set: &[&str]) -> GlobalArgs {
        GlobalArgs {
            set: set.iter().map(|s| s.to_string()).collect(),
            ..GlobalArgs::default()
        }
    }

    #[test]
    fn project_file_splits_options_and_install() {
        let file = ProjectFile::parse(
            r#"
            [options]
            NUM_WORKERS = 4
            DOCUMENT_ROOT = "/srv"

            [install]
            archive_url = "https://example.com/app.dat.gz"
            "#,
        )
        .unwrap();
        assert_eq!(file.options.num_workers().unwrap(), 4);
        assert_eq!(file.options.document_root(), "/srv");
        assert_eq!(
            file.install.archive_url.as_deref(),
            Some("https://example.com/app.dat.gz")
        );
        assert_eq!(file.install.image_name, "php-engine");
    }

    #[test]
    fn unknown_install_keys_are_rejected() {
        assert!(ProjectFile::parse("[install]\nimage = \"x\"\n").is_err());
    }

    #[test]
    fn later_layers_win() {
        let file = ProjectFile::parse("[options]\nNUM_WORKERS = 4\nTIMEOUT_WORKER = 50\n").unwrap();
        let env = Config::new().with("NUM_WORKERS", 6i64);
        let settings = Settings::layer(file, env, &global(&["NUM_WORKERS=8", "CUSTOM=yes"])).unwrap();

        let config = settings.effective_config();
        assert_eq!(config.num_workers().unwrap(), 8);
        assert_eq!(config.get("TIMEOUT_WORKER"), Some(&ConfigValue::Int(50)));
        assert_eq!(config.get("CUSTOM"), Some(&ConfigValue::Str("yes".to_string())));
        assert_eq!(config.document_root(), "/www");
    }

    #[test]
    fn malformed_assignment_is_an_error() {
        let err = Settings::layer(ProjectFile::default(), Config::new(), &global(&["NUM_WORKERS"]));
        assert!(err.is_err());
    }
}
