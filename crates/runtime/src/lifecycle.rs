use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use engine::EngineFactory;
use install::{BinaryCache, Fetcher, HttpFetcher, InstallOptions, InstallOutcome, WarmMarker};
use pool::{Pool, WorkerContext};
use runtime_core::{Config, RequestDescriptor, RuntimeError};
use store::{BINARY_NAMESPACE, Store};
use tokio::task::JoinHandle;

/// What `init` did to get ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    /// The warm marker was set, so installation was skipped.
    pub warm_start: bool,
    pub install: Option<InstallOutcome>,
    pub workers: usize,
    pub engine: &'static str,
}

#[derive(Debug)]
struct Session {
    pool: Pool,
    config: Arc<Config>,
    timeout: Duration,
    warmup: Option<JoinHandle<bool>>,
}

#[derive(Debug)]
enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready(Session),
    ShutDown,
}

/// One execution session: a pool of engine workers fed from a single queue.
///
/// Created by the embedding application and passed around by reference.
/// `init` must finish before any run method is called.
pub struct Runtime {
    factory: Arc<dyn EngineFactory>,
    fetcher: Arc<dyn Fetcher>,
    install: InstallOptions,
    store: Store,
    work_dir: PathBuf,
    state: Mutex<Lifecycle>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("engine", &self.factory.name())
            .field("install", &self.install)
            .field("store", &self.store)
            .finish()
    }
}

pub struct RuntimeBuilder {
    factory: Arc<dyn EngineFactory>,
    fetcher: Option<Arc<dyn Fetcher>>,
    store: Option<Store>,
    install: InstallOptions,
}

impl RuntimeBuilder {
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    pub fn install_options(mut self, install: InstallOptions) -> Self {
        self.install = install;
        self
    }

    /// Opens the store database named by the install options unless a store
    /// was given.
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let store = match self.store {
            Some(store) => store,
            None => Store::open(&self.install.database_path())
                .map_err(|err| RuntimeError::Storage(err.to_string()))?,
        };
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(HttpFetcher::new()));
        Ok(Runtime {
            factory: self.factory,
            fetcher,
            work_dir: self.install.work_dir_path(),
            install: self.install,
            store,
            state: Mutex::new(Lifecycle::Uninitialized),
        })
    }
}

impl Runtime {
    pub fn builder(factory: Arc<dyn EngineFactory>) -> RuntimeBuilder {
        RuntimeBuilder {
            factory,
            fetcher: None,
            store: None,
            install: InstallOptions::default(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn install_options(&self) -> &InstallOptions {
        &self.install
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Resolve the engine image, install the application when this is a
    /// cold start, and start the worker pool. `config` is merged over the
    /// defaults and frozen for the session.
    pub async fn init(&self, config: Config) -> Result<InitReport, RuntimeError> {
        {
            let mut state = self.lock();
            match *state {
                Lifecycle::Uninitialized => *state = Lifecycle::Initializing,
                Lifecycle::ShutDown => return Err(RuntimeError::Shutdown),
                Lifecycle::Initializing | Lifecycle::Ready(_) => {
                    return Err(RuntimeError::AlreadyInitialized);
                }
            }
        }

        let started = self.start(config).await;
        // `shutdown` may have been called while starting.
        let stopped = matches!(*self.lock(), Lifecycle::ShutDown);
        if stopped {
            if let Ok((session, _)) = started {
                session.pool.shutdown().await;
            }
            return Err(RuntimeError::Shutdown);
        }
        match started {
            Ok((session, report)) => {
                *self.lock() = Lifecycle::Ready(session);
                tracing::info!(
                    "runtime ready: {} {} workers ({} start)",
                    report.workers,
                    report.engine,
                    if report.warm_start { "warm" } else { "cold" }
                );
                Ok(report)
            }
            Err(err) => {
                *self.lock() = Lifecycle::Uninitialized;
                Err(err)
            }
        }
    }

    async fn start(&self, overrides: Config) -> Result<(Session, InitReport), RuntimeError> {
        let config = Config::with_defaults(&overrides);
        config.validate()?;
        let timeout = config.task_timeout()?;
        let config = Arc::new(config);

        let marker = WarmMarker::new(&self.store);
        let warm_start = marker.is_warm()?;
        let cache = BinaryCache::new(
            self.store.namespace(BINARY_NAMESPACE),
            self.install.image_name.clone(),
            self.install.image_url.clone(),
            Arc::clone(&self.fetcher),
        );
        let image = cache.resolve().await?;

        let context = Arc::new(WorkerContext {
            factory: Arc::clone(&self.factory),
            fetcher: Arc::clone(&self.fetcher),
            install: self.install.clone(),
            store: Some(self.store.clone()),
            work_dir: self.work_dir.clone(),
        });

        let install = if warm_start {
            tracing::debug!("warm start: skipping installation");
            None
        } else {
            Some(pool::install_once(Arc::clone(&context), image.clone(), Arc::clone(&config)).await?)
        };

        let pool = Pool::spawn(Arc::clone(&context), image.clone(), Arc::clone(&config))?;

        let warmup = (!warm_start).then(|| {
            pool::prewarm(context, image, Arc::clone(&config), move || {
                if let Err(err) = marker.mark_warm() {
                    tracing::warn!("could not record warm start: {}", err);
                }
            })
        });

        let report = InitReport {
            warm_start,
            install,
            workers: pool.worker_count(),
            engine: self.factory.name(),
        };
        Ok((
            Session {
                pool,
                config,
                timeout,
                warmup,
            },
            report,
        ))
    }

    fn session(&self) -> Result<(Pool, Duration), RuntimeError> {
        match &*self.lock() {
            Lifecycle::Ready(session) => Ok((session.pool.clone(), session.timeout)),
            Lifecycle::ShutDown => Err(RuntimeError::Shutdown),
            Lifecycle::Uninitialized | Lifecycle::Initializing => Err(RuntimeError::NotInitialized),
        }
    }

    /// The frozen session config, once initialized.
    pub fn config(&self) -> Option<Arc<Config>> {
        match &*self.lock() {
            Lifecycle::Ready(session) => Some(Arc::clone(&session.config)),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.lock(), Lifecycle::Ready(_))
    }

    /// Run code verbatim, waiting at most `TIMEOUT_WORKER`.
    pub async fn run_inline(&self, code: impl Into<String>) -> Result<String, RuntimeError> {
        let (pool, timeout) = self.session()?;
        pool.run_inline(code, timeout).await
    }

    pub async fn run_inline_with_timeout(
        &self,
        code: impl Into<String>,
        timeout: Duration,
    ) -> Result<String, RuntimeError> {
        let (pool, _) = self.session()?;
        pool.run_inline(code, timeout).await
    }

    /// Translate `request` into the engine's environment and run the script
    /// it targets, waiting at most `TIMEOUT_WORKER`.
    pub async fn run_request(&self, request: RequestDescriptor) -> Result<String, RuntimeError> {
        let (pool, timeout) = self.session()?;
        pool.run_request(request, timeout).await
    }

    pub async fn run_request_with_timeout(
        &self,
        request: RequestDescriptor,
        timeout: Duration,
    ) -> Result<String, RuntimeError> {
        let (pool, _) = self.session()?;
        pool.run_request(request, timeout).await
    }

    /// Wait for the background warm-up worker of a cold start. Returns
    /// whether the warm marker was written; `false` when there was none.
    pub async fn wait_for_warmup(&self) -> bool {
        let handle = match &mut *self.lock() {
            Lifecycle::Ready(session) => session.warmup.take(),
            _ => None,
        };
        match handle {
            Some(handle) => handle.await.unwrap_or(false),
            None => false,
        }
    }

    /// Stop every worker. Run methods fail with `Shutdown` afterwards.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.lock(), Lifecycle::ShutDown);
        if let Lifecycle::Ready(session) = previous {
            session.pool.shutdown().await;
            tracing::info!("runtime shut down");
        }
    }
}
