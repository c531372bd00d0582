//! The execution worker: one OS thread, one engine, one task at a time.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use engine::{BootOptions, Engine, EngineFactory, FileSystem};
use install::{Fetcher, InstallError, InstallOptions};
use runtime_core::php_pipeline::{build_request_program, request_time_now};
use runtime_core::{Config, TaskId, keys};
use store::Store;
use tokio::sync::mpsc;

use crate::message::{ERROR_MARKER, WorkerCommand, WorkerEvent};

/// Everything a worker needs besides its commands.
pub struct WorkerContext {
    pub factory: Arc<dyn EngineFactory>,
    pub fetcher: Arc<dyn Fetcher>,
    pub install: InstallOptions,
    /// Persists the mounted tree when set.
    pub store: Option<Store>,
    pub work_dir: PathBuf,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("factory", &self.factory.name())
            .field("install", &self.install)
            .field("store", &self.store)
            .field("work_dir", &self.work_dir)
            .finish()
    }
}

/// Index of the short-lived install and warm-up workers; never a pool slot.
pub const SETUP_WORKER: usize = usize::MAX;

/// Owner side of a spawned worker thread.
#[derive(Debug)]
pub struct WorkerThread {
    pub index: usize,
    pub commands: mpsc::UnboundedSender<WorkerCommand>,
    pub join: JoinHandle<()>,
}

pub fn spawn_worker(
    index: usize,
    context: Arc<WorkerContext>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> std::io::Result<WorkerThread> {
    let (commands, rx) = mpsc::unbounded_channel();
    let name = if index == SETUP_WORKER {
        "phpbox-setup".to_string()
    } else {
        format!("phpbox-worker-{}", index)
    };
    let join = thread::Builder::new()
        .name(name)
        .spawn(move || {
            let _exit = ExitNotice {
                index,
                events: events.clone(),
            };
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(err) => {
                    tracing::error!("worker {} could not start a runtime: {}", index, err);
                    return;
                }
            };
            tracing::debug!("worker {} started", index);
            let mut worker = Worker {
                index,
                context,
                events,
                engine: None,
                config: Arc::new(Config::defaults()),
                program_config: Arc::new(Config::defaults()),
            };
            rt.block_on(worker.run(rx));
            tracing::debug!("worker {} shutting down", index);
        })?;
    Ok(WorkerThread {
        index,
        commands,
        join,
    })
}

/// Sends `Exited` when the worker thread ends, unwinding included.
struct ExitNotice {
    index: usize,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!("worker {} panicked", self.index);
        }
        let _ = self.events.send(WorkerEvent::Exited { worker: self.index });
    }
}

struct Worker {
    index: usize,
    context: Arc<WorkerContext>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    engine: Option<Box<dyn Engine>>,
    config: Arc<Config>,
    /// `config` with its roots as the engine sees them.
    program_config: Arc<Config>,
}

impl Worker {
    async fn run(&mut self, mut rx: mpsc::UnboundedReceiver<WorkerCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                WorkerCommand::Load { image, config } => self.load(image, config).await,
                WorkerCommand::RunInline { id, code } => {
                    let result = self.execute(id, &code).await;
                    self.send_result(id, result);
                }
                WorkerCommand::RunRequest { id, request } => {
                    let program = build_request_program(&request, &self.program_config, request_time_now());
                    let result = self.execute(id, &program).await;
                    self.send_result(id, result);
                }
                WorkerCommand::Install => self.install().await,
                WorkerCommand::Shutdown => break,
            }
        }
    }

    async fn load(&mut self, image: Bytes, config: Arc<Config>) {
        if self.engine.is_some() {
            tracing::debug!("worker {} already loaded", self.index);
            return;
        }
        let mount = config.document_root();
        let mut options = BootOptions::new(mount.clone())
            .with_work_dir(self.context.work_dir.clone())
            .with_debug(config.debug());
        if let Some(store) = &self.context.store {
            options = options.with_persist(store.namespace(mount));
        }
        match self.context.factory.boot(image, options).await {
            Ok(engine) => {
                self.program_config = engine_view(engine.fs(), &config);
                self.engine = Some(engine);
                self.config = config;
                tracing::debug!("worker {} ready ({})", self.index, self.context.factory.name());
                let _ = self.events.send(WorkerEvent::Ready { worker: self.index });
            }
            Err(err) => {
                tracing::error!("worker {} failed to load engine: {}", self.index, err);
                let _ = self.events.send(WorkerEvent::LoadFailed {
                    worker: self.index,
                    reason: err.to_string(),
                });
            }
        }
    }

    /// Reset, run, and collect every emitted chunk in order.
    async fn execute(&mut self, id: TaskId, code: &str) -> String {
        let debug = self.config.debug();
        let Some(engine) = self.engine.as_mut() else {
            return format!("{}engine not loaded", ERROR_MARKER);
        };
        if debug {
            tracing::debug!("task {} program:\n{}", id, code);
        }
        if let Err(err) = engine.reset().await {
            return format!("{}{}", ERROR_MARKER, err);
        }

        let captured = Rc::new(RefCell::new(String::new()));
        let sink = Rc::clone(&captured);
        let subscription = engine.events().subscribe(move |stream, chunk| {
            if debug {
                tracing::trace!("task {} {:?}: {}", id, stream, chunk);
            }
            sink.borrow_mut().push_str(chunk);
        });
        let outcome = engine.run(code).await;
        engine.events().unsubscribe(subscription);

        match outcome {
            Ok(()) => captured.take(),
            Err(err) => format!("{}{}", ERROR_MARKER, err),
        }
    }

    async fn install(&mut self) {
        let Some(engine) = self.engine.as_ref() else {
            let _ = self.events.send(WorkerEvent::InstallFailed {
                worker: self.index,
                error: InstallError::NotLoaded,
            });
            return;
        };
        let plan = self.context.install.plan(&self.config);
        let event = match install::ensure_installed(engine.fs(), &*self.context.fetcher, &plan).await {
            Ok(outcome) => WorkerEvent::InstallComplete {
                worker: self.index,
                outcome,
            },
            Err(error) => WorkerEvent::InstallFailed {
                worker: self.index,
                error,
            },
        };
        let _ = self.events.send(event);
    }

    fn send_result(&self, id: TaskId, result: String) {
        let _ = self.events.send(WorkerEvent::Result {
            worker: self.index,
            id,
            result,
        });
    }
}

/// Map the document root, and an absolute entry point, to engine paths.
fn engine_view(fs: &dyn FileSystem, config: &Arc<Config>) -> Arc<Config> {
    let mut targets = vec![(keys::DOCUMENT_ROOT, config.document_root())];
    if let Some(entry) = config.entry_point().filter(|entry| entry.starts_with('/')) {
        targets.push((keys::ENTRY_POINT, entry));
    }
    let mut view = Config::clone(config);
    for (key, path) in targets {
        match fs.host_path(&path) {
            Ok(mapped) => view = view.with(key, mapped),
            Err(err) => tracing::warn!("keeping {} as '{}': {}", key, path, err),
        }
    }
    Arc::new(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use engine::StubEngineFactory;
    use install::MemoryFetcher;
    use runtime_core::RequestDescriptor;

    struct PanickingFetcher;

    #[async_trait]
    impl Fetcher for PanickingFetcher {
        async fn fetch(&self, source: &str) -> Result<Bytes, InstallError> {
            panic!("fetch of {} blew up", source);
        }
    }

    fn context() -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            factory: Arc::new(StubEngineFactory::new()),
            fetcher: Arc::new(MemoryFetcher::new()),
            install: InstallOptions::default(),
            store: None,
            work_dir: std::env::temp_dir(),
        })
    }

    async fn next(events: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> WorkerEvent {
        events.recv().await.unwrap()
    }

    #[tokio::test]
    async fn load_is_idempotent_and_runs_are_isolated() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let worker = spawn_worker(0, context(), events_tx).unwrap();
        let load = WorkerCommand::Load {
            image: Bytes::from_static(b"stub"),
            config: Arc::new(Config::defaults()),
        };
        worker.commands.send(load.clone()).unwrap();
        worker.commands.send(load).unwrap();
        worker
            .commands
            .send(WorkerCommand::RunInline {
                id: TaskId(1),
                code: "set x 1\noutput 2+2".to_string(),
            })
            .unwrap();
        worker
            .commands
            .send(WorkerCommand::RunInline {
                id: TaskId(2),
                code: "get x".to_string(),
            })
            .unwrap();

        assert!(matches!(next(&mut events).await, WorkerEvent::Ready { worker: 0 }));
        // No second ready: the next event is the first result.
        assert!(matches!(
            next(&mut events).await,
            WorkerEvent::Result { id: TaskId(1), ref result, .. } if result == "4"
        ));
        assert!(matches!(
            next(&mut events).await,
            WorkerEvent::Result { id: TaskId(2), ref result, .. } if result == "null"
        ));

        worker.commands.send(WorkerCommand::Shutdown).unwrap();
        assert!(matches!(next(&mut events).await, WorkerEvent::Exited { worker: 0 }));
    }

    #[tokio::test]
    async fn engine_failures_become_marked_results() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let worker = spawn_worker(3, context(), events_tx).unwrap();
        worker
            .commands
            .send(WorkerCommand::RunInline {
                id: TaskId(7),
                code: "output 1".to_string(),
            })
            .unwrap();
        assert!(matches!(
            next(&mut events).await,
            WorkerEvent::Result { worker: 3, ref result, .. } if result == "PHP ERROR: engine not loaded"
        ));

        worker
            .commands
            .send(WorkerCommand::Load {
                image: Bytes::from_static(b"stub"),
                config: Arc::new(Config::defaults()),
            })
            .unwrap();
        worker
            .commands
            .send(WorkerCommand::RunInline {
                id: TaskId(8),
                code: "throw Call to undefined function foo()".to_string(),
            })
            .unwrap();
        assert!(matches!(next(&mut events).await, WorkerEvent::Ready { .. }));
        assert!(matches!(
            next(&mut events).await,
            WorkerEvent::Result { id: TaskId(8), ref result, .. }
                if result == "PHP ERROR: Call to undefined function foo()"
        ));
    }

    #[tokio::test]
    async fn request_tasks_run_the_generated_program() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let worker = spawn_worker(0, context(), events_tx).unwrap();
        worker
            .commands
            .send(WorkerCommand::Load {
                image: Bytes::from_static(b"stub"),
                config: Arc::new(Config::defaults()),
            })
            .unwrap();
        worker
            .commands
            .send(WorkerCommand::RunRequest {
                id: TaskId(1),
                request: RequestDescriptor::get("/index.php?name=Ada"),
            })
            .unwrap();
        assert!(matches!(next(&mut events).await, WorkerEvent::Ready { .. }));
        let WorkerEvent::Result { result, .. } = next(&mut events).await else {
            panic!("expected a result");
        };
        assert!(result.starts_with("<?php "));
        assert!(result.contains("$_GET['name'] = 'Ada';"));
        assert!(result.ends_with("include_once($_SERVER['SCRIPT_FILENAME']);"));
    }

    #[tokio::test]
    async fn failed_boot_reports_and_stays_unloaded() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let context = Arc::new(WorkerContext {
            factory: Arc::new(StubEngineFactory::failing("bad magic")),
            fetcher: Arc::new(MemoryFetcher::new()),
            install: InstallOptions::default(),
            store: None,
            work_dir: std::env::temp_dir(),
        });
        let worker = spawn_worker(1, context, events_tx).unwrap();
        worker
            .commands
            .send(WorkerCommand::Load {
                image: Bytes::from_static(b"stub"),
                config: Arc::new(Config::defaults()),
            })
            .unwrap();
        worker.commands.send(WorkerCommand::Install).unwrap();
        assert!(matches!(
            next(&mut events).await,
            WorkerEvent::LoadFailed { worker: 1, ref reason } if reason.contains("bad magic")
        ));
        assert!(matches!(
            next(&mut events).await,
            WorkerEvent::InstallFailed { error: InstallError::NotLoaded, .. }
        ));
    }

    #[tokio::test]
    async fn panicking_worker_still_reports_exit() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let context = Arc::new(WorkerContext {
            factory: Arc::new(StubEngineFactory::new()),
            fetcher: Arc::new(PanickingFetcher),
            install: InstallOptions {
                archive_url: Some("https://cdn.example/app.dat".to_string()),
                ..InstallOptions::default()
            },
            store: None,
            work_dir: std::env::temp_dir(),
        });
        let worker = spawn_worker(2, context, events_tx).unwrap();
        worker
            .commands
            .send(WorkerCommand::Load {
                image: Bytes::from_static(b"stub"),
                config: Arc::new(Config::defaults()),
            })
            .unwrap();
        worker.commands.send(WorkerCommand::Install).unwrap();

        assert!(matches!(next(&mut events).await, WorkerEvent::Ready { worker: 2 }));
        assert!(matches!(next(&mut events).await, WorkerEvent::Exited { worker: 2 }));
        assert!(worker.join.join().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_engines_get_host_paths() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let context = Arc::new(WorkerContext {
            factory: Arc::new(engine::ProcessEngineFactory::new(root.path())),
            fetcher: Arc::new(MemoryFetcher::new()),
            install: InstallOptions::default(),
            store: None,
            work_dir: work.path().to_path_buf(),
        });
        let worker = spawn_worker(0, context, events_tx).unwrap();
        let config = Config::defaults().with("ENTRY_POINT", "/www/public/front.php");
        worker
            .commands
            .send(WorkerCommand::Load {
                image: Bytes::from_static(b"#!/bin/sh\ncat\n"),
                config: Arc::new(config),
            })
            .unwrap();
        worker
            .commands
            .send(WorkerCommand::RunRequest {
                id: TaskId(1),
                request: RequestDescriptor::get("/hello"),
            })
            .unwrap();

        assert!(matches!(next(&mut events).await, WorkerEvent::Ready { .. }));
        let WorkerEvent::Result { result, .. } = next(&mut events).await else {
            panic!("expected a result");
        };
        let www = root.path().join("www");
        assert!(www.is_dir());
        assert!(result.contains(&format!(
            "$_SERVER['SCRIPT_FILENAME'] = '{}';",
            www.join("public/front.php").display()
        )));
        assert!(result.contains(&format!("$_SERVER['DOCUMENT_ROOT'] = '{}';", www.display())));
        let bin = std::fs::read_dir(work.path().join("bin")).unwrap().next().unwrap().unwrap();
        assert_ne!(bin.metadata().unwrap().permissions().mode() & 0o111, 0);
    }
}
