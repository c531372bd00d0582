//! Short-lived workers used during `init`: the install worker and the
//! background warm-up worker.

use std::sync::Arc;

use bytes::Bytes;
use install::InstallOutcome;
use runtime_core::{Config, RuntimeError};
use tokio::sync::mpsc;

use crate::message::{WorkerCommand, WorkerEvent};
use crate::worker::{SETUP_WORKER, WorkerContext, spawn_worker};

/// Boot a throwaway worker, install the application tree through it, then
/// let it exit. This is the only place installation happens.
pub async fn install_once(
    context: Arc<WorkerContext>,
    image: Bytes,
    config: Arc<Config>,
) -> Result<InstallOutcome, RuntimeError> {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let worker = spawn_worker(SETUP_WORKER, context, events_tx)
        .map_err(|err| RuntimeError::Engine(format!("spawning install worker: {}", err)))?;
    let commands = worker.commands;
    let _ = commands.send(WorkerCommand::Load { image, config });

    let outcome = loop {
        match events.recv().await {
            Some(WorkerEvent::Ready { .. }) => {
                let _ = commands.send(WorkerCommand::Install);
            }
            Some(WorkerEvent::LoadFailed { reason, .. }) => break Err(RuntimeError::Engine(reason)),
            Some(WorkerEvent::InstallComplete { outcome, .. }) => break Ok(outcome),
            Some(WorkerEvent::InstallFailed { error, .. }) => break Err(RuntimeError::from(error)),
            Some(WorkerEvent::Result { .. }) => {}
            Some(WorkerEvent::Exited { .. }) | None => {
                break Err(RuntimeError::Installation(
                    "install worker exited before finishing".to_string(),
                ));
            }
        }
    };
    let _ = commands.send(WorkerCommand::Shutdown);
    match &outcome {
        Ok(outcome) => tracing::info!("installation complete: {:?}", outcome),
        Err(err) => tracing::error!("installation failed: {}", err),
    }
    outcome
}

/// Boot a worker in the background and call `on_ready` once its engine is
/// up. The worker exits afterwards. Failures are logged, never returned.
pub fn prewarm<F>(
    context: Arc<WorkerContext>,
    image: Bytes,
    config: Arc<Config>,
    on_ready: F,
) -> tokio::task::JoinHandle<bool>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let worker = match spawn_worker(SETUP_WORKER, context, events_tx) {
            Ok(worker) => worker,
            Err(err) => {
                tracing::warn!("warm-up worker did not start: {}", err);
                return false;
            }
        };
        let _ = worker.commands.send(WorkerCommand::Load { image, config });
        let warmed = loop {
            match events.recv().await {
                Some(WorkerEvent::Ready { .. }) => break true,
                Some(WorkerEvent::LoadFailed { reason, .. }) => {
                    tracing::warn!("warm-up worker failed to load: {}", reason);
                    break false;
                }
                Some(WorkerEvent::Exited { .. }) | None => break false,
                Some(_) => {}
            }
        };
        let _ = worker.commands.send(WorkerCommand::Shutdown);
        if warmed {
            on_ready();
            tracing::debug!("warm-up worker finished");
        }
        warmed
    })
}
