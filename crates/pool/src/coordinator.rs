use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use runtime_core::{Config, RequestDescriptor, RuntimeError, TaskId};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::message::{TaskPayload, WorkerCommand, WorkerEvent};
use crate::table::{Task, TaskTable};
use crate::worker::{WorkerContext, spawn_worker};

/// Task ids are unique across every pool in the process.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

enum Call {
    Submit(Task),
    Shutdown { done: oneshot::Sender<()> },
}

/// Caller-facing handle to a running coordinator. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Pool {
    calls: mpsc::UnboundedSender<Call>,
    workers: usize,
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Call::Submit(task) => write!(f, "Submit({})", task.id),
            Call::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl Pool {
    /// Start `NUM_WORKERS` workers, each loading `image`, and the coordinator
    /// task that feeds them. Must be called inside a tokio runtime.
    pub fn spawn(
        context: Arc<WorkerContext>,
        image: Bytes,
        config: Arc<Config>,
    ) -> Result<Self, RuntimeError> {
        let num_workers = config.num_workers()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut links = Vec::with_capacity(num_workers);
        let mut threads = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let worker = spawn_worker(index, Arc::clone(&context), events_tx.clone())
                .map_err(|err| RuntimeError::Engine(format!("spawning worker {}: {}", index, err)))?;
            // The worker answers with Ready; until then it stays unavailable.
            let _ = worker.commands.send(WorkerCommand::Load {
                image: image.clone(),
                config: Arc::clone(&config),
            });
            links.push(worker.commands);
            threads.push(worker.join);
        }
        tracing::info!("spawned {} workers", num_workers);
        Ok(Self::start(links, events_rx, threads))
    }

    /// Drive already-connected workers. Each link's index is its position.
    pub fn start(
        links: Vec<mpsc::UnboundedSender<WorkerCommand>>,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        threads: Vec<JoinHandle<()>>,
    ) -> Self {
        let workers = links.len();
        let (calls, calls_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator {
            table: TaskTable::default(),
            workers: links
                .into_iter()
                .map(|commands| WorkerSlot {
                    commands,
                    available: false,
                    alive: true,
                })
                .collect(),
            threads,
        };
        tokio::spawn(coordinator.run(calls_rx, events));
        Self { calls, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub async fn run_inline(&self, code: impl Into<String>, timeout: Duration) -> Result<String, RuntimeError> {
        self.submit(TaskPayload::Inline(code.into()), timeout).await
    }

    pub async fn run_request(
        &self,
        request: RequestDescriptor,
        timeout: Duration,
    ) -> Result<String, RuntimeError> {
        self.submit(TaskPayload::Request(request), timeout).await
    }

    /// Enqueue and wait at most `timeout`. Giving up does not stop a worker
    /// that already runs the task; its result is dropped when it arrives.
    pub async fn submit(&self, payload: TaskPayload, timeout: Duration) -> Result<String, RuntimeError> {
        let id = TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed));
        let (reply, response) = oneshot::channel();
        let cancel = CancellationToken::new();
        let task = Task {
            id,
            payload,
            reply,
            cancel: cancel.clone(),
            created_at: Instant::now(),
            assigned: None,
        };
        self.calls
            .send(Call::Submit(task))
            .map_err(|_| RuntimeError::Shutdown)?;

        tokio::select! {
            result = response => result.unwrap_or(Err(RuntimeError::Shutdown)),
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                tracing::debug!("task {} timed out after {:?}", id, timeout);
                Err(RuntimeError::Timeout { id, after: timeout })
            }
        }
    }

    /// Stop the coordinator and tell every worker to exit. Pending callers
    /// get `Shutdown`. Workers busy with a task exit once it finishes.
    pub async fn shutdown(&self) {
        let (done, wait) = oneshot::channel();
        if self.calls.send(Call::Shutdown { done }).is_ok() {
            let _ = wait.await;
        }
    }
}

#[derive(Debug)]
struct WorkerSlot {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    /// Holds no task and has reported ready.
    available: bool,
    alive: bool,
}

struct Coordinator {
    table: TaskTable,
    workers: Vec<WorkerSlot>,
    threads: Vec<JoinHandle<()>>,
}

impl Coordinator {
    async fn run(
        mut self,
        mut calls: mpsc::UnboundedReceiver<Call>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        loop {
            tokio::select! {
                call = calls.recv() => match call {
                    Some(Call::Submit(task)) => {
                        tracing::debug!("queued {} task {}", task.payload.kind(), task.id);
                        self.table.insert(task);
                        self.dispatch();
                    }
                    Some(Call::Shutdown { done }) => {
                        self.stop();
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        self.stop();
                        return;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Ready { worker } => {
                self.set_available(worker);
                self.dispatch();
            }
            WorkerEvent::Result { worker, id, result } => {
                match self.table.complete(id) {
                    Some(task) if task.cancel.is_cancelled() => {
                        tracing::warn!("discarding late result for task {}", id);
                    }
                    Some(task) => {
                        tracing::debug!(
                            "task {} done on worker {} in {:?}",
                            id,
                            worker,
                            task.created_at.elapsed()
                        );
                        if task.reply.send(Ok(result)).is_err() {
                            tracing::warn!("caller of task {} went away", id);
                        }
                    }
                    None => tracing::warn!("discarding result for unknown task {}", id),
                }
                self.set_available(worker);
                self.dispatch();
            }
            WorkerEvent::LoadFailed { worker, reason } => {
                tracing::error!("worker {} will not take tasks: {}", worker, reason);
            }
            WorkerEvent::Exited { worker } => {
                if let Some(slot) = self.workers.get_mut(worker) {
                    slot.available = false;
                    slot.alive = false;
                }
                for task in self.table.take_assigned_to(worker) {
                    tracing::warn!("worker {} exited while running task {}", worker, task.id);
                    let _ = task.reply.send(Err(RuntimeError::WorkerLost(worker)));
                }
            }
            WorkerEvent::InstallComplete { worker, .. } | WorkerEvent::InstallFailed { worker, .. } => {
                tracing::debug!("ignoring install report from pool worker {}", worker);
            }
        }
    }

    fn set_available(&mut self, worker: usize) {
        if let Some(slot) = self.workers.get_mut(worker) {
            if slot.alive {
                slot.available = true;
            }
        }
    }

    /// Pair every available worker with the oldest unassigned task.
    fn dispatch(&mut self) {
        for index in 0..self.workers.len() {
            if !self.workers[index].available {
                continue;
            }
            let Some(id) = self.table.next_unassigned() else {
                return;
            };
            let Some(task) = self.table.assign(id, index) else {
                continue;
            };
            let command = task.payload.clone().into_command(id);
            let slot = &mut self.workers[index];
            slot.available = false;
            if slot.commands.send(command).is_err() {
                tracing::warn!("worker {} is gone; requeueing task {}", index, id);
                slot.alive = false;
                self.table.requeue_front(id);
                continue;
            }
            tracing::debug!("dispatched task {} to worker {}", id, index);
        }
    }

    fn stop(&mut self) {
        for slot in &self.workers {
            let _ = slot.commands.send(WorkerCommand::Shutdown);
        }
        for task in self.table.drain() {
            let _ = task.reply.send(Err(RuntimeError::Shutdown));
        }
        tracing::debug!(
            "coordinator stopped; {} worker threads detached",
            self.threads.drain(..).count()
        );
    }
}
