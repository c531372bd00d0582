use std::collections::{HashMap, VecDeque};

use runtime_core::{RuntimeError, TaskId};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::message::TaskPayload;

pub(crate) type Reply = oneshot::Sender<Result<String, RuntimeError>>;

#[derive(Debug)]
pub(crate) struct Task {
    pub id: TaskId,
    pub payload: TaskPayload,
    pub reply: Reply,
    /// Cancelled by the caller when it stops waiting.
    pub cancel: CancellationToken,
    pub created_at: Instant,
    pub assigned: Option<usize>,
}

/// Outstanding tasks keyed by id, plus a FIFO of the ones not yet assigned.
#[derive(Debug, Default)]
pub(crate) struct TaskTable {
    tasks: HashMap<TaskId, Task>,
    unassigned: VecDeque<TaskId>,
}

impl TaskTable {
    pub fn insert(&mut self, task: Task) {
        self.unassigned.push_back(task.id);
        self.tasks.insert(task.id, task);
    }

    /// Oldest unassigned task the caller still waits for. Tasks whose caller
    /// gave up before dispatch are dropped on the way.
    pub fn next_unassigned(&mut self) -> Option<TaskId> {
        while let Some(id) = self.unassigned.pop_front() {
            match self.tasks.get(&id) {
                Some(task) if task.assigned.is_none() && !task.cancel.is_cancelled() => {
                    return Some(id);
                }
                Some(task) if task.assigned.is_none() => {
                    tracing::debug!("task {} abandoned before dispatch", id);
                    self.tasks.remove(&id);
                }
                _ => {}
            }
        }
        None
    }

    /// Mark `id` as running on `worker`. Refuses a second assignment.
    pub fn assign(&mut self, id: TaskId, worker: usize) -> Option<&Task> {
        let task = self.tasks.get_mut(&id)?;
        if task.assigned.is_some() {
            return None;
        }
        task.assigned = Some(worker);
        Some(task)
    }

    /// Undo an assignment whose send failed; the task goes back to the front.
    pub fn requeue_front(&mut self, id: TaskId) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.assigned = None;
            self.unassigned.push_front(id);
        }
    }

    pub fn complete(&mut self, id: TaskId) -> Option<Task> {
        self.tasks.remove(&id)
    }

    pub fn take_assigned_to(&mut self, worker: usize) -> Vec<Task> {
        let ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|task| task.assigned == Some(worker))
            .map(|task| task.id)
            .collect();
        ids.into_iter().filter_map(|id| self.tasks.remove(&id)).collect()
    }

    pub fn drain(&mut self) -> Vec<Task> {
        self.unassigned.clear();
        self.tasks.drain().map(|(_, task)| task).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn unassigned_len(&self) -> usize {
        self.unassigned.len()
    }
}
