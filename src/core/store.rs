use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use super::types::{TaskSnapshot, UploadId, UploadStatus, UploadTask};

/// The handle of the attempt run that currently owns a task.
struct ActiveRun {
    generation: u64,
    token: CancellationToken,
}

struct TaskEntry {
    task: UploadTask,
    /// Bumped on every dispatch, cancel and retry; stale executor events carry an older value.
    generation: u64,
    run: Option<ActiveRun>,
}

/// Owns the ordered task collection and pushes a snapshot to every subscriber on each mutation.
#[derive(Default)]
pub(crate) struct TaskStore {
    tasks: HashMap<UploadId, TaskEntry>,
    order: Vec<UploadId>,
    subscribers: Vec<mpsc::UnboundedSender<TaskSnapshot>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: UploadTask) -> UploadId {
        let id = task.id;
        self.order.push(id);
        self.tasks.insert(id, TaskEntry { task, generation: 0, run: None });
        self.publish();
        id
    }

    pub fn get(&self, id: &UploadId) -> Option<&UploadTask> {
        self.tasks.get(id).map(|e| &e.task)
    }

    pub fn generation(&self, id: &UploadId) -> Option<u64> {
        self.tasks.get(id).map(|e| e.generation)
    }

    pub fn is_current(&self, id: &UploadId, generation: u64) -> bool {
        self.generation(id) == Some(generation)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn ids_with_status(&self, pred: impl Fn(UploadStatus) -> bool) -> Vec<UploadId> {
        self.order
            .iter()
            .filter(|id| self.tasks.get(id).is_some_and(|e| pred(e.task.status)))
            .copied()
            .collect()
    }

    /// Applies `f` and publishes, rejecting moves the state machine does not allow.
    pub fn transition<F>(&mut self, id: &UploadId, to: UploadStatus, f: F) -> bool
    where
        F: FnOnce(&mut UploadTask),
    {
        let Some(entry) = self.tasks.get_mut(id) else {
            return false;
        };

        let from = entry.task.status;
        if !UploadTask::is_valid_transition(from, to) {
            warn!(upload_id = %id, ?from, ?to, "Rejected invalid state transition");
            return false;
        }

        entry.task.status = to;
        match to {
            UploadStatus::Uploading if from != UploadStatus::Uploading => {
                entry.task.started_at = Some(Utc::now());
                entry.task.finished_at = None;
            }
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Canceled => {
                entry.task.finished_at = Some(Utc::now());
            }
            _ => {}
        }
        f(&mut entry.task);

        debug!(upload_id = %id, ?from, ?to, "Task state changed");
        self.publish();
        true
    }

    /// Mutates a task without changing its status.
    pub fn update<F>(&mut self, id: &UploadId, f: F) -> bool
    where
        F: FnOnce(&mut UploadTask),
    {
        match self.tasks.get_mut(id) {
            Some(entry) => {
                f(&mut entry.task);
                self.publish();
                true
            }
            None => false,
        }
    }

    /// Starts a new attempt run: bumps the generation and binds `token` to it.
    pub fn begin_run(&mut self, id: &UploadId, token: CancellationToken) -> Option<u64> {
        let entry = self.tasks.get_mut(id)?;
        entry.generation += 1;
        entry.run = Some(ActiveRun { generation: entry.generation, token });
        Some(entry.generation)
    }

    /// Invalidates whatever run is in flight and triggers its cancellation token.
    pub fn invalidate(&mut self, id: &UploadId) {
        if let Some(entry) = self.tasks.get_mut(id) {
            if let Some(run) = entry.run.take() {
                // 只取消与当前代次绑定的句柄
                if run.generation == entry.generation {
                    run.token.cancel();
                }
            }
            entry.generation += 1;
        }
    }

    /// Drops the run handle once its executor has reported a terminal outcome.
    pub fn end_run(&mut self, id: &UploadId, generation: u64) {
        if let Some(entry) = self.tasks.get_mut(id) {
            if entry.run.as_ref().is_some_and(|r| r.generation == generation) {
                entry.run = None;
            }
        }
    }

    pub fn clear(&mut self) {
        for entry in self.tasks.values_mut() {
            if let Some(run) = entry.run.take() {
                run.token.cancel();
            }
        }
        self.tasks.clear();
        self.order.clear();
        self.publish();
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        Arc::new(
            self.order
                .iter()
                .filter_map(|id| self.tasks.get(id))
                .map(|e| e.task.clone())
                .collect(),
        )
    }

    /// New subscribers get the current snapshot first, then every later one in order.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TaskSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(self.snapshot());
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }

        let snapshot = self.snapshot();
        self.subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }
}
