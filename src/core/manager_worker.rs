use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use crate::auth::AuthGate;
use crate::utils::RetryPolicy;
use super::errors::UploadError;
use super::executor::TaskExecutor;
use super::scheduler::UploadScheduler;
use super::store::TaskStore;
use super::types::{
    ExecutorEvent, ExecutorEventKind, FilePayload, ManagerCommand, UploadId, UploadStatus, UploadTask,
};
use super::validation::ValidationPolicy;

/// Everything the worker needs besides its channels.
pub(crate) struct WorkerContext {
    pub gate: AuthGate,
    pub upload_url: String,
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    pub validation: ValidationPolicy,
}

/// Owns the task store and the scheduler. All mutations happen on this one task,
/// so no two state transitions ever interleave.
pub(crate) struct UploadManagerWorker {
    store: TaskStore,
    scheduler: UploadScheduler,
    gate: AuthGate,
    upload_url: String,
    retry: RetryPolicy,
    validation: ValidationPolicy,

    event_tx: mpsc::UnboundedSender<ExecutorEvent>,
    event_rx: mpsc::UnboundedReceiver<ExecutorEvent>,
}

impl UploadManagerWorker {
    pub(crate) async fn run(context: WorkerContext, mut command_rx: mpsc::Receiver<ManagerCommand>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut worker = Self {
            store: TaskStore::new(),
            scheduler: UploadScheduler::new(context.max_concurrency),
            gate: context.gate,
            upload_url: context.upload_url,
            retry: context.retry,
            validation: context.validation,
            event_tx,
            event_rx,
        };

        // 主事件循环，所有句柄都被丢弃后退出
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => worker.handle_command(command),
                    None => break,
                },
                Some(event) = worker.event_rx.recv() => {
                    worker.handle_event(event);
                }
            }

            worker.process_queue();
        }

        worker.scheduler.cancel_all();
        info!("Upload manager stopped");
    }

    fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Submit { files, reply } => {
                let ids = files.into_iter().map(|file| self.submit(file)).collect();
                let _ = reply.send(ids);
            }
            ManagerCommand::Cancel { upload_id, reply } => {
                self.cancel(upload_id);
                let _ = reply.send(());
            }
            ManagerCommand::CancelAll { reply } => {
                self.cancel_all();
                let _ = reply.send(());
            }
            ManagerCommand::Retry { upload_id, reply } => {
                self.retry(upload_id);
                let _ = reply.send(());
            }
            ManagerCommand::ClearAll { reply } => {
                self.scheduler.cancel_all();
                self.store.clear();
                info!("Cleared all tasks");
                let _ = reply.send(());
            }
            ManagerCommand::GetTask { upload_id, reply } => {
                let _ = reply.send(self.store.get(&upload_id).cloned());
            }
            ManagerCommand::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
            ManagerCommand::Subscribe { reply } => {
                let _ = reply.send(self.store.subscribe());
            }
        }
    }

    fn submit(&mut self, file: FilePayload) -> UploadId {
        let rejection = self.validation.validate(&file);
        let id = self.store.insert(UploadTask::new(file));

        match rejection {
            Some(reason) => {
                info!(upload_id = %id, %reason, "Rejected file");
                let error = UploadError::Validation(reason).to_string();
                self.store.transition(&id, UploadStatus::Failed, |t| t.error = Some(error));
            }
            None => {
                self.store.transition(&id, UploadStatus::Queued, |_| {});
                self.scheduler.enqueue(id);
                debug!(upload_id = %id, queued = self.scheduler.queued_count(), "Queued upload");
            }
        }
        id
    }

    fn cancel(&mut self, id: UploadId) {
        let Some(status) = self.store.get(&id).map(|t| t.status) else {
            return;
        };
        if !status.is_active() {
            return;
        }

        self.scheduler.remove_queued(&id);
        self.scheduler.release(&id);
        self.store.invalidate(&id);
        self.mark_canceled(&id);
        info!(upload_id = %id, ?status, "Canceled upload");
    }

    fn cancel_all(&mut self) {
        // 先触发共享信号：进行中的请求和退避计时器都会立刻停下
        self.scheduler.cancel_all();

        let active = self.store.ids_with_status(|s| s.is_active());
        for id in &active {
            self.store.invalidate(id);
            self.mark_canceled(id);
        }
        info!(count = active.len(), "Canceled all uploads");
    }

    fn retry(&mut self, id: UploadId) {
        let Some(status) = self.store.get(&id).map(|t| t.status) else {
            return;
        };
        if !matches!(status, UploadStatus::Failed | UploadStatus::Canceled) {
            return;
        }

        self.store.invalidate(&id);
        self.store.transition(&id, UploadStatus::Queued, |t| {
            t.attempts = 0;
            t.progress = 0;
            t.error = None;
            t.started_at = None;
            t.finished_at = None;
        });
        self.scheduler.enqueue(id);
        info!(upload_id = %id, "Retrying upload");
    }

    fn mark_canceled(&mut self, id: &UploadId) {
        let error = UploadError::Canceled.to_string();
        self.store.transition(id, UploadStatus::Canceled, |t| t.error = Some(error));
    }

    /// Starts queued tasks while slots are free.
    fn process_queue(&mut self) {
        while let Some(id) = self.scheduler.next() {
            let Some(task) = self.store.get(&id) else {
                continue;
            };
            // 取消或重试过的任务可能还留在队列里
            if task.status != UploadStatus::Queued {
                continue;
            }
            let payload = task.payload.clone();

            let token = self.scheduler.attempt_token();
            if token.is_cancelled() {
                continue;
            }

            let Some(generation) = self.store.begin_run(&id, token.clone()) else {
                continue;
            };
            self.store.transition(&id, UploadStatus::Uploading, |_| {});
            self.scheduler.occupy(id);
            debug!(upload_id = %id, generation, running = self.scheduler.running_count(), "Dispatching upload");

            let executor = TaskExecutor {
                upload_id: id,
                generation,
                payload,
                upload_url: self.upload_url.clone(),
                gate: self.gate.clone(),
                retry: self.retry.clone(),
                cancellation_token: token,
                event_tx: self.event_tx.clone(),
            };
            tokio::spawn(executor.run());
        }
    }

    fn handle_event(&mut self, event: ExecutorEvent) {
        let ExecutorEvent { upload_id: id, generation, kind } = event;

        if !self.store.is_current(&id, generation) {
            debug!(upload_id = %id, generation, ?kind, "Discarding stale executor event");
            return;
        }
        let Some(task) = self.store.get(&id) else {
            return;
        };
        if task.status != UploadStatus::Uploading {
            warn!(upload_id = %id, status = ?task.status, ?kind, "Executor event for task that is not uploading");
            return;
        }

        match kind {
            ExecutorEventKind::AttemptStarted { attempt } => {
                self.store.update(&id, |t| {
                    t.attempts = attempt;
                    t.progress = 0;
                });
            }
            ExecutorEventKind::Progress { attempt, percent } => {
                if task.attempts == attempt && percent > task.progress {
                    self.store.update(&id, |t| t.progress = percent);
                }
            }
            ExecutorEventKind::BackingOff { attempt, delay } => {
                debug!(upload_id = %id, attempt, delay_ms = delay.as_millis() as u64, "Waiting before next attempt");
            }
            ExecutorEventKind::Completed => {
                self.finish(&id, generation);
                self.store.transition(&id, UploadStatus::Completed, |t| {
                    t.progress = 100;
                    t.error = None;
                });
            }
            ExecutorEventKind::Failed { error } => {
                self.finish(&id, generation);
                self.store.transition(&id, UploadStatus::Failed, |t| t.error = Some(error));
            }
        }
    }

    fn finish(&mut self, id: &UploadId, generation: u64) {
        self.store.end_run(id, generation);
        self.scheduler.release(id);
    }
}
