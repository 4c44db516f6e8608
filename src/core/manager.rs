use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use crate::auth::AuthGate;
use crate::config::Config;
use super::errors::{Result, UploadError};
use super::manager_worker::{UploadManagerWorker, WorkerContext};
use super::types::{FilePayload, ManagerCommand, TaskSnapshot, UploadId, UploadTask};

/// Cheap, cloneable front end of the upload worker.
#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
}

/// 上传管理器句柄 - 包含管理器和工作任务
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// Waits for the worker to stop. Other `UploadManager` clones must already be dropped.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.manager);
        self.worker_handle
            .await
            .map_err(|err| UploadError::internal(format!("Worker panic: {}", err)))
    }
}

impl UploadManager {
    pub fn new(config: &Config, gate: AuthGate) -> UploadManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(100);

        let context = WorkerContext {
            gate,
            upload_url: config.upload_url(),
            max_concurrency: config.max_concurrency,
            retry: config.retry_policy(),
            validation: config.validation_policy(),
        };
        let worker_handle = tokio::spawn(UploadManagerWorker::run(context, command_rx));

        UploadManagerHandle {
            manager: Self { command_tx },
            worker_handle,
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| UploadError::ManagerShutdown)?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)
    }

    /// Creates one task per file, in order. Files failing validation end up `failed` right away.
    pub async fn submit(&self, files: Vec<FilePayload>) -> Result<Vec<UploadId>> {
        self.request(|reply| ManagerCommand::Submit { files, reply }).await
    }

    /// No-op for unknown or finished tasks.
    pub async fn cancel(&self, upload_id: UploadId) -> Result<()> {
        self.request(|reply| ManagerCommand::Cancel { upload_id, reply }).await
    }

    /// Cancels every pending, queued and uploading task. No new attempt starts after this returns.
    pub async fn cancel_all(&self) -> Result<()> {
        self.request(|reply| ManagerCommand::CancelAll { reply }).await
    }

    /// Re-queues a failed or canceled task with a fresh retry budget.
    pub async fn retry(&self, upload_id: UploadId) -> Result<()> {
        self.request(|reply| ManagerCommand::Retry { upload_id, reply }).await
    }

    /// Cancels everything and forgets every task.
    pub async fn clear_all(&self) -> Result<()> {
        self.request(|reply| ManagerCommand::ClearAll { reply }).await
    }

    pub async fn get_task(&self, upload_id: UploadId) -> Result<Option<UploadTask>> {
        self.request(|reply| ManagerCommand::GetTask { upload_id, reply }).await
    }

    pub async fn snapshot(&self) -> Result<TaskSnapshot> {
        self.request(|reply| ManagerCommand::Snapshot { reply }).await
    }

    /// 订阅任务快照
    ///
    /// The receiver yields the current snapshot immediately, then one snapshot
    /// per mutation, in the order mutations were applied. Nothing is dropped,
    /// so a slow subscriber only costs memory.
    pub async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<TaskSnapshot>> {
        self.request(|reply| ManagerCommand::Subscribe { reply }).await
    }
}
