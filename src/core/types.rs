use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// 上传任务唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// 刚创建，尚未校验
    Pending,
    /// 在队列中等待空闲槽位
    Queued,
    /// 上传中（包括重试前的退避等待）
    Uploading,
    Completed,
    Failed,
    Canceled,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Queued | Self::Uploading)
    }
}

/// A file handed to [`submit`](crate::UploadManager::submit).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FilePayload {
    pub filename: String,
    pub mime_type: String,
    /// Declared size, checked by validation before anything touches the network.
    pub size: u64,
    #[serde(skip)]
    pub content: Bytes,
}

impl FilePayload {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            size: content.len() as u64,
            content,
        }
    }

    pub fn with_declared_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    pub id: UploadId,
    pub payload: FilePayload,
    pub status: UploadStatus,
    /// 0..=100, only reset when an attempt starts
    pub progress: u8,
    /// Index of the current automatic attempt.
    pub attempts: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadTask {
    pub fn new(payload: FilePayload) -> Self {
        Self {
            id: UploadId::new(),
            payload,
            status: UploadStatus::Pending,
            progress: 0,
            attempts: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_valid_transition(from: UploadStatus, to: UploadStatus) -> bool {
        use UploadStatus::*;

        matches!(
            (from, to),
            (Pending, Queued)
                | (Pending, Failed)
                | (Pending, Canceled)
                | (Queued, Uploading)
                | (Queued, Canceled)
                | (Uploading, Uploading)
                | (Uploading, Completed)
                | (Uploading, Failed)
                | (Uploading, Canceled)
                | (Failed, Queued)
                | (Canceled, Queued)
        )
    }
}

/// Immutable, insertion-ordered copy of every task.
pub type TaskSnapshot = Arc<Vec<UploadTask>>;

pub(crate) enum ManagerCommand {
    Submit {
        files: Vec<FilePayload>,
        reply: oneshot::Sender<Vec<UploadId>>,
    },
    Cancel {
        upload_id: UploadId,
        reply: oneshot::Sender<()>,
    },
    CancelAll {
        reply: oneshot::Sender<()>,
    },
    Retry {
        upload_id: UploadId,
        reply: oneshot::Sender<()>,
    },
    ClearAll {
        reply: oneshot::Sender<()>,
    },
    GetTask {
        upload_id: UploadId,
        reply: oneshot::Sender<Option<UploadTask>>,
    },
    Snapshot {
        reply: oneshot::Sender<TaskSnapshot>,
    },
    Subscribe {
        reply: oneshot::Sender<mpsc::UnboundedReceiver<TaskSnapshot>>,
    },
}

/// Report from a running executor. Applied only if `generation` is still current.
#[derive(Debug, Clone)]
pub(crate) struct ExecutorEvent {
    pub upload_id: UploadId,
    pub generation: u64,
    pub kind: ExecutorEventKind,
}

#[derive(Debug, Clone)]
pub(crate) enum ExecutorEventKind {
    AttemptStarted { attempt: u32 },
    Progress { attempt: u32, percent: u8 },
    BackingOff { attempt: u32, delay: Duration },
    Completed,
    Failed { error: String },
}

// 静态断言确保类型是 Send 的
const _: () = {
    fn assert_send<T: Send + Sync>() {}
    fn assert_types() {
        assert_send::<UploadTask>();
        assert_send::<TaskSnapshot>();
        assert_send::<ExecutorEvent>();
    }
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_status_transition() {
        use UploadStatus::*;

        // valid
        assert!(UploadTask::is_valid_transition(Pending, Queued));
        assert!(UploadTask::is_valid_transition(Pending, Failed));
        assert!(UploadTask::is_valid_transition(Queued, Uploading));
        assert!(UploadTask::is_valid_transition(Uploading, Uploading));
        assert!(UploadTask::is_valid_transition(Uploading, Completed));
        assert!(UploadTask::is_valid_transition(Queued, Canceled));
        assert!(UploadTask::is_valid_transition(Failed, Queued));

        // invalid
        assert!(!UploadTask::is_valid_transition(Completed, Uploading));
        assert!(!UploadTask::is_valid_transition(Canceled, Uploading));
        assert!(!UploadTask::is_valid_transition(Completed, Queued));
        assert!(!UploadTask::is_valid_transition(Queued, Completed));
        assert!(!UploadTask::is_valid_transition(Pending, Uploading));
    }

    #[test]
    fn test_upload_id_generation() {
        let id1 = UploadId::new();
        let id2 = UploadId::new();

        assert_ne!(id1, id2);
        assert_eq!(id1, id1);
        assert!(!id1.to_string().is_empty());
    }

    #[test]
    fn test_payload_declared_size() {
        let payload = FilePayload::new("a.txt", "text/plain", b"hello".to_vec());
        assert_eq!(payload.size, 5);

        let payload = payload.with_declared_size(42);
        assert_eq!(payload.size, 42);
        assert_eq!(payload.content.len(), 5);
    }
}
