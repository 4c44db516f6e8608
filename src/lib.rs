pub mod auth;
pub mod config;
pub mod core;
pub mod notify;
pub mod transport;
pub mod utils;

pub use auth::{AuthGate, AuthTokens, MemoryTokenStore, TokenStore};
pub use config::Config;
pub use core::{
    FilePayload,
    RefreshError,
    Result,
    TaskSnapshot,
    UploadError,
    UploadId,
    UploadManager,
    UploadManagerHandle,
    UploadStatus,
    UploadTask,
};
pub use notify::{Notifier, TracingNotifier};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
