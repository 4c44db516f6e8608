mod errors;
mod executor;
mod manager;
mod manager_worker;
mod scheduler;
mod store;
mod types;
pub mod validation;

pub use errors::{RefreshError, Result, UploadError};
pub use manager::{UploadManager, UploadManagerHandle};
pub use types::{FilePayload, TaskSnapshot, UploadId, UploadStatus, UploadTask};
pub use validation::ValidationPolicy;
