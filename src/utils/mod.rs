pub mod progress;
pub mod retry;

pub use progress::{ProgressSender, ProgressStream, TransferProgress, format_bytes};
pub use retry::{RetryPolicy, sleep_or_cancel};
