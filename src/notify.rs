//! Transient user notifications for failed requests.

use tracing::{info, warn};
use crate::core::{RefreshError, UploadError};

pub trait Notifier: Send + Sync {
    fn error(&self, message: &str);

    fn info(&self, message: &str);
}

/// Routes notifications into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn error(&self, message: &str) {
        warn!(target: "docport::notify", "{}", message);
    }

    fn info(&self, message: &str) {
        info!(target: "docport::notify", "{}", message);
    }
}

/// Message to show for a request's final error, if any.
///
/// 401 never notifies: an expired session is handled by the refresh flow.
/// Cancellation and local failures are not request errors.
pub fn notification_for(err: &UploadError) -> Option<String> {
    let status = match err {
        UploadError::Network(_) | UploadError::RefreshFailed(RefreshError::Network(_)) => 0,
        UploadError::Http(e) => e.status().map_or(0, |s| s.as_u16()),
        UploadError::Server { status, .. } | UploadError::Client { status, .. } => *status,
        UploadError::RefreshFailed(RefreshError::Rejected { status }) => *status,
        _ => return None,
    };

    match status {
        0 => Some("Network error, please check connectivity.".to_string()),
        401 => None,
        403 => Some("You do not have permission to perform this action.".to_string()),
        s if s >= 500 => Some("Server error, try again later.".to_string()),
        _ => match err {
            UploadError::Client { message, .. } if !message.is_empty() => Some(message.clone()),
            _ => Some("Request failed".to_string()),
        },
    }
}
