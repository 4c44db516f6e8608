use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    /// 本地校验失败，不会重试
    #[error("{0}")]
    Validation(String),

    /// 没有状态码的失败（连接失败、超时等）
    #[error("Network error: {0}")]
    Network(String),

    #[error("{message}")]
    Server {
        status: u16,
        message: String,
    },

    #[error("{message}")]
    Client {
        status: u16,
        message: String,
    },

    #[error("Access token expired")]
    AuthExpired,

    #[error("Canceled by user")]
    Canceled,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(#[from] RefreshError),

    #[error("HTTP error {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Manager shutdown")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome of a failed refresh. Cloned to every request parked on that refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token found")]
    MissingRefreshToken,

    #[error("No access token on refresh")]
    MissingAccessToken,

    #[error("refresh endpoint rejected the request with status {status}")]
    Rejected { status: u16 },

    #[error("{0}")]
    Network(String),
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl UploadError {
    /// Builds the error for a non-2xx response. The body may carry a JSON `message`.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        if status == 401 {
            return Self::AuthExpired;
        }

        let message = serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| format!("Request failed with status {}", status));

        if (500..600).contains(&status) {
            Self::Server { status, message }
        } else {
            Self::Client { status, message }
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Status code of the failed response, `None` for connectivity failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            Self::AuthExpired => Some(401),
            Self::RefreshFailed(RefreshError::Rejected { status }) => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// 无状态码或 5xx 可以重试，其余一律终止
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Server { .. } => true,
            Self::Http(err) => match err.status() {
                Some(status) => status.is_server_error(),
                None => true,
            },
            _ => false,
        }
    }
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(UploadError::from_status(503, b"").is_retriable());
        assert!(UploadError::from_status(500, b"").is_retriable());
        assert!(!UploadError::from_status(404, b"").is_retriable());
        assert!(!UploadError::from_status(403, b"").is_retriable());
        assert!(matches!(UploadError::from_status(401, b""), UploadError::AuthExpired));
        assert!(UploadError::network("connection refused").is_retriable());
        assert!(!UploadError::Canceled.is_retriable());
        assert!(!UploadError::Validation("Unsupported file type".into()).is_retriable());
    }

    #[test]
    fn test_message_from_body() {
        let err = UploadError::from_status(413, br#"{"message":"Payload too large"}"#);
        assert_eq!(err.to_string(), "Payload too large");
        assert_eq!(err.status(), Some(413));

        let err = UploadError::from_status(502, b"<html>bad gateway</html>");
        assert_eq!(err.to_string(), "Request failed with status 502");
    }
}
