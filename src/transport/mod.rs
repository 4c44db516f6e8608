mod http;

pub use http::HttpTransport;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use crate::core::{FilePayload, Result, UploadError};
use crate::utils::ProgressSender;

/// Multipart field name the upload endpoint expects.
pub const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Multipart {
        field: String,
        filename: String,
        mime_type: String,
        content: Bytes,
    },
}

/// A request that can be replayed: every part is cheap to clone.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn post_json<T: Serialize>(url: impl Into<String>, body: &T) -> Result<Self> {
        Ok(Self {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Json(serde_json::to_value(body)?),
        })
    }

    pub fn upload(url: impl Into<String>, payload: &FilePayload) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Multipart {
                field: UPLOAD_FIELD.to_string(),
                filename: payload.filename.clone(),
                mime_type: payload.mime_type.clone(),
                content: payload.content.clone(),
            },
        }
    }

    /// Clone of this request carrying `Authorization: Bearer <token>`.
    pub fn with_bearer(&self, token: &str) -> Result<Self> {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| UploadError::internal("Invalid token format"))?;
        let mut request = self.clone();
        request.headers.insert(AUTHORIZATION, value);
        Ok(request)
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Any 2xx passes; everything else becomes a classified [`UploadError`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(UploadError::from_status(self.status, &self.body))
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Performs one network call.
///
/// A response with any status code is `Ok`; `Err` is reserved for failures
/// that never produced a status (connection refused, timeout, broken body).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: ApiRequest, progress: Option<ProgressSender>) -> Result<ApiResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_result() {
        assert!(ApiResponse::new(204, Bytes::new()).into_result().is_ok());
        let err = ApiResponse::new(503, Bytes::new()).into_result().unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.is_retriable());
    }

    #[test]
    fn test_with_bearer_keeps_original_untouched() {
        let request = ApiRequest::post_json("http://localhost/api/x", &serde_json::json!({})).unwrap();
        let authed = request.with_bearer("abc").unwrap();

        assert_eq!(authed.bearer_token(), Some("abc"));
        assert_eq!(request.bearer_token(), None);
    }
}
