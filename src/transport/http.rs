use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tracing::debug;
use crate::config::Config;
use crate::core::{Result, UploadError};
use crate::utils::{ProgressSender, ProgressStream};
use super::{ApiRequest, ApiResponse, RequestBody, Transport};

/// 上传体按块切分，块越小进度越细
const BODY_CHUNK_SIZE: usize = 64 * 1024;

/// reqwest-backed transport; upload bodies are streamed so progress follows the bytes actually sent.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client })
    }

    fn chunked(content: Bytes) -> Vec<std::io::Result<Bytes>> {
        (0..content.len())
            .step_by(BODY_CHUNK_SIZE)
            .map(|start| {
                let end = usize::min(start + BODY_CHUNK_SIZE, content.len());
                Ok(content.slice(start..end))
            })
            .collect()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: ApiRequest, progress: Option<ProgressSender>) -> Result<ApiResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());

        builder = match request.body {
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart { field, filename, mime_type, content } => {
                let total = content.len() as u64;
                let stream = ProgressStream::new(stream::iter(Self::chunked(content)), total, progress);
                let part = Part::stream_with_length(Body::wrap_stream(stream), total)
                    .file_name(filename)
                    .mime_str(&mime_type)?;
                builder.multipart(Form::new().part(field, part))
            }
        };

        // 连接层面的失败没有状态码，统一归为 Network
        let response = builder
            .send()
            .await
            .map_err(|err| UploadError::network(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| UploadError::network(err.to_string()))?;

        debug!(url = %request.url, status, "Request finished");
        Ok(ApiResponse::new(status, body))
    }
}
