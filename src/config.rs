use std::fs;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use url::Url;
use crate::core::validation::{DEFAULT_MAX_FILE_SIZE, MIME_DOCX, MIME_PDF, MIME_TEXT, ValidationPolicy};
use crate::core::{Result, UploadError};
use crate::utils::RetryPolicy;

#[derive(Deserialize, Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    /// API root, e.g. `https://docs.example.com/api`
    pub base_url: String,
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub max_file_size: u64,
    pub allowed_mime_types: Vec<String>,
    pub request_timeout_secs: u64,
    pub credentials: Option<Credentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            max_concurrency: 3,
            max_retries: 2,
            base_retry_delay_ms: 1000,
            max_retry_delay_ms: 60_000,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_mime_types: vec![MIME_PDF.into(), MIME_DOCX.into(), MIME_TEXT.into()],
            request_timeout_secs: 300,
            credentials: None,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config_str = fs::read_to_string(path)?;
        Self::from_toml_str(&config_str)
    }

    pub fn from_toml_str(s: &str) -> Result<Config> {
        let config: Config = toml::from_str(s).map_err(|err| UploadError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(UploadError::Config("max_concurrency must be at least 1".to_string()));
        }
        Url::parse(&self.base_url)
            .map_err(|err| UploadError::Config(format!("Invalid base_url {:?}: {}", self.base_url, err)))?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn upload_url(&self) -> String {
        self.endpoint("upload")
    }

    pub fn login_url(&self) -> String {
        self.endpoint("auth/login")
    }

    pub fn refresh_url(&self) -> String {
        self.endpoint("auth/refresh")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial: Duration::from_millis(self.base_retry_delay_ms),
            multiplier: 2.0,
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            allowed_mime_types: self.allowed_mime_types.clone(),
            max_file_size: self.max_file_size,
        }
    }
}
