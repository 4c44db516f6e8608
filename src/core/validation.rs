use crate::utils::format_bytes;
use super::types::FilePayload;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";

/// 10 MiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Pre-flight checks applied on submission. A rejected file never reaches the network.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub allowed_mime_types: Vec<String>,
    pub max_file_size: u64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            allowed_mime_types: vec![MIME_PDF.into(), MIME_DOCX.into(), MIME_TEXT.into()],
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl ValidationPolicy {
    /// Returns the user-facing rejection reason, if any.
    pub fn validate(&self, payload: &FilePayload) -> Option<String> {
        if !self.allowed_mime_types.iter().any(|m| m == &payload.mime_type) {
            return Some("Unsupported file type".to_string());
        }

        if payload.size > self.max_file_size {
            return Some(format!("File exceeds {}", format_bytes(self.max_file_size)));
        }

        None
    }
}
