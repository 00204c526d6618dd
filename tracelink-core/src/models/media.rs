use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::MediaError;

pub const MEDIA_REFERENCE_PREFIX: &str = "@media/";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A binary payload referenced from trace data. Two payloads with the same
/// bytes share a `content_hash` and are the same media for dedup purposes.
#[derive(Debug, Clone, Serialize)]
pub struct MediaContent {
    pub id: Uuid,
    #[serde(skip)]
    pub data: Bytes,
    pub content_hash: String,
    pub byte_length: usize,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

impl MediaContent {
    pub fn from_bytes(
        data: impl Into<Bytes>,
        content_type: &str,
        file_name: Option<String>,
    ) -> Self {
        let data = data.into();
        let mime_type = if content_type.is_empty() {
            DEFAULT_CONTENT_TYPE.to_string()
        } else {
            content_type.to_string()
        };

        Self {
            id: Uuid::new_v4(),
            content_hash: content_hash(&data),
            byte_length: data.len(),
            data,
            mime_type,
            file_name,
            reference_id: None,
        }
    }

    /// Parse `data:[<mediatype>][;base64],<data>`.
    pub fn from_data_uri(uri: &str) -> Result<Self, MediaError> {
        let rest = uri.strip_prefix("data:").ok_or(MediaError::InvalidDataUri)?;
        let (mime_info, encoded) = rest.split_once(',').ok_or(MediaError::InvalidDataUri)?;

        let mut content_type = "text/plain";
        let mut is_base64 = false;
        if !mime_info.is_empty() {
            let mut parts = mime_info.split(';');
            if let Some(first) = parts.next() {
                if !first.is_empty() {
                    content_type = first;
                }
            }
            is_base64 = parts.any(|p| p == "base64");
        }

        let data = if is_base64 {
            STANDARD
                .decode(encoded)
                .map_err(|e| MediaError::InvalidBase64(e.to_string()))?
        } else {
            encoded.as_bytes().to_vec()
        };

        Ok(Self::from_bytes(data, content_type, None))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MediaError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| MediaError::Read(e.to_string()))?;
        let content_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(content_type_for_extension)
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string);

        Ok(Self::from_bytes(data, content_type, file_name))
    }

    /// `@media/<reference>` once uploaded, `@media/<id>` before.
    pub fn reference_string(&self) -> String {
        match &self.reference_id {
            Some(reference) => format!("{MEDIA_REFERENCE_PREFIX}{reference}"),
            None => format!("{MEDIA_REFERENCE_PREFIX}{}", self.id),
        }
    }
}

/// Lowercase hex SHA-256 of the payload.
pub fn content_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

pub fn is_media_reference(s: &str) -> bool {
    s.starts_with(MEDIA_REFERENCE_PREFIX)
}

pub fn parse_media_reference(s: &str) -> Option<&str> {
    s.strip_prefix(MEDIA_REFERENCE_PREFIX)
}

fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
