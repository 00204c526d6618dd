use thiserror::Error;

#[derive(Error, Debug)]
pub enum TracelinkError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Other error: {0}")]
    Other(String),
}

/// Failures talking to the ingestion backend.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Missing media id in response")]
    MissingMediaId,
}

/// Failures in media construction and the upload pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Invalid data URI format")]
    InvalidDataUri,

    #[error("Failed to decode base64 data: {0}")]
    InvalidBase64(String),

    #[error("Failed to read file: {0}")]
    Read(String),

    #[error("Upload queue is full")]
    QueueFull,

    #[error("Uploader is shutting down")]
    ShuttingDown,

    #[error("Upload not found: {0}")]
    UnknownUpload(uuid::Uuid),

    #[error("Upload timeout")]
    Timeout,

    #[error("Upload failed: {0}")]
    UploadFailed(String),
}
