//! Sink module: delivery of trace records and media to the ingestion backend
//!
//! Provides the `Sink` and `MediaEndpoint` traits the engines talk to, plus
//! `HttpSink`, which implements both against the public ingestion API:
//! - records are buffered and posted as `{"batch": [...]}` with basic auth
//! - media is registered by hash, then the bytes are PUT to the returned URL
//!
//! No retries. Callers log and swallow every `SinkError`.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::SinkConfig;
use crate::error::SinkError;
use crate::models::{MediaContent, Observation, Trace};

const INGESTION_PATH: &str = "/api/public/ingestion";
const MEDIA_PATH: &str = "/api/public/media";

// ============================================================================
// Traits
// ============================================================================

/// A create or update for one record, keyed by the caller-supplied id.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkRecord {
    TraceCreate(Trace),
    TraceUpdate(Trace),
    ObservationCreate(Observation),
    ObservationUpdate(Observation),
}

impl SinkRecord {
    /// Wire event type. Traces are upserted, so updates reuse `trace-create`.
    pub fn ingestion_type(&self) -> &'static str {
        match self {
            SinkRecord::TraceCreate(_) | SinkRecord::TraceUpdate(_) => "trace-create",
            SinkRecord::ObservationCreate(obs) if obs.kind.is_generation() => "generation-create",
            SinkRecord::ObservationCreate(_) => "span-create",
            SinkRecord::ObservationUpdate(obs) if obs.kind.is_generation() => "generation-update",
            SinkRecord::ObservationUpdate(_) => "span-update",
        }
    }

    pub fn body(&self) -> Result<Value, serde_json::Error> {
        match self {
            SinkRecord::TraceCreate(trace) | SinkRecord::TraceUpdate(trace) => {
                serde_json::to_value(trace)
            }
            SinkRecord::ObservationCreate(obs) | SinkRecord::ObservationUpdate(obs) => {
                serde_json::to_value(obs)
            }
        }
    }
}

/// Destination for trace and observation records.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, record: SinkRecord) -> Result<(), SinkError>;

    /// Push out anything buffered.
    async fn flush(&self) -> Result<(), SinkError>;

    /// Sink name for logging.
    fn name(&self) -> &str;
}

/// Accepts raw media bytes and returns the backend's reference id.
#[async_trait]
pub trait MediaEndpoint: Send + Sync {
    async fn upload(
        &self,
        media: &MediaContent,
        trace_id: Uuid,
        observation_id: Option<Uuid>,
    ) -> Result<String, SinkError>;
}

// ============================================================================
// Wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct IngestionEvent {
    id: Uuid,
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    kind: &'static str,
    body: Value,
}

#[derive(Debug, Serialize)]
struct IngestionRequest<'a> {
    batch: &'a [IngestionEvent],
}

#[derive(Debug, Deserialize, Default)]
struct IngestionResponse {
    #[serde(default)]
    errors: Vec<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaUploadRequest<'a> {
    trace_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    observation_id: Option<Uuid>,
    content_type: &'a str,
    content_length: usize,
    sha256_hash: String,
    field: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaUploadResponse {
    media_id: Option<String>,
    upload_url: Option<String>,
}

// ============================================================================
// HttpSink
// ============================================================================

/// Batching HTTP client for the ingestion and media endpoints.
#[derive(Debug)]
pub struct HttpSink {
    client: Client,
    base_url: String,
    public_key: String,
    secret_key: String,
    batch_size: usize,
    buffer: Mutex<Vec<IngestionEvent>>,
}

impl HttpSink {
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        Self::with_base_url(config, config.host.clone())
    }

    /// Create a sink with a custom base URL (for testing / self-hosted)
    pub fn with_base_url(config: &SinkConfig, base_url: String) -> Result<Self, SinkError> {
        let (public_key, secret_key) = config.credentials().ok_or(SinkError::MissingCredentials)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            public_key: public_key.to_string(),
            secret_key: secret_key.to_string(),
            batch_size: config.batch_size.max(1),
            buffer: Mutex::new(Vec::new()),
        })
    }

    pub fn pending(&self) -> usize {
        self.lock_buffer().len()
    }

    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, Vec<IngestionEvent>> {
        self.buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn post_batch(&self, batch: Vec<IngestionEvent>) -> Result<(), SinkError> {
        let url = format!("{}{}", self.base_url, INGESTION_PATH);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&IngestionRequest { batch: &batch })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), message = %message, "Ingestion API error");
            return Err(SinkError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.unwrap_or_default();
        let parsed: IngestionResponse = serde_json::from_str(&body).unwrap_or_default();
        if !parsed.errors.is_empty() {
            tracing::warn!(
                rejected = parsed.errors.len(),
                sent = batch.len(),
                "Ingestion API rejected part of the batch"
            );
        }

        tracing::debug!(sent = batch.len(), "Ingestion batch delivered");
        Ok(())
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&self, record: SinkRecord) -> Result<(), SinkError> {
        let event = IngestionEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind: record.ingestion_type(),
            body: record.body()?,
        };

        let ready = {
            let mut buffer = self.lock_buffer();
            buffer.push(event);
            if buffer.len() >= self.batch_size {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };

        match ready {
            Some(batch) => self.post_batch(batch).await,
            None => Ok(()),
        }
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let batch = std::mem::take(&mut *self.lock_buffer());
        if batch.is_empty() {
            return Ok(());
        }
        self.post_batch(batch).await
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[async_trait]
impl MediaEndpoint for HttpSink {
    async fn upload(
        &self,
        media: &MediaContent,
        trace_id: Uuid,
        observation_id: Option<Uuid>,
    ) -> Result<String, SinkError> {
        let sha256_hash = STANDARD.encode(Sha256::digest(&media.data));
        let url = format!("{}{}", self.base_url, MEDIA_PATH);

        let request = MediaUploadRequest {
            trace_id,
            observation_id,
            content_type: &media.mime_type,
            content_length: media.byte_length,
            sha256_hash: sha256_hash.clone(),
            field: "input",
        };

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SinkError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let registered: MediaUploadResponse = response.json().await?;
        let media_id = registered.media_id.ok_or(SinkError::MissingMediaId)?;

        // No upload URL means the backend already holds these bytes.
        if let Some(upload_url) = registered.upload_url {
            let response = self
                .client
                .put(&upload_url)
                .header("Content-Type", &media.mime_type)
                .header("X-Amz-Checksum-Sha256", sha256_hash)
                .body(media.data.clone())
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(SinkError::Api {
                    code: status.as_u16(),
                    message,
                });
            }
        }

        tracing::debug!(media_id = %media_id, bytes = media.byte_length, "Media uploaded");
        Ok(media_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================
