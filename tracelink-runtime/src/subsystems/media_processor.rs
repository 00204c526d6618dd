//! Rewrites inline `data:` URIs in trace payloads into `@media/<ref>` strings,
//! handing the decoded bytes to the uploader.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use tracelink_core::MediaContent;

use super::uploader::MediaUploader;

#[derive(Clone)]
pub struct MediaProcessor {
    uploader: Arc<MediaUploader>,
}

impl MediaProcessor {
    pub fn new(uploader: Arc<MediaUploader>) -> Self {
        Self { uploader }
    }

    pub fn uploader(&self) -> &MediaUploader {
        &self.uploader
    }

    /// Walk `value` and replace every data URI string with a media reference.
    /// Strings that do not parse as data URIs are left untouched.
    pub fn process(&self, value: Value, trace_id: Uuid, observation_id: Option<Uuid>) -> Value {
        match value {
            Value::String(s) if s.starts_with("data:") => {
                match self.replace_data_uri(&s, trace_id, observation_id) {
                    Some(reference) => Value::String(reference),
                    None => Value::String(s),
                }
            }
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.process(item, trace_id, observation_id))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, item)| (key, self.process(item, trace_id, observation_id)))
                    .collect(),
            ),
            other => other,
        }
    }

    fn replace_data_uri(
        &self,
        uri: &str,
        trace_id: Uuid,
        observation_id: Option<Uuid>,
    ) -> Option<String> {
        let mut media = match MediaContent::from_data_uri(uri) {
            Ok(media) => media,
            Err(e) => {
                tracing::debug!(error = %e, "Leaving unparseable data URI inline");
                return None;
            }
        };

        match self.uploader.upload(&mut media, trace_id, observation_id) {
            Ok(_) => Some(media.reference_string()),
            Err(e) => {
                // the payload still gets a stable placeholder; the bytes are dropped
                tracing::warn!(media_id = %media.id, error = %e, "Media not uploaded");
                Some(media.reference_string())
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracelink_core::{MediaConfig, MediaEndpoint, SinkError};

    struct StaticEndpoint {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaEndpoint for StaticEndpoint {
        async fn upload(
            &self,
            _media: &MediaContent,
            _trace_id: Uuid,
            _observation_id: Option<Uuid>,
        ) -> Result<String, SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("media-1".to_string())
        }
    }

    #[tokio::test]
    async fn test_nested_data_uris_are_replaced() {
        let endpoint = Arc::new(StaticEndpoint {
            calls: AtomicUsize::new(0),
        });
        let uploader = Arc::new(MediaUploader::new(endpoint.clone(), &MediaConfig::default()));
        uploader.store().insert(
            tracelink_core::models::media::content_hash(b"hello"),
            "media-1",
        );
        let processor = MediaProcessor::new(uploader.clone());

        let value = json!({
            "image": "data:image/png;base64,aGVsbG8=",
            "list": ["plain", "data:text/plain;base64,aGVsbG8="],
            "broken": "data:no-comma",
            "count": 3
        });
        let processed = processor.process(value, Uuid::new_v4(), None);

        assert_eq!(processed["image"], "@media/media-1");
        assert_eq!(processed["list"][0], "plain");
        assert_eq!(processed["list"][1], "@media/media-1");
        assert_eq!(processed["broken"], "data:no-comma");
        assert_eq!(processed["count"], 3);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);

        uploader.shutdown().await;
    }

    #[tokio::test]
    async fn test_new_media_is_referenced_by_id_until_uploaded() {
        let endpoint = Arc::new(StaticEndpoint {
            calls: AtomicUsize::new(0),
        });
        let uploader = Arc::new(MediaUploader::new(endpoint, &MediaConfig::default()));
        let processor = MediaProcessor::new(uploader.clone());

        let processed = processor.process(json!("data:,fresh"), Uuid::new_v4(), None);
        let reference = processed.as_str().unwrap();
        assert!(reference.starts_with("@media/"));
        assert_ne!(reference, "@media/media-1");

        uploader.shutdown().await;
    }
}
