//! Integration tests for the media upload pipeline
//!
//! These tests verify:
//! 1. Identical bytes reach the media API exactly once
//! 2. Concurrent uploads of the same bytes share one upload
//! 3. A saturated queue rejects without blocking and leaves no status behind
//! 4. Shutdown drains every queued upload

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;
use tracelink_core::{HttpSink, MediaConfig, MediaContent, MediaEndpoint, MediaError, SinkConfig, SinkError};
use tracelink_runtime::{MediaUploader, UploadOutcome, UploadState};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Counts calls and holds each upload until a permit is available.
struct GatedEndpoint {
    calls: AtomicUsize,
    gate: Semaphore,
    delay: Duration,
}

impl GatedEndpoint {
    fn open(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
            delay,
        })
    }

    fn closed() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            delay: Duration::ZERO,
        })
    }
}

#[async_trait]
impl MediaEndpoint for GatedEndpoint {
    async fn upload(
        &self,
        media: &MediaContent,
        _trace_id: Uuid,
        _observation_id: Option<Uuid>,
    ) -> Result<String, SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.expect("gate closed");
        tokio::time::sleep(self.delay).await;
        Ok(format!("ref-{}", &media.content_hash[..12]))
    }
}

fn media_config(workers: usize, queue_capacity: usize) -> MediaConfig {
    MediaConfig {
        workers,
        queue_capacity,
        poll_interval_ms: 10,
    }
}

async fn wait_for_state(uploader: &MediaUploader, media_id: Uuid, state: UploadState) {
    for _ in 0..200 {
        if uploader.status(media_id).map(|s| s.state) == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("media {media_id} never reached {state:?}");
}

#[tokio::test]
async fn test_identical_bytes_are_uploaded_once() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/public/media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"mediaId": "m-42"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = SinkConfig {
        public_key: Some("pk-test".to_string()),
        secret_key: Some("sk-test".to_string()),
        ..SinkConfig::default()
    };
    let sink = Arc::new(HttpSink::with_base_url(&config, mock_server.uri()).unwrap());
    let uploader = MediaUploader::new(sink, &MediaConfig::default());
    let trace_id = Uuid::new_v4();

    let mut first = MediaContent::from_bytes(&b"same bytes"[..], "image/png", None);
    let outcome = uploader.upload(&mut first, trace_id, None).unwrap();
    let UploadOutcome::Queued(media_id) = outcome else {
        panic!("first upload should be queued");
    };
    let reference = uploader
        .wait_for_upload(media_id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(reference, "m-42");

    let mut second = MediaContent::from_bytes(&b"same bytes"[..], "application/x-custom", None);
    let outcome = uploader.upload(&mut second, trace_id, None).unwrap();
    assert_eq!(outcome, UploadOutcome::Deduplicated("m-42".to_string()));
    assert_eq!(second.reference_string(), "@media/m-42");

    uploader.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_duplicates_share_one_upload() {
    let endpoint = GatedEndpoint::open(Duration::from_millis(50));
    let uploader = MediaUploader::new(endpoint.clone(), &media_config(4, 100));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    for _ in 0..10 {
        let media = MediaContent::from_bytes(&b"shared payload"[..], "text/plain", None);
        let tx = tx.clone();
        uploader
            .upload_with_callback(media, Uuid::new_v4(), None, move |result| {
                let _ = tx.send(result);
            })
            .await
            .unwrap();
    }
    drop(tx);

    let mut references = Vec::new();
    while let Some(result) = rx.recv().await {
        references.push(result.unwrap());
    }

    assert_eq!(references.len(), 10);
    assert!(references.iter().all(|r| r == &references[0]));
    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);

    uploader.shutdown().await;
}

#[tokio::test]
async fn test_saturated_queue_rejects_without_blocking() {
    let endpoint = GatedEndpoint::closed();
    let uploader = MediaUploader::new(endpoint.clone(), &media_config(1, 2));
    let trace_id = Uuid::new_v4();

    let mut busy = MediaContent::from_bytes(&b"busy"[..], "text/plain", None);
    uploader.upload(&mut busy, trace_id, None).unwrap();
    wait_for_state(&uploader, busy.id, UploadState::Uploading).await;

    let mut queued = Vec::new();
    for body in [&b"one"[..], &b"two"[..]] {
        let mut media = MediaContent::from_bytes(body, "text/plain", None);
        uploader.upload(&mut media, trace_id, None).unwrap();
        queued.push(media.id);
    }

    let mut rejected = MediaContent::from_bytes(&b"three"[..], "text/plain", None);
    let result = tokio::time::timeout(Duration::from_secs(1), async {
        uploader.upload(&mut rejected, trace_id, None)
    })
    .await
    .expect("upload must not block");
    assert_eq!(result, Err(MediaError::QueueFull));
    assert!(uploader.status(rejected.id).is_none());
    assert_eq!(uploader.count(UploadState::Queued), 2);

    endpoint.gate.add_permits(10);
    for media_id in queued.into_iter().chain([busy.id]) {
        uploader
            .wait_for_upload(media_id, Duration::from_secs(5))
            .await
            .unwrap();
    }

    uploader.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_queue() {
    let endpoint = GatedEndpoint::open(Duration::from_millis(20));
    let uploader = MediaUploader::new(endpoint.clone(), &media_config(1, 10));

    let mut ids = Vec::new();
    for i in 0..5u8 {
        let mut media = MediaContent::from_bytes(vec![i; 16], "application/octet-stream", None);
        uploader.upload(&mut media, Uuid::new_v4(), None).unwrap();
        ids.push(media.id);
    }

    uploader.shutdown().await;

    assert_eq!(endpoint.calls.load(Ordering::SeqCst), 5);
    for id in ids {
        assert_eq!(uploader.status(id).unwrap().state, UploadState::Completed);
    }
    assert_eq!(uploader.store().len(), 5);
}

#[tokio::test]
async fn test_wait_on_unknown_media_fails_fast() {
    let uploader = MediaUploader::new(GatedEndpoint::open(Duration::ZERO), &MediaConfig::default());
    let id = Uuid::new_v4();

    let result = tokio::time::timeout(
        Duration::from_millis(500),
        uploader.wait_for_upload(id, Duration::from_secs(60)),
    )
    .await
    .expect("unknown id must not wait for the timeout");
    assert_eq!(result, Err(MediaError::UnknownUpload(id)));

    uploader.shutdown().await;
}

#[tokio::test]
async fn test_wait_times_out_while_upload_is_stuck() {
    let endpoint = GatedEndpoint::closed();
    let uploader = MediaUploader::new(endpoint.clone(), &media_config(1, 4));

    let mut media = MediaContent::from_bytes(&b"stuck"[..], "text/plain", None);
    uploader.upload(&mut media, Uuid::new_v4(), None).unwrap();

    let result = uploader
        .wait_for_upload(media.id, Duration::from_millis(100))
        .await;
    assert_eq!(result, Err(MediaError::Timeout));

    endpoint.gate.add_permits(1);
    uploader.shutdown().await;
}
