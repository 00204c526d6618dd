//! Media uploader: dedup by content hash, then upload on a worker pool
//!
//! This subsystem is responsible for:
//! - Answering repeat uploads of identical bytes from the media store
//! - Queueing new media and uploading it from background worker tasks
//! - Tracking per-media status so callers can poll or wait for a reference
//!
//! Failed uploads are recorded, never retried.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use tracelink_core::{MediaConfig, MediaContent, MediaEndpoint, MediaError};

use super::media_store::{Claim, MediaStore};
use super::upload_queue::{UploadQueue, UploadReceiver, UploadTask};
use super::upload_status::{StatusTable, UploadState, UploadStatus};

pub const DEFAULT_WORKERS: usize = 2;

/// What `upload` did with a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Same bytes were uploaded before; this is their reference.
    Deduplicated(String),
    /// Queued; poll or wait on this media id.
    Queued(Uuid),
}

impl UploadOutcome {
    /// The reference id, or the media id while the upload is pending.
    pub fn reference(&self) -> String {
        match self {
            UploadOutcome::Deduplicated(reference) => reference.clone(),
            UploadOutcome::Queued(media_id) => media_id.to_string(),
        }
    }
}

pub struct MediaUploader {
    queue: UploadQueue,
    store: Arc<MediaStore>,
    statuses: Arc<StatusTable>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    poll_interval: Duration,
}

impl MediaUploader {
    /// Start the worker pool. Must be called from inside a tokio runtime.
    pub fn new(endpoint: Arc<dyn MediaEndpoint>, config: &MediaConfig) -> Self {
        Self::with_store(endpoint, config, Arc::new(MediaStore::new()))
    }

    pub fn with_store(
        endpoint: Arc<dyn MediaEndpoint>,
        config: &MediaConfig,
        store: Arc<MediaStore>,
    ) -> Self {
        let workers = if config.workers == 0 {
            DEFAULT_WORKERS
        } else {
            config.workers
        };
        let (queue, receiver) = UploadQueue::new(config.queue_capacity);
        let statuses = Arc::new(StatusTable::new());

        let handles = (0..workers)
            .map(|id| {
                let worker = UploadWorker {
                    id,
                    endpoint: endpoint.clone(),
                    store: store.clone(),
                    statuses: statuses.clone(),
                };
                tokio::spawn(worker.run(receiver.clone()))
            })
            .collect();

        tracing::info!(
            workers = workers,
            capacity = queue.capacity(),
            "Media uploader started"
        );

        Self {
            queue,
            store,
            statuses,
            workers: Mutex::new(handles),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    /// Deduplicate or queue `media` without waiting.
    ///
    /// A store hit sets `media.reference_id`. A full queue fails with
    /// `QueueFull` and leaves no status entry behind.
    pub fn upload(
        &self,
        media: &mut MediaContent,
        trace_id: Uuid,
        observation_id: Option<Uuid>,
    ) -> Result<UploadOutcome, MediaError> {
        if let Some(reference) = self.store.get(&media.content_hash) {
            tracing::debug!(media_id = %media.id, reference = %reference, "Media deduplicated");
            media.reference_id = Some(reference.clone());
            return Ok(UploadOutcome::Deduplicated(reference));
        }

        self.statuses.register(media.id);
        let task = UploadTask::new(media.clone(), trace_id, observation_id);
        if let Err(e) = self.queue.try_enqueue(task) {
            self.statuses.remove(media.id);
            tracing::warn!(media_id = %media.id, error = %e, "Media upload not queued");
            return Err(e);
        }

        Ok(UploadOutcome::Queued(media.id))
    }

    /// Queue `media`, waiting for room, and invoke `callback` exactly once with
    /// the outcome. Store hits invoke it immediately.
    ///
    /// Fails with `ShuttingDown` without calling `callback` once the uploader
    /// has been shut down.
    pub async fn upload_with_callback<F>(
        &self,
        media: MediaContent,
        trace_id: Uuid,
        observation_id: Option<Uuid>,
        callback: F,
    ) -> Result<(), MediaError>
    where
        F: FnOnce(Result<String, MediaError>) + Send + 'static,
    {
        if self.queue.is_closed() {
            return Err(MediaError::ShuttingDown);
        }

        if let Some(reference) = self.store.get(&media.content_hash) {
            callback(Ok(reference));
            return Ok(());
        }

        let media_id = media.id;
        self.statuses.register(media_id);
        let task = UploadTask::new(media, trace_id, observation_id).with_callback(Box::new(callback));
        if let Err(e) = self.queue.enqueue(task).await {
            self.statuses.remove(media_id);
            return Err(e);
        }
        Ok(())
    }

    pub fn status(&self, media_id: Uuid) -> Option<UploadStatus> {
        self.statuses.get(media_id)
    }

    pub fn count(&self, state: UploadState) -> usize {
        self.statuses.count(state)
    }

    /// Poll until the upload completes, fails, or `timeout` elapses.
    ///
    /// An unknown media id fails immediately.
    pub async fn wait_for_upload(
        &self,
        media_id: Uuid,
        timeout: Duration,
    ) -> Result<String, MediaError> {
        let deadline = Instant::now() + timeout;

        loop {
            let status = self
                .statuses
                .get(media_id)
                .ok_or(MediaError::UnknownUpload(media_id))?;

            match status.state {
                UploadState::Completed => {
                    return status
                        .reference_id
                        .ok_or_else(|| MediaError::UploadFailed("missing reference".to_string()));
                }
                UploadState::Failed => {
                    return Err(MediaError::UploadFailed(status.error.unwrap_or_default()));
                }
                UploadState::Queued | UploadState::Uploading => {}
            }

            if Instant::now() >= deadline {
                return Err(MediaError::Timeout);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    pub fn store(&self) -> &MediaStore {
        &self.store
    }

    pub fn is_shut_down(&self) -> bool {
        self.queue.is_closed()
    }

    /// Stop intake and wait for the workers to drain the queue.
    ///
    /// Concurrent callers all return only once the drain has finished.
    pub async fn shutdown(&self) {
        self.queue.close();

        // held across the join so later callers wait for the first one
        let mut workers = self.workers.lock().await;
        if workers.is_empty() {
            return;
        }

        let handles: Vec<JoinHandle<()>> = workers.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Upload worker terminated abnormally");
            }
        }
        tracing::info!("Media uploader stopped");
    }
}

struct UploadWorker {
    id: usize,
    endpoint: Arc<dyn MediaEndpoint>,
    store: Arc<MediaStore>,
    statuses: Arc<StatusTable>,
}

impl UploadWorker {
    async fn run(self, receiver: UploadReceiver) {
        tracing::debug!(worker = self.id, "Upload worker started");
        while let Some(task) = receiver.recv().await {
            self.process(task).await;
        }
        tracing::debug!(worker = self.id, "Upload worker exiting");
    }

    async fn process(&self, task: UploadTask) {
        let UploadTask {
            media,
            trace_id,
            observation_id,
            callback,
        } = task;

        self.statuses.mark_uploading(media.id);
        let result = self.resolve(&media, trace_id, observation_id).await;

        match &result {
            Ok(reference) => {
                self.statuses.mark_completed(media.id, reference);
                tracing::info!(
                    worker = self.id,
                    media_id = %media.id,
                    reference = %reference,
                    bytes = media.byte_length,
                    "Media uploaded"
                );
            }
            Err(e) => {
                self.statuses.mark_failed(media.id, &e.to_string());
                tracing::warn!(worker = self.id, media_id = %media.id, error = %e, "Media upload failed");
            }
        }

        if let Some(callback) = callback {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                tracing::error!(worker = self.id, media_id = %media.id, "Upload callback panicked");
            }
        }
    }

    /// Reference for `media`, uploading it only if no other worker has or is.
    async fn resolve(
        &self,
        media: &MediaContent,
        trace_id: Uuid,
        observation_id: Option<Uuid>,
    ) -> Result<String, MediaError> {
        loop {
            match self.store.claim(&media.content_hash) {
                Claim::Hit(reference) => return Ok(reference),
                Claim::Wait(receiver) => {
                    if let Ok(reference) = MediaStore::wait(receiver).await {
                        return Ok(reference);
                    }
                    // the owner failed; try to claim it ourselves
                }
                Claim::Owner(claim) => {
                    return match self.endpoint.upload(media, trace_id, observation_id).await {
                        Ok(reference) => {
                            claim.commit(&reference);
                            Ok(reference)
                        }
                        Err(e) => {
                            let message = e.to_string();
                            claim.release(&message);
                            Err(MediaError::UploadFailed(message))
                        }
                    };
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
