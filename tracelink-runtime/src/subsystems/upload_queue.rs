//! Bounded FIFO of pending uploads.
//!
//! - `try_enqueue` never waits: a full queue is reported as `QueueFull`
//! - `enqueue` waits for room
//! - `close` stops intake; workers drain what is left and then see `None`

use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use tracelink_core::{MediaContent, MediaError};

pub type UploadCallback = Box<dyn FnOnce(Result<String, MediaError>) + Send + 'static>;

pub struct UploadTask {
    pub media: MediaContent,
    pub trace_id: Uuid,
    pub observation_id: Option<Uuid>,
    pub callback: Option<UploadCallback>,
}

impl UploadTask {
    pub fn new(media: MediaContent, trace_id: Uuid, observation_id: Option<Uuid>) -> Self {
        Self {
            media,
            trace_id,
            observation_id,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: UploadCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

pub struct UploadQueue {
    sender: RwLock<Option<mpsc::Sender<UploadTask>>>,
    capacity: usize,
}

/// Consumer half, shared by every worker.
#[derive(Clone)]
pub struct UploadReceiver {
    inner: Arc<Mutex<mpsc::Receiver<UploadTask>>>,
}

impl UploadReceiver {
    /// Next task, or `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<UploadTask> {
        self.inner.lock().await.recv().await
    }
}

impl UploadQueue {
    pub fn new(capacity: usize) -> (Self, UploadReceiver) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender: RwLock::new(Some(sender)),
                capacity,
            },
            UploadReceiver {
                inner: Arc::new(Mutex::new(receiver)),
            },
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn sender(&self) -> Option<mpsc::Sender<UploadTask>> {
        self.sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn try_enqueue(&self, task: UploadTask) -> Result<(), MediaError> {
        let sender = self.sender().ok_or(MediaError::ShuttingDown)?;
        sender.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MediaError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => MediaError::ShuttingDown,
        })
    }

    pub async fn enqueue(&self, task: UploadTask) -> Result<(), MediaError> {
        let sender = self.sender().ok_or(MediaError::ShuttingDown)?;
        sender
            .send(task)
            .await
            .map_err(|_| MediaError::ShuttingDown)
    }

    /// Stop accepting tasks. Safe to call more than once.
    pub fn close(&self) {
        self.sender
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn task(body: &'static [u8]) -> UploadTask {
        UploadTask::new(
            MediaContent::from_bytes(body, "text/plain", None),
            Uuid::new_v4(),
            None,
        )
    }

    #[tokio::test]
    async fn test_try_enqueue_reports_full() {
        let (queue, _receiver) = UploadQueue::new(2);
        assert!(queue.try_enqueue(task(b"a")).is_ok());
        assert!(queue.try_enqueue(task(b"b")).is_ok());
        assert_eq!(queue.try_enqueue(task(b"c")), Err(MediaError::QueueFull));
    }

    #[tokio::test]
    async fn test_fifo_then_drained_after_close() {
        let (queue, receiver) = UploadQueue::new(4);
        queue.try_enqueue(task(b"first")).unwrap();
        queue.enqueue(task(b"second")).await.unwrap();
        queue.close();

        assert_eq!(queue.try_enqueue(task(b"late")), Err(MediaError::ShuttingDown));
        assert_eq!(&receiver.recv().await.unwrap().media.data[..], b"first");
        assert_eq!(&receiver.recv().await.unwrap().media.data[..], b"second");
        assert!(receiver.recv().await.is_none());
        assert!(queue.is_closed());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (queue, _receiver) = UploadQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }
}
