//! Per-media upload progress, queryable while workers run.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Queued,
    Uploading,
    Completed,
    Failed,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadStatus {
    pub media_id: Uuid,
    pub state: UploadState,
    pub reference_id: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct StatusTable {
    entries: Mutex<HashMap<Uuid, UploadStatus>>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Uuid, UploadStatus>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, media_id: Uuid) {
        self.entries().insert(
            media_id,
            UploadStatus {
                media_id,
                state: UploadState::Queued,
                reference_id: None,
                error: None,
                started_at: Utc::now(),
                completed_at: None,
            },
        );
    }

    /// Forget an entry whose task never made it onto the queue.
    pub fn remove(&self, media_id: Uuid) {
        self.entries().remove(&media_id);
    }

    pub fn mark_uploading(&self, media_id: Uuid) {
        if let Some(status) = self.entries().get_mut(&media_id) {
            status.state = UploadState::Uploading;
        }
    }

    pub fn mark_completed(&self, media_id: Uuid, reference_id: &str) {
        if let Some(status) = self.entries().get_mut(&media_id) {
            status.state = UploadState::Completed;
            status.reference_id = Some(reference_id.to_string());
            status.completed_at = Some(Utc::now());
        }
    }

    pub fn mark_failed(&self, media_id: Uuid, error: &str) {
        if let Some(status) = self.entries().get_mut(&media_id) {
            status.state = UploadState::Failed;
            status.error = Some(error.to_string());
            status.completed_at = Some(Utc::now());
        }
    }

    pub fn get(&self, media_id: Uuid) -> Option<UploadStatus> {
        self.entries().get(&media_id).cloned()
    }

    pub fn count(&self, state: UploadState) -> usize {
        self.entries()
            .values()
            .filter(|status| status.state == state)
            .count()
    }
}

// ============================================================================
// TESTS
// ============================================================================
