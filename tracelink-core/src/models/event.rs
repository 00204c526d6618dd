use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Attributes;

/// Lifecycle event kinds emitted by the workflow engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    GraphStart,
    GraphEnd,
    NodeStart,
    NodeEnd,
    NodeError,
    EdgeTraversal,
}

impl EventType {
    pub fn is_end(&self) -> bool {
        matches!(self, EventType::GraphEnd | EventType::NodeEnd)
    }
}

/// One lifecycle event from the engine. Ids are the engine's own and are
/// only meaningful while the run is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub event_type: EventType,
    #[serde(default)]
    pub node_name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub state: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Attributes,
}

impl ExternalEvent {
    pub fn new(id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            event_type,
            node_name: String::new(),
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            state: Value::Null,
            error: None,
            metadata: Attributes::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_node(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn ended_at(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// Explicit duration if the engine reported one, else end minus start.
    pub fn duration_millis(&self) -> i64 {
        if let Some(ms) = self.duration_ms {
            return ms;
        }
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds().max(0))
            .unwrap_or(0)
    }

    /// End time, falling back to start plus duration. A duration that does
    /// not fit the calendar range leaves the start time.
    pub fn effective_end_time(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or_else(|| {
            TimeDelta::try_milliseconds(self.duration_ms.unwrap_or(0))
                .and_then(|delta| self.start_time.checked_add_signed(delta))
                .unwrap_or(self.start_time)
        })
    }
}
