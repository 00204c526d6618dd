use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::Attributes;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl Usage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            total: input.saturating_add(output),
        }
    }
}

/// Model-invocation details carried only by generations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub model_parameters: Attributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObservationKind {
    Span,
    Generation(GenerationDetails),
}

impl ObservationKind {
    pub fn is_generation(&self) -> bool {
        matches!(self, ObservationKind::Generation(_))
    }

    pub fn generation(&self) -> Option<&GenerationDetails> {
        match self {
            ObservationKind::Generation(details) => Some(details),
            ObservationKind::Span => None,
        }
    }
}

/// A span or generation nested under a trace and optionally under another
/// observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: Uuid,
    pub trace_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_observation_id: Option<Uuid>,
    #[serde(flatten)]
    pub kind: ObservationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub metadata: Attributes,
}

impl Observation {
    pub fn span(id: Uuid, trace_id: Uuid) -> Self {
        Self::with_kind(id, trace_id, ObservationKind::Span)
    }

    pub fn generation(id: Uuid, trace_id: Uuid, details: GenerationDetails) -> Self {
        Self::with_kind(id, trace_id, ObservationKind::Generation(details))
    }

    fn with_kind(id: Uuid, trace_id: Uuid, kind: ObservationKind) -> Self {
        Self {
            id,
            trace_id,
            parent_observation_id: None,
            kind,
            name: None,
            start_time: None,
            end_time: None,
            input: None,
            output: None,
            metadata: Attributes::new(),
        }
    }
}
