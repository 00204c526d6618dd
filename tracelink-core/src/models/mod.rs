pub mod event;
pub mod media;
pub mod observation;
pub mod trace;

pub use event::{EventType, ExternalEvent};
pub use media::MediaContent;
pub use observation::{GenerationDetails, Observation, ObservationKind, Usage};
pub use trace::Trace;

/// Order-irrelevant key/value bag for metadata and model parameters.
pub type Attributes = serde_json::Map<String, serde_json::Value>;
