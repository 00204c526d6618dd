pub mod classifier;
pub mod config;
pub mod error;
pub mod models;
pub mod sink;

pub use classifier::{classify, is_generation, Classification};
pub use config::{HookConfig, MediaConfig, SinkConfig, TracelinkConfig};
pub use error::{MediaError, SinkError, TracelinkError};
pub use models::{
    Attributes, EventType, ExternalEvent, GenerationDetails, MediaContent, Observation,
    ObservationKind, Trace, Usage,
};
pub use sink::{HttpSink, MediaEndpoint, Sink, SinkRecord};
