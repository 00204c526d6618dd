pub mod replay;
pub mod subsystems;

pub use subsystems::hooks::{EventFilter, FilteredHook, MultiHook, TraceHook};
pub use subsystems::media_processor::MediaProcessor;
pub use subsystems::media_store::MediaStore;
pub use subsystems::observation_graph::{ObservationGraph, ObservationGraphBuilder};
pub use subsystems::upload_status::{UploadState, UploadStatus};
pub use subsystems::uploader::{MediaUploader, UploadOutcome};
