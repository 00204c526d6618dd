pub mod hooks;
pub mod media_processor;
pub mod media_store;
pub mod observation_graph;
pub mod upload_queue;
pub mod upload_status;
pub mod uploader;
