pub mod backend;
pub mod config;
pub mod events;
pub mod frame;
pub mod logging;
pub mod postprocessing;
pub mod preprocessing;
pub mod schema;
pub mod service;
pub mod sink;

// Re-export commonly used types for convenience
pub use backend::{InferenceBackend, InferenceOutput};
pub use config::{CropRegion, WorkerConfig};
pub use events::{ChangeEvent, ImageAction, ImagesEventHandler, OperationType};
pub use frame::FrameMessage;
pub use postprocessing::Detection;
pub use schema::{MessageSchema, SchemaError};
pub use service::{EventOutcome, FrameOutcome, RunSummary, SchemaCache, WorkerService};
