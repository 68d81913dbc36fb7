pub mod api;
pub mod controller;
pub mod error;
pub mod probe;
pub mod records;

pub use api::{ApiConfig, Artifact, HttpJobApi, Job, JobApi, JobStatus};
pub use controller::{
    ControllerEvent, ConversionState, EventEmitter, JobController, SelectedFile, Snapshot,
    TimerConfig,
};
pub use error::AppError;
pub use probe::{DurationProbe, FfprobeDurationProbe};
pub use records::{FileRecord, RecordKind, RecordStatus};
