//! Fieldpost Client Staging Library
//!
//! Client-side half of the multi-file ingestion pipeline: owns the
//! selected-file list, downscales oversized images before transmission, and
//! materializes the ordered payload a host submits to the server. All checks
//! here are advisory; the server re-validates authoritatively.

pub mod intake;
pub mod preprocess;
pub mod stager;

pub use intake::{
    FileIntake, ImagePreprocessor, PickedFile, PreprocessJob, PreprocessStage, Progress,
    SelectedFile,
};
pub use preprocess::{process_blob, PreprocessError, ProcessedBlob, ResizeTarget};
pub use stager::{StageError, StagedEntry, StagedPayload, UploadStager};
