//! Shared data model for the rnaflow pipeline engine.
//!
//! The types here are deliberately free of behavior that touches the filesystem or
//! spawns processes so the engine, the CLI, and tests can share one vocabulary for
//! steps, checkpoints, backend results, and run summaries.

pub mod checkpoint;
pub mod pipeline;
pub mod summary;

pub use checkpoint::{CheckpointDocument, CheckpointEntry, StepStatus, parse_timestamp};
pub use pipeline::{
    BackendKind, PipelineKind, PipelineMode, STEP_ALIGNMENT, STEP_EDA, STEP_ENRICHMENT, STEP_KALLISTO, STEP_MULTIQC, STEP_QA, STEP_QC,
    STEP_QUANTIFICATION, STEP_REPORT, StepClass, UnknownBackend, UnknownPipelineMode,
};
pub use summary::{BackendResult, RunSummary, StepOutcome, StepReport};
