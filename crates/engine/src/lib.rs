//! # Rnaflow Engine
//!
//! The Rnaflow Engine drives bulk RNA-seq pipelines: it resolves a pipeline configuration,
//! walks the canonical step order, dispatches alignment to one or more backends, and records
//! every step transition in a durable checkpoint so interrupted runs resume where they stopped.
//!
//! ## Key Features
//!
//! - **Configuration Resolution**: `${sample}` substitution and workspace-relative paths
//! - **Checkpoint/Resume**: Atomic JSON checkpoints with restart-from overrides
//! - **Multi-Backend Alignment**: HISAT2, kallisto and Salmon behind one closed set of variants
//! - **Result Aggregation**: A run summary and final Markdown report independent of the checkpoint
//!
//! ## Usage
//!
//! ```rust
//! use rnaflow_engine::{ConfigOverrides, load_resolved_config};
//!
//! let workspace = tempfile::tempdir()?;
//! let config_path = workspace.path().join("pipeline.yaml");
//! std::fs::write(&config_path, r#"
//! input: { fastq_dir: reads }
//! output: { results_dir: "results/${sample}" }
//! genome: {}
//! aligners:
//!   kallisto: { index: "indexes/transcripts.idx" }
//! parameters: { aligner: kallisto }
//! pipeline_steps: {}
//! "#)?;
//!
//! let config = load_resolved_config(&config_path, workspace.path(), Some("S1"), &ConfigOverrides::default())?;
//! assert_eq!(config.output().results_dir, workspace.path().join("results/S1"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`config`**: Loading and resolving the configuration document
//! - **`checkpoint`**: The checkpoint store trait with JSON and in-memory implementations
//! - **`backend`**: Alignment/quantification backends and their registry
//! - **`executor`**: The step orchestrator and the real step bodies
//! - **`summary`**: The result aggregator
//! - **`tool`**: External process invocation

use std::path::Path;

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod executor;
pub mod inputs;
pub mod summary;
pub mod tool;

pub use backend::{Backend, BackendContext, available_backends, create, try_create};
pub use checkpoint::{
    CHECKPOINT_FILE_NAME, CheckpointStore, InMemoryCheckpointStore, JsonCheckpointStore, discard_checkpoint, load_checkpoint,
};
pub use config::{ConfigOverrides, ResolvedConfig, ensure_directories, load_config_file, resolve};
pub use error::{
    BackendFailure, BackendUnavailableError, CheckpointError, ConfigError, ConfigValidationError, PipelineError, StepExecutionError,
    ToolError,
};
pub use executor::{
    Applicability, Orchestrator, PipelineStepExecutor, RunOptions, RunReport, StepContext, StepExecutor, StepOutput, run_pipeline,
};
pub use inputs::{InputArtifact, InputDiscovery};
pub use summary::{ResultAggregator, SUMMARY_FILE_NAME};
pub use tool::{ProcessToolRunner, ToolInvocation, ToolOutput, ToolRunner};

/// Loads a configuration file and resolves it for one invocation.
///
/// # Arguments
///
/// * `config_path` - YAML or JSON configuration file
/// * `workspace_root` - Directory relative paths are resolved against
/// * `sample` - Replaces every `${sample}` token when given
/// * `overrides` - Command-line flags layered over `parameters`
///
/// # Errors
///
/// Returns a [`ConfigError`] when the file cannot be read or parsed, a required section is
/// missing, or a section cannot be decoded.
pub fn load_resolved_config(
    config_path: impl AsRef<Path>,
    workspace_root: impl AsRef<Path>,
    sample: Option<&str>,
    overrides: &ConfigOverrides,
) -> Result<ResolvedConfig, ConfigError> {
    let raw = load_config_file(config_path)?;
    resolve(&raw, workspace_root.as_ref(), sample, overrides)
}
