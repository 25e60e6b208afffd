//! Error taxonomy for the engine.
//!
//! Propagation rules:
//! - [`ConfigError`] aborts a run before any step executes.
//! - [`BackendUnavailableError`] is absorbed by the backend registry and only logged.
//! - [`BackendFailure`] is recoverable for one backend/input pair.
//! - [`StepExecutionError`] is recorded in the checkpoint before fail-fast decides whether to stop.
//! - [`CheckpointError`] is fatal, including a corrupt checkpoint file.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Missing or malformed configuration. Surfaced as the configuration validation error of a run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
    #[error("configuration is missing required section '{0}'")]
    MissingSection(&'static str),
    #[error("configuration section '{section}' is malformed: {message}")]
    Malformed { section: String, message: String },
    #[error("cannot restart from unknown step '{step}' (expected one of: {expected})")]
    UnknownStep { step: String, expected: String },
}

/// Alias matching the operator-facing name of configuration failures.
pub type ConfigValidationError = ConfigError;

/// Failures reading or writing the checkpoint document.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The file exists but cannot be parsed. Never treated as an empty checkpoint.
    #[error("checkpoint file {} is corrupt: {source}; inspect it or remove it to start over", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a backend cannot be constructed for this configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendUnavailableError {
    #[error("unsupported backend '{0}'")]
    Unsupported(String),
    #[error("no configuration section for backend '{0}'")]
    MissingSection(String),
    #[error("backend '{backend}' is missing required setting '{key}'")]
    MissingSetting { backend: String, key: &'static str },
    #[error("backend '{backend}' index not found at {}", .path.display())]
    IndexNotFound { backend: String, path: PathBuf },
}

/// Failure of an external tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("'{program}' exited with {status}: {stderr_tail}")]
    ExitStatus {
        program: String,
        status: String,
        stderr_tail: String,
    },
    #[error("failed to write log {}: {source}", .path.display())]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Recoverable failure of one backend on one input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("backend '{backend}' failed on sample '{sample}': {reason}")]
pub struct BackendFailure {
    pub backend: String,
    pub sample: String,
    pub reason: String,
}

impl BackendFailure {
    pub fn new(backend: impl Into<String>, sample: impl Into<String>, reason: impl ToString) -> Self {
        Self {
            backend: backend.into(),
            sample: sample.into(),
            reason: reason.to_string(),
        }
    }
}

/// A step body could not finish.
#[derive(Debug, Error)]
pub enum StepExecutionError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("no input files matching '{pattern}' in {}", .dir.display())]
    NoInputs { dir: PathBuf, pattern: String },
    #[error("required input not found: {}", .0.display())]
    MissingInput(PathBuf),
    #[error("no input file for sample '{sample}' in {}", .dir.display())]
    MissingSample { sample: String, dir: PathBuf },
    #[error("invalid input pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("step '{step}' has no command configured under pipeline_steps.{step}.command")]
    NotConfigured { step: String },
    #[error("required setting '{0}' is not configured")]
    MissingSetting(&'static str),
    #[error("no backend produced a result for step '{step}': {}", .failures.join("; "))]
    NoBackendSucceeded { step: String, failures: Vec<String> },
    #[error("not every backend succeeded for step '{step}': {}", .failures.join("; "))]
    BackendsIncomplete { step: String, failures: Vec<String> },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StepExecutionError {
    /// Short machine-readable category stored as the checkpoint `cause`.
    pub fn cause(&self) -> &'static str {
        match self {
            StepExecutionError::Tool(_) => "tool",
            StepExecutionError::NoInputs { .. } | StepExecutionError::MissingInput(_) | StepExecutionError::MissingSample { .. } => {
                "missing_input"
            }
            StepExecutionError::InvalidPattern { .. }
            | StepExecutionError::NotConfigured { .. }
            | StepExecutionError::MissingSetting(_) => "configuration",
            StepExecutionError::NoBackendSucceeded { .. } | StepExecutionError::BackendsIncomplete { .. } => "backends",
            StepExecutionError::Io(_) => "io",
        }
    }
}

/// Fatal outcome of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },
    #[error("failed to write run summary {}: {message}", .path.display())]
    Summary { path: PathBuf, message: String },
}

impl PipelineError {
    /// Name of the failing step when the run stopped on a step failure.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            PipelineError::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}
