//! Run results handed to the aggregator and the summary document it persists.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Output of one backend run against one input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendResult {
    /// Backend name as configured (`hisat2`, `kallisto`, `salmon`).
    pub backend: String,
    /// Sample identifier derived from the input file name.
    pub sample: String,
    /// Sorted BAM for aligners, abundance table for pseudo-aligners.
    pub primary_output: PathBuf,
    /// Gene-level counts when quantification ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counts_file: Option<PathBuf>,
    /// Logs and auxiliary files written by the tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_outputs: Vec<PathBuf>,
    /// Numeric or textual facts parsed from tool summaries.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metrics: Map<String, Value>,
}

/// Final disposition of a step within one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    Failed,
    /// Not executed: already completed, before the restart point, disabled, or not applicable.
    Skipped,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Completed => "completed",
            StepOutcome::Failed => "failed",
            StepOutcome::Skipped => "skipped",
        }
    }
}

/// What the orchestrator observed for a single step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepReport {
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Results of alignment-class steps keyed by backend name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub backends: IndexMap<String, Vec<BackendResult>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl StepReport {
    pub fn completed(duration_ms: u64, details: Map<String, Value>) -> Self {
        Self {
            outcome: StepOutcome::Completed,
            duration_ms: Some(duration_ms),
            reason: None,
            error: None,
            backends: IndexMap::new(),
            details,
        }
    }

    pub fn failed(duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::Failed,
            duration_ms: Some(duration_ms),
            reason: None,
            error: Some(error.into()),
            backends: IndexMap::new(),
            details: Map::new(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::Skipped,
            duration_ms: None,
            reason: Some(reason.into()),
            error: None,
            backends: IndexMap::new(),
            details: Map::new(),
        }
    }
}

/// Immutable snapshot written to `pipeline_summary.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub steps: IndexMap<String, StepReport>,
    pub failed_steps: Vec<String>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.failed_steps.is_empty()
    }

    /// Every backend result recorded across all steps, in step then backend order.
    pub fn backend_results(&self) -> impl Iterator<Item = &BackendResult> {
        self.steps.values().flat_map(|report| report.backends.values().flatten())
    }
}
