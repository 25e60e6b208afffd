//! Run result aggregation.
//!
//! The aggregator is a sink: the orchestrator hands it one [`StepReport`] per step and it
//! never consults the checkpoint store. "Did this step run" lives in the checkpoint;
//! "what did it produce" lives here.

use std::path::{Path, PathBuf};

use chrono::Utc;
use indexmap::IndexMap;
use tracing::info;

use rnaflow_types::{BackendResult, RunSummary, StepOutcome, StepReport};
use rnaflow_util::write_atomic;

use crate::error::PipelineError;

/// File name of the persisted summary inside the results directory.
pub const SUMMARY_FILE_NAME: &str = "pipeline_summary.json";

#[derive(Debug, Default)]
pub struct ResultAggregator {
    output_path: Option<PathBuf>,
    steps: IndexMap<String, StepReport>,
}

impl ResultAggregator {
    /// Aggregator persisting to `<results_dir>/pipeline_summary.json` on finalize.
    pub fn new(results_dir: impl AsRef<Path>) -> Self {
        Self {
            output_path: Some(results_dir.as_ref().join(SUMMARY_FILE_NAME)),
            steps: IndexMap::new(),
        }
    }

    /// Aggregator that only builds snapshots.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// Record the outcome of `step`, replacing any earlier report for it.
    pub fn record(&mut self, step: &str, report: StepReport) {
        self.steps.insert(step.to_string(), report);
    }

    /// Attach one backend result to `step`, creating a completed report if none exists yet.
    pub fn record_backend(&mut self, step: &str, result: BackendResult) {
        self.steps
            .entry(step.to_string())
            .or_insert_with(|| StepReport::completed(0, Default::default()))
            .backends
            .entry(result.backend.clone())
            .or_default()
            .push(result);
    }

    pub fn report(&self, step: &str) -> Option<&StepReport> {
        self.steps.get(step)
    }

    pub fn snapshot(&self) -> RunSummary {
        RunSummary {
            generated_at: Utc::now(),
            steps: self.steps.clone(),
            failed_steps: self
                .steps
                .iter()
                .filter(|(_, report)| report.outcome == StepOutcome::Failed)
                .map(|(step, _)| step.clone())
                .collect(),
        }
    }

    /// Snapshot the results and persist them when an output path is set.
    pub fn finalize(&self) -> Result<RunSummary, PipelineError> {
        let summary = self.snapshot();
        if let Some(path) = &self.output_path {
            let summary_error = |message: String| PipelineError::Summary {
                path: path.clone(),
                message,
            };
            let bytes = serde_json::to_vec_pretty(&summary).map_err(|error| summary_error(error.to_string()))?;
            write_atomic(path, &bytes).map_err(|error| summary_error(error.to_string()))?;
            info!(path = %path.display(), steps = summary.steps.len(), failed = summary.failed_steps.len(), "wrote run summary");
        }
        Ok(summary)
    }
}
