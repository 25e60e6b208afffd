//! Step orchestration: walks the canonical step order, consults the checkpoint store,
//! runs step bodies, and feeds outcomes to the result aggregator.
//!
//! - `planning` decides run/skip per step from the checkpoint and restart point
//! - [`StepExecutor`] abstracts what a step body does
//! - `steps::PipelineStepExecutor` runs the real QC, alignment and analysis tooling
//! - [`run_pipeline`] wires a resolved configuration to the orchestrator

use std::time::Instant;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{Span, info, info_span, warn};

use rnaflow_types::{BackendResult, PipelineMode, RunSummary, StepClass, StepReport, StepStatus};

use crate::checkpoint::CheckpointStore;
use crate::config::{ResolvedConfig, ensure_directories};
use crate::error::{ConfigError, PipelineError, StepExecutionError};
use crate::summary::ResultAggregator;
use crate::tool::ToolRunner;

pub mod analysis;
pub mod planning;
pub mod report;
pub mod steps;

pub use planning::{StepDecision, decide, restart_index};
pub use steps::PipelineStepExecutor;

/// Read-only view handed to a step body.
#[derive(Debug)]
pub struct StepContext<'a> {
    pub step: &'a str,
    /// Results recorded so far in this run.
    pub summary: &'a RunSummary,
}

/// What a successful step body produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Merged into the checkpoint entry and the step report.
    pub metadata: Map<String, Value>,
    pub backends: IndexMap<String, Vec<BackendResult>>,
}

impl StepOutput {
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Whether a step should execute under the current configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applicability {
    Run,
    Disabled(String),
    NotApplicable(String),
}

impl Applicability {
    fn bypass_reason(self) -> Option<String> {
        match self {
            Applicability::Run => None,
            Applicability::Disabled(reason) | Applicability::NotApplicable(reason) => Some(reason),
        }
    }
}

/// Executes the body of one pipeline step.
pub trait StepExecutor {
    fn applicability(&self, _step: &str) -> Applicability {
        Applicability::Run
    }

    /// Run the step. Errors are recorded in the checkpoint; a [`StepExecutionError`] in the
    /// chain supplies the recorded `cause`.
    fn execute(&mut self, context: &StepContext<'_>) -> anyhow::Result<StepOutput>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub resume: bool,
    pub restart_from: Option<String>,
    pub fail_fast: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            resume: false,
            restart_from: None,
            fail_fast: true,
        }
    }
}

/// Outcome of a run that was not stopped by fail-fast.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Steps whose body ran, in order.
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed_steps: Vec<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.failed_steps.is_empty()
    }
}

/// Runs an ordered list of steps against a checkpoint store.
pub struct Orchestrator<'a> {
    steps: Vec<String>,
    options: RunOptions,
    store: &'a mut dyn CheckpointStore,
    executor: &'a mut dyn StepExecutor,
    aggregator: ResultAggregator,
    span: Span,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        steps: Vec<String>,
        options: RunOptions,
        store: &'a mut dyn CheckpointStore,
        executor: &'a mut dyn StepExecutor,
        aggregator: ResultAggregator,
    ) -> Self {
        let span = info_span!("pipeline", steps = steps.len());
        Self {
            steps,
            options,
            store,
            executor,
            aggregator,
            span,
        }
    }

    /// Replace the run span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn run(mut self) -> Result<RunReport, PipelineError> {
        let span = self.span.clone();
        let _guard = span.enter();

        let restart_at = restart_index(&self.steps, self.options.restart_from.as_deref())?;
        if self.options.resume {
            match self.store.last_completed_step() {
                Some(last) => info!(last_completed = %last, "resuming from checkpoint"),
                None => info!("no completed steps recorded; starting from the beginning"),
            }
        } else {
            self.store.clear()?;
        }
        if let Some(restart) = restart_at {
            info!(restart_from = %self.steps[restart], "restarting from step");
        }

        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        let mut failed_steps = Vec::new();
        let steps = self.steps.clone();

        for (index, step) in steps.iter().enumerate() {
            let bypass = self.executor.applicability(step).bypass_reason();
            let decision = decide(index, restart_at, self.store.should_skip(step), bypass);
            if let Some(reason) = decision.reason() {
                info!(step = %step, reason = %reason, "skipping step");
                self.aggregator.record(step, StepReport::skipped(reason));
                skipped.push(step.clone());
                continue;
            }

            executed.push(step.clone());
            if let Err(message) = self.run_step(step)? {
                failed_steps.push(step.clone());
                if self.options.fail_fast {
                    if let Err(error) = self.aggregator.finalize() {
                        warn!(error = %error, "could not write run summary after failure");
                    }
                    return Err(PipelineError::StepFailed { step: step.clone(), message });
                }
                warn!(step = %step, "continuing after step failure");
            }
        }

        let summary = self.aggregator.finalize()?;
        info!(
            executed = executed.len(),
            skipped = skipped.len(),
            failed = failed_steps.len(),
            "pipeline finished"
        );
        Ok(RunReport {
            summary,
            executed,
            skipped,
            failed_steps,
        })
    }

    /// Execute one step, returning the failure message when its body failed.
    fn run_step(&mut self, step: &str) -> Result<Result<(), String>, PipelineError> {
        let span = info_span!("step", step = %step, class = ?StepClass::of(step));
        let _guard = span.enter();

        self.store.save(step, StepStatus::Running, None)?;
        info!("step started");
        let started = Instant::now();
        let snapshot = self.aggregator.snapshot();
        let context = StepContext { step, summary: &snapshot };
        let result = self.executor.execute(&context);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(output) => {
                let mut metadata = output.metadata;
                metadata.insert("duration_ms".into(), Value::from(duration_ms));
                self.store.save(step, StepStatus::Completed, Some(metadata.clone()))?;

                let mut report = StepReport::completed(duration_ms, metadata);
                report.backends = output.backends;
                self.aggregator.record(step, report);
                info!(duration_ms, "step completed");
                Ok(Ok(()))
            }
            Err(error) => {
                let message = format!("{error:#}");
                let cause = error
                    .chain()
                    .find_map(|source| source.downcast_ref::<StepExecutionError>())
                    .map(StepExecutionError::cause)
                    .unwrap_or("step");
                let mut metadata = Map::new();
                metadata.insert("error".into(), Value::String(message.clone()));
                metadata.insert("cause".into(), Value::String(cause.to_string()));
                metadata.insert("duration_ms".into(), Value::from(duration_ms));
                self.store.save(step, StepStatus::Failed, Some(metadata))?;

                self.aggregator.record(step, StepReport::failed(duration_ms, message.clone()));
                warn!(error = %message, cause, duration_ms, "step failed");
                Ok(Err(message))
            }
        }
    }
}

/// Run `mode` for a resolved configuration with the real step bodies.
pub fn run_pipeline(
    config: &ResolvedConfig,
    mode: PipelineMode,
    resume: bool,
    store: &mut dyn CheckpointStore,
    tools: &dyn ToolRunner,
) -> Result<RunReport, PipelineError> {
    ensure_directories(config).map_err(|error| {
        PipelineError::Config(ConfigError::Malformed {
            section: "output".into(),
            message: format!("cannot create output directories: {error}"),
        })
    })?;

    let parameters = config.parameters();
    let options = RunOptions {
        resume,
        restart_from: parameters.restart_from.clone(),
        fail_fast: parameters.fail_fast,
    };
    let steps: Vec<String> = mode.steps().into_iter().map(String::from).collect();
    let span = info_span!("pipeline", mode = %mode.as_str(), sample = config.sample().unwrap_or("all"));
    let aggregator = ResultAggregator::new(&config.output().results_dir);
    let mut executor = PipelineStepExecutor::new(config, tools);

    Orchestrator::new(steps, options, store, &mut executor, aggregator)
        .with_span(span)
        .run()
}
