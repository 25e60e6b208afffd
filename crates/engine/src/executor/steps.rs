//! Step bodies backed by real tooling.

use std::fs;

use anyhow::bail;
use indexmap::IndexMap;
use serde_json::{Value, json};
use tracing::{info, warn};

use rnaflow_types::{
    BackendResult, STEP_ALIGNMENT, STEP_EDA, STEP_ENRICHMENT, STEP_KALLISTO, STEP_MULTIQC, STEP_QA, STEP_QC, STEP_QUANTIFICATION,
    STEP_REPORT,
};

use super::{Applicability, StepContext, StepExecutor, StepOutput, analysis, report};
use crate::backend::Backend;
use crate::backend::registry::BackendSelection;
use crate::config::ResolvedConfig;
use crate::error::{BackendFailure, StepExecutionError};
use crate::inputs::{InputArtifact, InputDiscovery};
use crate::tool::{ToolInvocation, ToolRunner};

/// Runs each canonical step against the resolved configuration.
pub struct PipelineStepExecutor<'a> {
    config: &'a ResolvedConfig,
    tools: &'a dyn ToolRunner,
    /// Results of this run's alignment step, reused by quantification.
    alignment: IndexMap<String, Vec<BackendResult>>,
}

impl<'a> PipelineStepExecutor<'a> {
    pub fn new(config: &'a ResolvedConfig, tools: &'a dyn ToolRunner) -> Self {
        Self {
            config,
            tools,
            alignment: IndexMap::new(),
        }
    }

    fn discover_inputs(&self) -> Result<Vec<InputArtifact>, StepExecutionError> {
        let input = self.config.input();
        let fastq_dir = input.fastq_dir.as_ref().ok_or(StepExecutionError::MissingSetting("input.fastq_dir"))?;
        InputDiscovery::new(fastq_dir, &input.fastq_pattern)?.discover_for(self.config.sample())
    }

    fn backend_selection(&self) -> BackendSelection {
        BackendSelection::from_config(self.config, &self.config.output().results_dir)
    }

    fn run_qc(&self) -> Result<StepOutput, StepExecutionError> {
        let inputs = self.discover_inputs()?;
        let qc_dir = &self.config.output().qc_dir;
        fs::create_dir_all(qc_dir)?;
        let threads = self.config.parameters().threads.max(1);
        for input in &inputs {
            analysis::run_fastqc(input, qc_dir, threads, self.tools)?;
        }
        Ok(StepOutput::default()
            .with_metadata("inputs", inputs.len())
            .with_metadata("qc_dir", qc_dir.to_string_lossy().into_owned()))
    }

    fn run_alignment(&mut self) -> Result<StepOutput, StepExecutionError> {
        let inputs = self.discover_inputs()?;
        let selection = self.backend_selection();
        let run_quantification = self.config.steps().is_enabled(STEP_QUANTIFICATION);
        let outcome = run_backends(STEP_ALIGNMENT, &selection, &inputs, |backend, input| {
            backend.run(input, run_quantification, self.tools)
        });
        let output = outcome.into_output(STEP_ALIGNMENT, &selection, self.config.parameters().require_all_backends)?;
        self.alignment = output.backends.clone();
        Ok(output.with_metadata("inputs", inputs.len()))
    }

    fn run_quantification(&self) -> Result<StepOutput, StepExecutionError> {
        let inputs = self.discover_inputs()?;
        let selection = self.backend_selection();
        let outcome = run_backends(STEP_QUANTIFICATION, &selection, &inputs, |backend, input| {
            let produced = self.alignment.get(backend.name()).and_then(|results| {
                results
                    .iter()
                    .find(|result| result.sample == input.sample && result.counts_file.is_some())
            });
            match produced {
                Some(result) => Ok(result.clone()),
                None => backend.quantify(&input.sample, &backend.expected_primary_output(&input.sample), self.tools),
            }
        });
        let output = outcome.into_output(STEP_QUANTIFICATION, &selection, self.config.parameters().require_all_backends)?;
        Ok(output.with_metadata("inputs", inputs.len()))
    }

    fn run_multiqc(&self) -> Result<StepOutput, StepExecutionError> {
        let results_dir = &self.config.output().results_dir;
        let report_dir = results_dir.join("multiqc_report");
        fs::create_dir_all(&report_dir)?;
        let mut invocation = ToolInvocation::new("multiqc")
            .path_arg(results_dir)
            .arg("-o")
            .path_arg(&report_dir)
            .log_to(report_dir.join("multiqc.log"));
        if let Some(sample) = self.config.sample() {
            invocation = invocation.args(["-n".to_string(), format!("{sample}_multiqc_report")]);
        }

        let output = StepOutput::default().with_metadata("report_dir", report_dir.to_string_lossy().into_owned());
        match self.tools.run(&invocation) {
            Ok(_) => Ok(output),
            Err(error) => {
                warn!(error = %error, "multiqc failed; continuing without aggregated report");
                Ok(output.with_metadata("multiqc_error", error.to_string()))
            }
        }
    }
}

impl StepExecutor for PipelineStepExecutor<'_> {
    fn applicability(&self, step: &str) -> Applicability {
        if !self.config.steps().is_enabled(step) {
            return Applicability::Disabled("disabled in pipeline_steps".into());
        }
        let parameters = self.config.parameters();
        match step {
            STEP_QC if parameters.skip_fastqc => Applicability::Disabled("skip_fastqc is set".into()),
            STEP_KALLISTO => match &self.config.input().kallisto_abundance {
                Some(path) if self.config.workspace_path(path).exists() => Applicability::Run,
                Some(path) => Applicability::NotApplicable(format!("kallisto abundance file {} not found", path.display())),
                None => Applicability::NotApplicable("no kallisto abundance file configured".into()),
            },
            STEP_ENRICHMENT if !parameters.go_enrichment && !parameters.network_analysis => {
                Applicability::NotApplicable("neither go_enrichment nor network_analysis is enabled".into())
            }
            _ => Applicability::Run,
        }
    }

    fn execute(&mut self, context: &StepContext<'_>) -> anyhow::Result<StepOutput> {
        let output = match context.step {
            STEP_QC => self.run_qc()?,
            STEP_ALIGNMENT => self.run_alignment()?,
            STEP_QUANTIFICATION => self.run_quantification()?,
            STEP_MULTIQC => self.run_multiqc()?,
            STEP_EDA | STEP_QA | STEP_KALLISTO | STEP_ENRICHMENT => analysis::run_script_step(self.config, context.step, self.tools)?,
            STEP_REPORT => report::write_final_report(self.config, context.summary)?,
            other => bail!("no step body for '{other}'"),
        };
        Ok(output)
    }
}

/// Results and failures of running every backend over every input.
#[derive(Debug, Default)]
struct BackendOutcome {
    results: IndexMap<String, Vec<BackendResult>>,
    failures: Vec<BackendFailure>,
}

/// Backends in registry order, inputs in discovery order.
fn run_backends<F>(step: &str, selection: &BackendSelection, inputs: &[InputArtifact], mut run: F) -> BackendOutcome
where
    F: FnMut(&Backend, &InputArtifact) -> Result<BackendResult, BackendFailure>,
{
    let mut outcome = BackendOutcome::default();
    for backend in &selection.backends {
        for input in inputs {
            match run(backend, input) {
                Ok(result) => {
                    info!(step, backend = backend.name(), sample = %input.sample, "backend produced a result");
                    outcome.results.entry(backend.name().to_string()).or_default().push(result);
                }
                Err(failure) => {
                    warn!(step, backend = %failure.backend, sample = %failure.sample, reason = %failure.reason, "backend failed");
                    outcome.failures.push(failure);
                }
            }
        }
    }
    outcome
}

impl BackendOutcome {
    /// Succeeds when any backend produced a result, or with `require_all` only when none failed.
    fn into_output(self, step: &str, selection: &BackendSelection, require_all: bool) -> Result<StepOutput, StepExecutionError> {
        let mut failures: Vec<String> = self.failures.iter().map(ToString::to_string).collect();
        failures.extend(selection.unavailable.iter().map(|(name, error)| format!("{name}: {error}")));

        if self.results.is_empty() {
            return Err(StepExecutionError::NoBackendSucceeded {
                step: step.to_string(),
                failures,
            });
        }
        if require_all && !failures.is_empty() {
            return Err(StepExecutionError::BackendsIncomplete {
                step: step.to_string(),
                failures,
            });
        }

        let unavailable: Vec<Value> = selection
            .unavailable
            .iter()
            .map(|(name, error)| json!({ "backend": name, "reason": error.to_string() }))
            .collect();
        let failed: Vec<Value> = self
            .failures
            .iter()
            .map(|failure| json!({ "backend": failure.backend, "sample": failure.sample, "reason": failure.reason }))
            .collect();
        let names: Vec<&String> = self.results.keys().collect();
        let result_count: usize = self.results.values().map(Vec::len).sum();

        let mut output = StepOutput::default()
            .with_metadata("backends", json!(names))
            .with_metadata("results", result_count)
            .with_metadata("failures", failed)
            .with_metadata("unavailable", unavailable);
        output.backends = self.results;
        Ok(output)
    }
}
