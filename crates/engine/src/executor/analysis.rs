//! Quality control and script-driven analysis steps.
//!
//! Analysis steps (`eda`, `qa`, `kallisto`, `enrichment`) run an operator-configured command
//! from `pipeline_steps.<step>.command`. The command receives its inputs through
//! `RNAFLOW_*` environment variables and runs inside the postprocessing directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use rnaflow_types::{STEP_ENRICHMENT, STEP_KALLISTO};

use super::StepOutput;
use crate::config::ResolvedConfig;
use crate::error::{StepExecutionError, ToolError};
use crate::inputs::InputArtifact;
use crate::tool::{ToolInvocation, ToolRunner};

/// Run FastQC for one input, writing reports and a log into `qc_dir`.
pub fn run_fastqc(input: &InputArtifact, qc_dir: &Path, threads: usize, tools: &dyn ToolRunner) -> Result<(), ToolError> {
    let invocation = ToolInvocation::new("fastqc")
        .arg("-o")
        .path_arg(qc_dir)
        .args(["-t".to_string(), threads.to_string()])
        .path_arg(&input.path)
        .log_to(qc_dir.join(format!("{}_fastqc.log", input.sample)));
    tools.run(&invocation)?;
    info!(sample = %input.sample, "fastqc finished");
    Ok(())
}

/// Directory an analysis step writes into.
pub fn analysis_output_dir(postprocessing_dir: &Path, step: &str) -> PathBuf {
    match step {
        STEP_KALLISTO => postprocessing_dir.join("kallisto_analysis"),
        STEP_ENRICHMENT => postprocessing_dir.join("enrichment"),
        _ => postprocessing_dir.to_path_buf(),
    }
}

/// The configured counts table, or `<dir>/<base>_counts.tsv` when that one is missing.
pub fn resolve_counts_file(configured: &Path) -> Option<PathBuf> {
    if configured.exists() {
        return Some(configured.to_path_buf());
    }
    let name = configured.file_name()?.to_str()?;
    let base = name
        .strip_suffix(".bam_counts.tsv")
        .or_else(|| name.strip_suffix("_counts.tsv"))
        .unwrap_or(name);
    let candidate = configured.with_file_name(format!("{base}_counts.tsv"));
    if candidate.exists() {
        warn!(configured = %configured.display(), using = %candidate.display(), "counts file not found; using fallback");
        Some(candidate)
    } else {
        None
    }
}

/// Run the configured command for an analysis step.
pub fn run_script_step(config: &ResolvedConfig, step: &str, tools: &dyn ToolRunner) -> Result<StepOutput, StepExecutionError> {
    let not_configured = || StepExecutionError::NotConfigured { step: step.to_string() };
    let argv = config.steps().command(step).ok_or_else(not_configured)?;
    let postprocessing_dir = &config.output().postprocessing_dir;
    let output_dir = analysis_output_dir(postprocessing_dir, step);
    fs::create_dir_all(&output_dir)?;

    let parameters = config.parameters();
    let input = config.input();
    let mut invocation = ToolInvocation::from_argv(argv)
        .ok_or_else(not_configured)?
        .current_dir(postprocessing_dir)
        .log_to(postprocessing_dir.join(format!("{step}.log")))
        .env("RNAFLOW_STEP", step)
        .env("RNAFLOW_OUTPUT_DIR", output_dir.to_string_lossy())
        .env("RNAFLOW_THREADS", parameters.threads.to_string())
        .env("RNAFLOW_GENE_THRESHOLD", parameters.gene_threshold.to_string())
        .env("RNAFLOW_GO_ENRICHMENT", parameters.go_enrichment.to_string())
        .env("RNAFLOW_NETWORK_ANALYSIS", parameters.network_analysis.to_string());
    if let Some(sample) = config.sample() {
        invocation = invocation.env("RNAFLOW_SAMPLE", sample);
    }
    if let Some(metadata_file) = &input.metadata_file {
        invocation = invocation.env("RNAFLOW_METADATA_FILE", metadata_file.to_string_lossy());
    }

    let input_file = if step == STEP_KALLISTO {
        let abundance = input
            .kallisto_abundance
            .as_deref()
            .map(|path| config.workspace_path(path))
            .ok_or(StepExecutionError::MissingSetting("input.kallisto_abundance"))?;
        if !abundance.exists() {
            return Err(StepExecutionError::MissingInput(abundance));
        }
        invocation = invocation.env("RNAFLOW_KALLISTO_ABUNDANCE", abundance.to_string_lossy());
        abundance
    } else {
        let configured = input
            .counts_file
            .as_deref()
            .ok_or(StepExecutionError::MissingSetting("input.counts_file"))?;
        let counts = resolve_counts_file(configured).ok_or_else(|| StepExecutionError::MissingInput(configured.to_path_buf()))?;
        invocation = invocation.env("RNAFLOW_COUNTS_FILE", counts.to_string_lossy());
        counts
    };

    info!(step, command = %invocation, "running analysis command");
    tools.run(&invocation)?;

    Ok(StepOutput::default()
        .with_metadata("command", invocation.command_line())
        .with_metadata("input_file", input_file.to_string_lossy().into_owned())
        .with_metadata("output_dir", output_dir.to_string_lossy().into_owned())
        .with_metadata("outputs", Value::from(list_outputs(&output_dir))))
}

/// File names directly inside `dir`, sorted.
fn list_outputs(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigOverrides, resolve};
    use crate::tool::fake::FakeToolRunner;
    use serde_json::json;

    fn config(dir: &Path, input: Value, steps: Value) -> ResolvedConfig {
        let raw = json!({
            "input": input,
            "output": { "results_dir": "results", "postprocessing_dir": "post" },
            "genome": {},
            "aligners": {},
            "parameters": { "threads": 2, "go_enrichment": true },
            "pipeline_steps": steps
        });
        resolve(&raw, dir, Some("S1"), &ConfigOverrides::default()).unwrap()
    }

    fn env_of<'a>(invocation: &'a ToolInvocation, key: &str) -> Option<&'a str> {
        invocation.env.iter().find(|(name, _)| name == key).map(|(_, value)| value.as_str())
    }

    #[test]
    fn counts_file_falls_back_to_counts_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join("S1_counts.tsv");
        fs::write(&fallback, "gene\tS1\n").unwrap();

        assert_eq!(resolve_counts_file(&dir.path().join("S1.bam_counts.tsv")), Some(fallback.clone()));
        assert_eq!(resolve_counts_file(&dir.path().join("S1")), Some(fallback.clone()));
        assert_eq!(resolve_counts_file(&fallback), Some(fallback));
        assert_eq!(resolve_counts_file(&dir.path().join("S2_counts.tsv")), None);
    }

    #[test]
    fn script_step_passes_inputs_through_environment() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("S1_counts.tsv"), "gene\tS1\n").unwrap();
        let config = config(
            dir.path(),
            json!({ "counts_file": "${sample}.bam_counts.tsv" }),
            json!({ "eda": { "command": "Rscript scripts/eda.R --verbose" } }),
        );
        let tools = FakeToolRunner::new();

        let output = run_script_step(&config, "eda", &tools).unwrap();

        let calls = tools.calls.borrow();
        let call = &calls[0];
        assert_eq!(call.program, "Rscript");
        assert_eq!(call.args, vec!["scripts/eda.R", "--verbose"]);
        assert_eq!(call.working_dir.as_deref(), Some(dir.path().join("post").as_path()));
        assert_eq!(env_of(call, "RNAFLOW_STEP"), Some("eda"));
        assert_eq!(env_of(call, "RNAFLOW_THREADS"), Some("2"));
        assert_eq!(env_of(call, "RNAFLOW_SAMPLE"), Some("S1"));
        assert_eq!(env_of(call, "RNAFLOW_COUNTS_FILE").map(PathBuf::from), Some(dir.path().join("S1_counts.tsv")));
        assert_eq!(output.metadata["command"], "Rscript scripts/eda.R --verbose");
    }

    #[test]
    fn script_step_without_command_is_not_configured() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), json!({}), json!({ "qa": true }));
        let error = run_script_step(&config, "qa", &FakeToolRunner::new()).unwrap_err();
        assert!(matches!(error, StepExecutionError::NotConfigured { ref step } if step == "qa"));
    }

    #[test]
    fn missing_counts_file_is_a_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(
            dir.path(),
            json!({ "counts_file": "absent.tsv" }),
            json!({ "enrichment": { "command": ["python", "go.py"] } }),
        );
        let tools = FakeToolRunner::new();
        let error = run_script_step(&config, "enrichment", &tools).unwrap_err();
        assert!(matches!(error, StepExecutionError::MissingInput(_)));
        assert!(tools.calls.borrow().is_empty());
    }

    #[test]
    fn kallisto_step_writes_into_its_own_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("abundance.tsv"), "target_id\test_counts\n").unwrap();
        let config = config(
            dir.path(),
            json!({ "kallisto_abundance": "abundance.tsv" }),
            json!({ "kallisto": { "command": ["Rscript", "kallisto.R"] } }),
        );
        let tools = FakeToolRunner::new();

        let output = run_script_step(&config, "kallisto", &tools).unwrap();

        let expected = dir.path().join("post/kallisto_analysis");
        assert!(expected.is_dir());
        assert_eq!(output.metadata["output_dir"], expected.to_string_lossy().as_ref());
        let calls = tools.calls.borrow();
        assert!(env_of(&calls[0], "RNAFLOW_KALLISTO_ABUNDANCE").is_some());
        assert!(env_of(&calls[0], "RNAFLOW_COUNTS_FILE").is_none());
    }

    #[test]
    fn tool_failures_propagate() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("counts.tsv"), "gene\n").unwrap();
        let config = config(
            dir.path(),
            json!({ "counts_file": "counts.tsv" }),
            json!({ "qa": { "command": ["Rscript", "qa.R"] } }),
        );
        let error = run_script_step(&config, "qa", &FakeToolRunner::new().failing("Rscript")).unwrap_err();
        assert_eq!(error.cause(), "tool");
    }

    #[test]
    fn fastqc_logs_per_sample() {
        let dir = tempfile::tempdir().unwrap();
        let tools = FakeToolRunner::new();
        let input = InputArtifact::from_path(dir.path().join("S3.fastq.gz"));
        run_fastqc(&input, dir.path(), 8, &tools).unwrap();
        let calls = tools.calls.borrow();
        assert_eq!(calls[0].program, "fastqc");
        assert!(calls[0].args.windows(2).any(|pair| pair == ["-t", "8"]));
        assert_eq!(calls[0].log_file, Some(dir.path().join("S3_fastqc.log")));
    }
}
