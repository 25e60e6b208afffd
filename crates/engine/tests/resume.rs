use std::cell::RefCell;
use std::fs;
use std::path::Path;

use anyhow::bail;
use chrono::Utc;
use serde_json::{Map, Value, json};

use rnaflow_engine::{
    CHECKPOINT_FILE_NAME, CheckpointError, CheckpointStore, ConfigError, ConfigOverrides, InMemoryCheckpointStore, JsonCheckpointStore,
    Orchestrator, PipelineError, ResultAggregator, RunOptions, SUMMARY_FILE_NAME, StepContext, StepExecutor, StepOutput, ToolError,
    ToolInvocation, ToolOutput, ToolRunner, load_checkpoint, resolve, run_pipeline,
};
use rnaflow_types::{CheckpointDocument, PipelineMode, StepStatus};

/// Counts executions per step; steps listed in `failing` return an error.
#[derive(Default)]
struct SpyExecutor {
    calls: Vec<String>,
    failing: Vec<String>,
}

impl SpyExecutor {
    fn failing(step: &str) -> Self {
        Self {
            calls: Vec::new(),
            failing: vec![step.to_string()],
        }
    }

    fn count(&self, step: &str) -> usize {
        self.calls.iter().filter(|call| *call == step).count()
    }
}

impl StepExecutor for SpyExecutor {
    fn execute(&mut self, context: &StepContext<'_>) -> anyhow::Result<StepOutput> {
        self.calls.push(context.step.to_string());
        if self.failing.iter().any(|step| step == context.step) {
            bail!("{} exploded", context.step);
        }
        Ok(StepOutput::default().with_metadata("step", context.step))
    }
}

/// Records invocations and always succeeds.
#[derive(Default)]
struct RecordingRunner {
    calls: RefCell<Vec<ToolInvocation>>,
}

impl ToolRunner for RecordingRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, ToolError> {
        self.calls.borrow_mut().push(invocation.clone());
        Ok(ToolOutput::default())
    }
}

fn abc() -> Vec<String> {
    vec!["a".into(), "b".into(), "c".into()]
}

fn run(
    store: &mut dyn CheckpointStore,
    executor: &mut SpyExecutor,
    options: RunOptions,
) -> Result<rnaflow_engine::RunReport, PipelineError> {
    Orchestrator::new(abc(), options, store, executor, ResultAggregator::in_memory()).run()
}

fn resume() -> RunOptions {
    RunOptions {
        resume: true,
        ..Default::default()
    }
}

#[test]
fn completed_steps_are_not_rerun_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let mut executor = SpyExecutor::default();

    let mut store = JsonCheckpointStore::open(dir.path()).unwrap();
    run(&mut store, &mut executor, RunOptions::default()).unwrap();
    assert_eq!(executor.calls, abc());

    let mut reopened = JsonCheckpointStore::open(dir.path()).unwrap();
    let report = run(&mut reopened, &mut executor, resume()).unwrap();

    assert!(report.executed.is_empty());
    assert_eq!(report.skipped, abc());
    assert_eq!(executor.count("a"), 1);
    assert_eq!(load_checkpoint(dir.path()).unwrap().last_completed_step.as_deref(), Some("c"));
}

#[test]
fn fail_fast_stops_at_first_failure() {
    let mut store = InMemoryCheckpointStore::new();
    let mut executor = SpyExecutor::failing("b");

    let error = run(&mut store, &mut executor, RunOptions::default()).unwrap_err();

    assert!(matches!(&error, PipelineError::StepFailed { step, message } if step == "b" && message.contains("b exploded")));
    assert_eq!(executor.calls, vec!["a", "b"]);
    assert_eq!(store.status_of("a"), StepStatus::Completed);
    assert_eq!(store.status_of("b"), StepStatus::Failed);
    assert!(store.entry("c").is_none());
    assert_eq!(store.entry("b").unwrap().error_message(), Some("b exploded"));
}

#[test]
fn continue_on_error_runs_remaining_steps() {
    let mut store = InMemoryCheckpointStore::new();
    let mut executor = SpyExecutor::failing("b");
    let options = RunOptions {
        fail_fast: false,
        ..Default::default()
    };

    let report = run(&mut store, &mut executor, options).unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.failed_steps, vec!["b"]);
    assert_eq!(executor.calls, abc());
    assert_eq!(store.status_of("c"), StepStatus::Completed);
    assert_eq!(store.document().failed_steps(), vec!["b"]);
}

#[test]
fn resume_after_failure_reruns_from_failed_step() {
    let mut store = InMemoryCheckpointStore::new();
    run(&mut store, &mut SpyExecutor::failing("b"), RunOptions::default()).unwrap_err();

    let mut executor = SpyExecutor::default();
    let report = run(&mut store, &mut executor, resume()).unwrap();

    assert_eq!(report.executed, vec!["b", "c"]);
    assert_eq!(executor.count("a"), 0);
    assert!(store.document().failed_steps().is_empty());
}

#[test]
fn restart_from_forces_rerun_of_completed_steps() {
    let mut store = InMemoryCheckpointStore::new();
    run(&mut store, &mut SpyExecutor::default(), RunOptions::default()).unwrap();

    let mut executor = SpyExecutor::default();
    let options = RunOptions {
        resume: true,
        restart_from: Some("b".into()),
        ..Default::default()
    };
    let report = run(&mut store, &mut executor, options).unwrap();

    assert_eq!(report.executed, vec!["b", "c"]);
    assert_eq!(report.skipped, vec!["a"]);
    assert_eq!(report.summary.steps["a"].reason.as_deref(), Some("before restart point"));
}

#[test]
fn restart_from_skips_earlier_steps_even_if_they_never_ran() {
    let mut store = InMemoryCheckpointStore::new();
    let mut executor = SpyExecutor::default();
    let options = RunOptions {
        restart_from: Some("c".into()),
        ..Default::default()
    };

    let report = run(&mut store, &mut executor, options).unwrap();

    assert_eq!(executor.calls, vec!["c"]);
    assert_eq!(report.skipped, vec!["a", "b"]);
}

#[test]
fn restart_without_resume_still_clears_previous_checkpoints() {
    let mut document = CheckpointDocument::default();
    document.record("a", StepStatus::Completed, Map::new(), Utc::now());
    let mut store = InMemoryCheckpointStore::with_document(document);
    let mut executor = SpyExecutor::default();
    let options = RunOptions {
        restart_from: Some("b".into()),
        ..Default::default()
    };

    let report = run(&mut store, &mut executor, options).unwrap();

    assert_eq!(executor.calls, vec!["b", "c"]);
    assert_eq!(report.skipped, vec!["a"]);
    assert_eq!(store.status_of("a"), StepStatus::Pending);
    assert_eq!(store.document().last_completed_step.as_deref(), Some("c"));
}

#[test]
fn fresh_run_clears_previous_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = JsonCheckpointStore::open(dir.path()).unwrap();
    store.save("a", StepStatus::Completed, None).unwrap();
    store.save("b", StepStatus::Completed, None).unwrap();

    let mut executor = SpyExecutor::default();
    let report = run(&mut store, &mut executor, RunOptions::default()).unwrap();

    assert_eq!(report.executed, abc());
    assert_eq!(executor.calls, abc());
}

#[test]
fn corrupt_checkpoint_is_fatal_and_left_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CHECKPOINT_FILE_NAME);
    fs::write(&path, "{ \"steps\": ").unwrap();

    let error = JsonCheckpointStore::open(dir.path()).unwrap_err();

    assert!(matches!(error, CheckpointError::Corrupt { .. }));
    assert_eq!(fs::read_to_string(&path).unwrap(), "{ \"steps\": ");
}

#[test]
fn interrupted_step_is_rerun_on_resume() {
    let mut document = CheckpointDocument::default();
    document.record("a", StepStatus::Completed, Map::new(), Utc::now());
    document.record("b", StepStatus::Running, Map::new(), Utc::now());
    let mut store = InMemoryCheckpointStore::with_document(document);

    let mut executor = SpyExecutor::default();
    let report = run(&mut store, &mut executor, resume()).unwrap();

    assert_eq!(report.executed, vec!["b", "c"]);
    assert_eq!(store.status_of("b"), StepStatus::Completed);
}

#[test]
fn unknown_restart_step_is_rejected_before_any_step_runs() {
    let mut document = CheckpointDocument::default();
    document.record("a", StepStatus::Completed, Map::new(), Utc::now());
    let mut store = InMemoryCheckpointStore::with_document(document);
    let mut executor = SpyExecutor::default();
    let options = RunOptions {
        restart_from: Some("trimming".into()),
        ..Default::default()
    };

    let error = run(&mut store, &mut executor, options).unwrap_err();

    assert!(matches!(error, PipelineError::Config(ConfigError::UnknownStep { .. })));
    assert!(executor.calls.is_empty());
    assert_eq!(store.status_of("a"), StepStatus::Completed);
}

fn preprocessing_workspace(root: &Path, parameters: Value) -> rnaflow_engine::ResolvedConfig {
    fs::create_dir_all(root.join("reads")).unwrap();
    fs::create_dir_all(root.join("ref")).unwrap();
    fs::write(root.join("reads/S1.fq.gz"), b"").unwrap();
    fs::write(root.join("reads/S2.fq.gz"), b"").unwrap();
    fs::write(root.join("ref/transcripts.idx"), b"").unwrap();
    let raw = json!({
        "input": { "fastq_dir": "reads" },
        "output": { "results_dir": "results" },
        "genome": { "gtf_file": "ref/genes.gtf" },
        "aligners": {
            "hisat2": { "index_prefix": "ref/genome" },
            "kallisto": { "index": "ref/transcripts.idx" }
        },
        "parameters": parameters,
        "pipeline_steps": {}
    });
    resolve(&raw, root, None, &ConfigOverrides::default()).unwrap()
}

#[test]
fn multi_backend_run_tolerates_unavailable_backend() {
    let dir = tempfile::tempdir().unwrap();
    let config = preprocessing_workspace(dir.path(), json!({ "multi_aligner": true, "skip_fastqc": true }));
    let tools = RecordingRunner::default();
    let mut store = JsonCheckpointStore::open(&config.output().checkpoint_dir).unwrap();

    let report = run_pipeline(&config, PipelineMode::Preprocessing, false, &mut store, &tools).unwrap();

    assert!(report.succeeded());
    assert_eq!(report.skipped, vec!["qc"]);
    let programs: Vec<String> = tools.calls.borrow().iter().map(|call| call.program.clone()).collect();
    assert_eq!(programs, vec!["kallisto", "kallisto", "multiqc"]);

    let alignment = store.entry("alignment").unwrap();
    assert_eq!(alignment.status, StepStatus::Completed);
    assert_eq!(alignment.metadata["unavailable"][0]["backend"], "hisat2");
    assert_eq!(store.status_of("quantification"), StepStatus::Completed);

    let summary: Value = serde_json::from_str(&fs::read_to_string(dir.path().join("results").join(SUMMARY_FILE_NAME)).unwrap()).unwrap();
    assert_eq!(summary["steps"]["alignment"]["backends"]["kallisto"].as_array().unwrap().len(), 2);
    assert_eq!(summary["steps"]["qc"]["outcome"], "skipped");
}

#[test]
fn run_without_any_available_backend_fails_alignment() {
    let dir = tempfile::tempdir().unwrap();
    let config = preprocessing_workspace(dir.path(), json!({ "aligner": "hisat2", "skip_fastqc": true }));
    let tools = RecordingRunner::default();
    let mut store = JsonCheckpointStore::open(&config.output().checkpoint_dir).unwrap();

    let error = run_pipeline(&config, PipelineMode::Preprocessing, false, &mut store, &tools).unwrap_err();

    assert_eq!(error.failed_step(), Some("alignment"));
    let entry = store.entry("alignment").unwrap();
    assert_eq!(entry.status, StepStatus::Failed);
    assert_eq!(entry.metadata["cause"], "backends");
    assert!(tools.calls.borrow().is_empty());
}

#[test]
fn full_mode_shares_one_checkpoint_and_reports_from_the_summary() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("reads")).unwrap();
    fs::create_dir_all(root.join("ref")).unwrap();
    fs::create_dir_all(root.join("counts")).unwrap();
    fs::write(root.join("reads/S1.fq.gz"), b"").unwrap();
    fs::write(root.join("ref/transcripts.idx"), b"").unwrap();
    fs::write(root.join("counts/gene_counts.tsv"), "gene\tS1\n").unwrap();
    let raw = json!({
        "input": { "fastq_dir": "reads", "counts_file": "counts/gene_counts.tsv" },
        "output": { "results_dir": "results", "postprocessing_dir": "post" },
        "genome": {},
        "aligners": { "kallisto": { "index": "ref/transcripts.idx" } },
        "parameters": { "aligner": "kallisto", "skip_fastqc": true },
        "pipeline_steps": {
            "eda": { "command": "Rscript eda.R" },
            "qa": { "command": ["Rscript", "qa.R"] }
        }
    });
    let config = resolve(&raw, root, None, &ConfigOverrides::default()).unwrap();
    let tools = RecordingRunner::default();
    let mut store = JsonCheckpointStore::open(&config.output().checkpoint_dir).unwrap();

    let report = run_pipeline(&config, PipelineMode::Full, false, &mut store, &tools).unwrap();

    assert!(report.succeeded());
    assert_eq!(report.executed, vec!["alignment", "quantification", "multiqc", "eda", "qa", "report"]);
    assert_eq!(report.skipped, vec!["qc", "kallisto", "enrichment"]);
    let programs: Vec<String> = tools.calls.borrow().iter().map(|call| call.program.clone()).collect();
    assert_eq!(programs, vec!["kallisto", "multiqc", "Rscript", "Rscript"]);

    let document = load_checkpoint(&config.output().checkpoint_dir).unwrap();
    for step in ["alignment", "quantification", "multiqc", "eda", "qa", "report"] {
        assert_eq!(document.status_of(step), StepStatus::Completed, "{step}");
    }
    assert_eq!(document.last_completed_step.as_deref(), Some("report"));

    let markdown = fs::read_to_string(root.join("post/final_report.md")).unwrap();
    assert!(markdown.contains("| alignment | completed |"));
    assert!(markdown.contains("| kallisto | skipped | - | no kallisto abundance file configured |"));
    assert!(markdown.contains("| enrichment | skipped | - | neither go_enrichment nor network_analysis is enabled |"));
    assert!(markdown.contains("| kallisto | S1 | `abundance.tsv` | abundance.tsv |"));
    assert!(markdown.contains("- Input counts file: `gene_counts.tsv`"));

    let mut reopened = JsonCheckpointStore::open(&config.output().checkpoint_dir).unwrap();
    let resumed = run_pipeline(&config, PipelineMode::Full, true, &mut reopened, &tools).unwrap();
    assert!(resumed.executed.is_empty());
    assert_eq!(tools.calls.borrow().len(), 4);
}
