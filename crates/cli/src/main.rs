use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rnaflow_engine::{
    ConfigOverrides, JsonCheckpointStore, PipelineError, ProcessToolRunner, ResolvedConfig, RunReport, discard_checkpoint,
    load_checkpoint, load_resolved_config, run_pipeline,
};
use rnaflow_types::{CheckpointDocument, PipelineMode, StepOutcome};

/// Every step ran or was skipped without failure.
const EXIT_SUCCESS: u8 = 0;
/// At least one step failed.
const EXIT_STEP_FAILED: u8 = 1;
/// Configuration or checkpoint problems stopped the run before or between steps.
const EXIT_CONFIG_ERROR: u8 = 2;

/// Run bulk RNA-seq pipelines with checkpoint/resume.
#[derive(Parser, Debug)]
#[command(name = "rnaflow", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline
    Run(RunArgs),
    /// Show the checkpoint state
    Status(WorkspaceArgs),
    /// Remove the checkpoint so the next run starts over
    Clear(WorkspaceArgs),
}

#[derive(Args, Debug)]
struct WorkspaceArgs {
    /// Pipeline configuration (YAML or JSON)
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Directory relative paths in the configuration resolve against [default: current directory]
    #[arg(long, env = "RNAFLOW_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// Sample name substituted for ${sample} in the configuration
    #[arg(long)]
    sample: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,

    /// preprocessing, postprocessing, or full
    #[arg(long, default_value = "preprocessing")]
    mode: PipelineMode,

    /// Keep the checkpoint and skip completed steps
    #[arg(long)]
    resume: bool,

    /// Skip every step before this one and re-run it and all later steps
    #[arg(long)]
    restart_from: Option<String>,

    #[arg(long)]
    skip_fastqc: bool,

    /// Run every configured backend
    #[arg(long)]
    multi_aligner: bool,

    /// Backend to use when not running every backend
    #[arg(long)]
    aligner: Option<String>,

    /// Record step failures and keep going
    #[arg(long)]
    continue_on_error: bool,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            aligner: self.aligner.clone(),
            multi_aligner: self.multi_aligner,
            skip_fastqc: self.skip_fastqc,
            restart_from: self.restart_from.clone(),
            continue_on_error: self.continue_on_error,
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(exit_code_for(&error))
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter(log_filter()).with_writer(std::io::stderr).try_init();
}

/// `RUST_LOG` when set and valid, otherwise `info`.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn dispatch(cli: Cli) -> Result<u8> {
    match cli.command {
        Command::Run(args) => run_command(&args),
        Command::Status(args) => status_command(&args),
        Command::Clear(args) => clear_command(&args),
    }
}

fn exit_code_for(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<PipelineError>() {
        Some(PipelineError::StepFailed { .. }) => EXIT_STEP_FAILED,
        _ => EXIT_CONFIG_ERROR,
    }
}

fn workspace_root(args: &WorkspaceArgs) -> Result<PathBuf> {
    match &args.workspace_root {
        Some(root) => Ok(root.clone()),
        None => std::env::current_dir().context("cannot determine the current directory"),
    }
}

fn load_config(args: &WorkspaceArgs, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let root = workspace_root(args)?;
    load_resolved_config(&args.config, &root, args.sample.as_deref(), overrides)
        .with_context(|| format!("invalid configuration {}", args.config.display()))
}

fn run_command(args: &RunArgs) -> Result<u8> {
    let config = load_config(&args.workspace, &args.overrides())?;
    let mut store = JsonCheckpointStore::open(&config.output().checkpoint_dir)?;
    info!(mode = %args.mode, checkpoint = %store.path().display(), "starting pipeline");

    let report = run_pipeline(&config, args.mode, args.resume, &mut store, &ProcessToolRunner)?;
    print!("{}", render_run_report(&report));
    if report.succeeded() { Ok(EXIT_SUCCESS) } else { Ok(EXIT_STEP_FAILED) }
}

fn status_command(args: &WorkspaceArgs) -> Result<u8> {
    let config = load_config(args, &ConfigOverrides::default())?;
    let checkpoint_dir = &config.output().checkpoint_dir;
    let document = load_checkpoint(checkpoint_dir)?;
    print!("{}", render_status(&document, checkpoint_dir, &args.config));
    Ok(EXIT_SUCCESS)
}

fn clear_command(args: &WorkspaceArgs) -> Result<u8> {
    let config = load_config(args, &ConfigOverrides::default())?;
    let checkpoint_dir = &config.output().checkpoint_dir;
    if discard_checkpoint(checkpoint_dir)? {
        println!("Cleared checkpoints in {}", checkpoint_dir.display());
    } else {
        println!("No checkpoints to clear in {}", checkpoint_dir.display());
    }
    Ok(EXIT_SUCCESS)
}

fn render_run_report(report: &RunReport) -> String {
    let mut out = String::new();
    for (step, step_report) in &report.summary.steps {
        let detail = match step_report.outcome {
            StepOutcome::Completed => step_report.duration_ms.map(|ms| format!("{ms} ms")).unwrap_or_default(),
            StepOutcome::Failed => step_report.error.clone().unwrap_or_default(),
            StepOutcome::Skipped => step_report.reason.clone().unwrap_or_default(),
        };
        out.push_str(&format!("{step:<16} {:<10} {detail}\n", step_report.outcome.as_str()));
    }
    if report.succeeded() {
        out.push_str("Pipeline completed successfully\n");
    } else {
        out.push_str(&format!("Pipeline finished with failed steps: {}\n", report.failed_steps.join(", ")));
    }
    out
}

fn render_status(document: &CheckpointDocument, checkpoint_dir: &Path, config_path: &Path) -> String {
    if document.is_empty() {
        return format!("No checkpoints recorded in {}\n", checkpoint_dir.display());
    }
    let mut out = format!("Checkpoints in {}\n\n", checkpoint_dir.display());
    out.push_str(&format!("{:<16} {:<10} {:<26} {}\n", "STEP", "STATUS", "UPDATED", "ERROR"));
    for (step, entry) in &document.steps {
        out.push_str(&format!(
            "{step:<16} {:<10} {:<26} {}\n",
            entry.status.as_str(),
            entry.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            entry.error_message().unwrap_or("")
        ));
    }
    out.push('\n');
    out.push_str(&format!(
        "Last completed step: {}\n",
        document.last_completed_step.as_deref().unwrap_or("none")
    ));
    let failed = document.failed_steps();
    if !failed.is_empty() {
        out.push_str(&format!("Failed steps: {}\n", failed.join(", ")));
    }
    out.push_str(&format!("Resume with: rnaflow run --config {} --resume\n", config_path.display()));
    out
}
