//! Markdown report rendered by the `report` step.

use std::fmt::{self, Write as _};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use rnaflow_types::{RunSummary, StepOutcome};
use rnaflow_util::write_atomic;

use super::StepOutput;
use crate::config::ResolvedConfig;
use crate::error::StepExecutionError;

pub const REPORT_FILE_NAME: &str = "final_report.md";

/// Statistics written by the `qa` step, embedded when present.
const QUALITY_STATS_FILE: &str = "quality_stats.txt";
const GO_SUMMARY_FILE: &str = "enrichment/go_enrichment_summary.txt";
const NETWORK_SUMMARY_FILE: &str = "enrichment/string_network_summary.txt";
const KALLISTO_DIR: &str = "kallisto_analysis";
const FIGURE_EXTENSIONS: &[&str] = &["png", "pdf"];

/// Render `final_report.md` into the postprocessing directory.
pub fn write_final_report(config: &ResolvedConfig, summary: &RunSummary) -> Result<StepOutput, StepExecutionError> {
    let dir = &config.output().postprocessing_dir;
    fs::create_dir_all(dir)?;
    let markdown = render_report(config, summary, dir).map_err(io::Error::other)?;
    let path = dir.join(REPORT_FILE_NAME);
    write_atomic(&path, markdown.as_bytes())?;
    info!(path = %path.display(), "final report written");
    Ok(StepOutput::default().with_metadata("report_file", path.to_string_lossy().into_owned()))
}

pub fn render_report(config: &ResolvedConfig, summary: &RunSummary, dir: &Path) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "# RNA-Seq Analysis Final Report\n")?;
    writeln!(out, "*Generated on: {}*\n", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))?;

    writeln!(out, "## Input Data Summary")?;
    let input = config.input();
    if let Some(sample) = config.sample() {
        writeln!(out, "- Sample: `{sample}`")?;
    }
    if let Some(counts) = &input.counts_file {
        writeln!(out, "- Input counts file: `{}`", file_name(counts))?;
    }
    if let Some(abundance) = &input.kallisto_abundance {
        writeln!(out, "- Kallisto abundance file: `{}`", file_name(abundance))?;
    }
    if let Some(metadata) = &input.metadata_file {
        writeln!(out, "- Sample metadata: `{}`", file_name(metadata))?;
    }
    writeln!(out)?;

    writeln!(out, "## Pipeline Steps")?;
    writeln!(out, "| Step | Outcome | Duration (ms) | Notes |")?;
    writeln!(out, "|------|---------|---------------|-------|")?;
    for (step, report) in &summary.steps {
        let duration = report.duration_ms.map(|ms| ms.to_string()).unwrap_or_else(|| "-".into());
        let note = report.error.as_deref().or(report.reason.as_deref()).unwrap_or("");
        writeln!(out, "| {step} | {} | {duration} | {} |", report.outcome.as_str(), table_cell(note))?;
    }
    writeln!(out)?;

    embed_file(&mut out, "Quality Control Metrics", &dir.join(QUALITY_STATS_FILE))?;
    embed_file(&mut out, "Gene Ontology Enrichment Analysis", &dir.join(GO_SUMMARY_FILE))?;
    embed_file(&mut out, "STRING Network Analysis", &dir.join(NETWORK_SUMMARY_FILE))?;

    let kallisto_figures = figures_in(&dir.join(KALLISTO_DIR));
    if !kallisto_figures.is_empty() {
        writeln!(out, "## Kallisto Quantification Results")?;
        writeln!(out, "Generated visualizations:")?;
        for figure in &kallisto_figures {
            writeln!(out, "- `{}`", file_name(figure))?;
        }
        writeln!(out)?;
    }

    let backend_results: Vec<_> = summary.backend_results().collect();
    if !backend_results.is_empty() {
        writeln!(out, "## Backend Results")?;
        writeln!(out, "| Backend | Sample | Primary output | Counts |")?;
        writeln!(out, "|---------|--------|----------------|--------|")?;
        for result in backend_results {
            let counts = result.counts_file.as_deref().map(file_name).unwrap_or_else(|| "-".into());
            writeln!(
                out,
                "| {} | {} | `{}` | {counts} |",
                result.backend,
                result.sample,
                file_name(&result.primary_output)
            )?;
        }
        writeln!(out)?;
    }

    let failed: Vec<_> = summary
        .steps
        .iter()
        .filter(|(_, report)| report.outcome == StepOutcome::Failed)
        .collect();
    if !failed.is_empty() {
        writeln!(out, "## Failed Steps")?;
        for (step, report) in failed {
            writeln!(out, "- `{step}`: {}", report.error.as_deref().unwrap_or("unknown error"))?;
        }
        writeln!(out)?;
    }

    writeln!(out, "## Generated Files Summary")?;
    writeln!(out, "- `{REPORT_FILE_NAME}`: This comprehensive report")?;
    for figure in figures_in_tree(dir) {
        let relative = figure.strip_prefix(dir).unwrap_or(&figure);
        writeln!(out, "- `{}`", relative.display())?;
    }
    Ok(out)
}

fn embed_file(out: &mut String, title: &str, path: &Path) -> fmt::Result {
    let Ok(content) = fs::read_to_string(path) else {
        return Ok(());
    };
    writeln!(out, "## {title}")?;
    writeln!(out, "```\n{}\n```\n", content.trim_end())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn is_figure(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| FIGURE_EXTENSIONS.contains(&extension))
}

fn figures_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut figures: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_figure(path))
        .collect();
    figures.sort();
    figures
}

fn figures_in_tree(dir: &Path) -> Vec<PathBuf> {
    let mut figures = figures_in(dir);
    let Ok(entries) = fs::read_dir(dir) else {
        return figures;
    };
    let mut subdirs: Vec<PathBuf> = entries.filter_map(Result::ok).map(|entry| entry.path()).filter(|path| path.is_dir()).collect();
    subdirs.sort();
    for subdir in subdirs {
        figures.extend(figures_in_tree(&subdir));
    }
    figures
}
