//! Typed views over the resolved configuration sections.
//!
//! Every path in these structs is already absolute: they are decoded after
//! [`super::resolver::resolve`] has rewritten path-like entries.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

pub const DEFAULT_FASTQ_PATTERN: &str = "*.fq.gz";
pub const DEFAULT_RESULTS_DIR: &str = "results/preprocessing";
pub const DEFAULT_THREADS: usize = 4;
pub const DEFAULT_GENE_THRESHOLD: u32 = 10;

fn default_true() -> bool {
    true
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

fn default_gene_threshold() -> u32 {
    DEFAULT_GENE_THRESHOLD
}

fn default_fastq_pattern() -> String {
    DEFAULT_FASTQ_PATTERN.to_string()
}

/// `parameters` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineParameters {
    /// Backend used when `multi_aligner` is off.
    #[serde(default)]
    pub aligner: Option<String>,
    /// Run every configured backend instead of a single one.
    #[serde(default)]
    pub multi_aligner: bool,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub restart_from: Option<String>,
    #[serde(default)]
    pub skip_fastqc: bool,
    /// Stop at the first failing step.
    #[serde(default = "default_true")]
    pub fail_fast: bool,
    #[serde(default)]
    pub go_enrichment: bool,
    #[serde(default)]
    pub network_analysis: bool,
    /// Alignment-class steps fail unless every requested backend produced a result.
    #[serde(default)]
    pub require_all_backends: bool,
    #[serde(default = "default_gene_threshold")]
    pub gene_threshold: u32,
}

impl Default for PipelineParameters {
    fn default() -> Self {
        Self {
            aligner: None,
            multi_aligner: false,
            threads: DEFAULT_THREADS,
            restart_from: None,
            skip_fastqc: false,
            fail_fast: true,
            go_enrichment: false,
            network_analysis: false,
            require_all_backends: false,
            gene_threshold: DEFAULT_GENE_THRESHOLD,
        }
    }
}

/// `input` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputSettings {
    #[serde(default)]
    pub fastq_dir: Option<PathBuf>,
    #[serde(default = "default_fastq_pattern")]
    pub fastq_pattern: String,
    /// Gene counts table consumed by postprocessing.
    #[serde(default)]
    pub counts_file: Option<PathBuf>,
    #[serde(default)]
    pub kallisto_abundance: Option<PathBuf>,
    #[serde(default)]
    pub metadata_file: Option<PathBuf>,
}

/// `genome` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GenomeSettings {
    #[serde(default)]
    pub gtf_file: Option<PathBuf>,
}

#[derive(Deserialize)]
struct RawOutput {
    #[serde(default)]
    results_dir: Option<PathBuf>,
    #[serde(default)]
    checkpoint_dir: Option<PathBuf>,
    #[serde(default)]
    qc_dir: Option<PathBuf>,
    #[serde(default)]
    fastqc_dir: Option<PathBuf>,
    #[serde(default)]
    postprocessing_dir: Option<PathBuf>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Output directories with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub results_dir: PathBuf,
    /// Holds `.pipeline_checkpoint.json`. Defaults to `results_dir`.
    pub checkpoint_dir: PathBuf,
    pub qc_dir: PathBuf,
    pub postprocessing_dir: PathBuf,
    /// Any other `*_dir` entries of the `output` section.
    pub extra_dirs: Vec<PathBuf>,
}

impl OutputLayout {
    pub(crate) fn from_section(section: &Value, workspace_root: &Path) -> Result<Self, ConfigError> {
        let raw: RawOutput = decode("output", section)?;
        let results_dir = raw.results_dir.unwrap_or_else(|| workspace_root.join(DEFAULT_RESULTS_DIR));
        let extra_dirs = raw
            .rest
            .iter()
            .filter(|(key, _)| key.ends_with("_dir"))
            .filter_map(|(_, value)| value.as_str())
            .filter(|text| !text.trim().is_empty())
            .map(PathBuf::from)
            .collect();
        Ok(Self {
            checkpoint_dir: raw.checkpoint_dir.unwrap_or_else(|| results_dir.clone()),
            qc_dir: raw.qc_dir.or(raw.fastqc_dir).unwrap_or_else(|| results_dir.join("fastqc_results")),
            postprocessing_dir: raw.postprocessing_dir.unwrap_or_else(|| results_dir.join("postprocessing")),
            results_dir,
            extra_dirs,
        })
    }

    /// Every directory the pipeline writes into, without duplicates.
    pub fn all_dirs(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = Vec::new();
        let candidates = [&self.results_dir, &self.checkpoint_dir, &self.qc_dir, &self.postprocessing_dir]
            .into_iter()
            .chain(self.extra_dirs.iter());
        for dir in candidates {
            if !dirs.contains(&dir.as_path()) {
                dirs.push(dir.as_path());
            }
        }
        dirs
    }
}

/// Per-step switches from `pipeline_steps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSettings {
    pub enabled: bool,
    /// External program and arguments for analysis steps driven by scripts.
    pub command: Vec<String>,
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            command: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CommandSpec {
    Argv(Vec<String>),
    Line(String),
}

impl CommandSpec {
    fn into_argv(self) -> Vec<String> {
        match self {
            CommandSpec::Argv(argv) => argv,
            CommandSpec::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        }
    }
}

#[derive(Deserialize)]
struct RawStepSettings {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    command: Option<CommandSpec>,
}

/// Historical spellings accepted in `pipeline_steps`.
const STEP_ALIASES: &[(&str, &str)] = &[("fastqc", "qc")];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSteps {
    entries: IndexMap<String, StepSettings>,
}

impl PipelineSteps {
    pub(crate) fn from_section(section: &Value) -> Result<Self, ConfigError> {
        let Value::Object(map) = section else {
            return Err(malformed("pipeline_steps", "expected a mapping of step names"));
        };
        let mut entries = IndexMap::new();
        for (key, value) in map {
            let settings = match value {
                Value::Null => StepSettings::default(),
                Value::Bool(enabled) => StepSettings {
                    enabled: *enabled,
                    command: Vec::new(),
                },
                Value::Object(_) => {
                    let raw: RawStepSettings = decode(&format!("pipeline_steps.{key}"), value)?;
                    StepSettings {
                        enabled: raw.enabled,
                        command: raw.command.map(CommandSpec::into_argv).unwrap_or_default(),
                    }
                }
                other => {
                    return Err(malformed(
                        &format!("pipeline_steps.{key}"),
                        &format!("expected a boolean or a mapping, found {other}"),
                    ));
                }
            };
            let name = STEP_ALIASES
                .iter()
                .find(|(alias, _)| alias == key)
                .map(|(_, canonical)| canonical.to_string())
                .unwrap_or_else(|| key.clone());
            entries.insert(name, settings);
        }
        Ok(Self { entries })
    }

    /// Steps absent from the section are enabled.
    pub fn is_enabled(&self, step: &str) -> bool {
        self.entries.get(step).map(|settings| settings.enabled).unwrap_or(true)
    }

    pub fn command(&self, step: &str) -> Option<&[String]> {
        self.entries
            .get(step)
            .map(|settings| settings.command.as_slice())
            .filter(|command| !command.is_empty())
    }
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(section: &str, value: &Value) -> Result<T, ConfigError> {
    serde_json::from_value(value.clone()).map_err(|error| malformed(section, &error.to_string()))
}

fn malformed(section: &str, message: &str) -> ConfigError {
    ConfigError::Malformed {
        section: section.to_string(),
        message: message.to_string(),
    }
}
