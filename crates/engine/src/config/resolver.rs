//! Turns a raw configuration document into a [`ResolvedConfig`].
//!
//! Resolution works on a deep copy of the caller's document and proceeds in a fixed order:
//!
//! 1. Check that the required top-level sections are present.
//! 2. Replace the `${sample}` token in every string when a sample name is supplied.
//! 3. Make every path-like entry absolute against the workspace root.
//! 4. Overlay command-line overrides onto `parameters`.
//! 5. Decode the typed section views.
//!
//! Nothing here touches the filesystem beyond making the workspace root absolute;
//! directory creation lives in [`ensure_directories`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use rnaflow_util::{is_path_like_key, resolve_against};

use super::settings::{GenomeSettings, InputSettings, OutputLayout, PipelineParameters, PipelineSteps, decode};
use crate::error::ConfigError;

/// Token replaced by the sample name in every configuration string.
pub const SAMPLE_PLACEHOLDER: &str = "${sample}";

/// Sections that must be present in every configuration.
pub const REQUIRED_SECTIONS: &[&str] = &["input", "output", "genome", "parameters", "pipeline_steps"];

/// Accepted names for the backend section; the first one present wins.
pub const BACKEND_SECTIONS: &[&str] = &["backends", "aligners"];

/// Command-line flags that take precedence over `parameters`.
///
/// Only flags that were actually given are written; an absent flag never clears a configured value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub aligner: Option<String>,
    pub multi_aligner: bool,
    pub skip_fastqc: bool,
    pub restart_from: Option<String>,
    pub continue_on_error: bool,
}

impl ConfigOverrides {
    fn apply(&self, parameters: &mut Map<String, Value>) {
        if let Some(aligner) = &self.aligner {
            parameters.insert("aligner".into(), Value::String(aligner.clone()));
        }
        if self.multi_aligner {
            parameters.insert("multi_aligner".into(), Value::Bool(true));
        }
        if self.skip_fastqc {
            parameters.insert("skip_fastqc".into(), Value::Bool(true));
        }
        if let Some(step) = &self.restart_from {
            parameters.insert("restart_from".into(), Value::String(step.clone()));
        }
        if self.continue_on_error {
            parameters.insert("fail_fast".into(), Value::Bool(false));
        }
    }
}

/// Immutable configuration for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    workspace_root: PathBuf,
    sample: Option<String>,
    document: Value,
    backend_section: &'static str,
    input: InputSettings,
    output: OutputLayout,
    genome: GenomeSettings,
    parameters: PipelineParameters,
    steps: PipelineSteps,
}

impl ResolvedConfig {
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Anchor `path` at the workspace root when it is relative.
    ///
    /// For settings whose key does not mark them as paths, such as `input.kallisto_abundance`.
    pub fn workspace_path(&self, path: &Path) -> PathBuf {
        self.workspace_root.join(path)
    }

    pub fn sample(&self) -> Option<&str> {
        self.sample.as_deref()
    }

    /// The fully resolved document, including sections the engine does not interpret.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn input(&self) -> &InputSettings {
        &self.input
    }

    pub fn output(&self) -> &OutputLayout {
        &self.output
    }

    pub fn genome(&self) -> &GenomeSettings {
        &self.genome
    }

    pub fn parameters(&self) -> &PipelineParameters {
        &self.parameters
    }

    pub fn steps(&self) -> &PipelineSteps {
        &self.steps
    }

    /// Backend entries in file order.
    pub fn backends(&self) -> Option<&Map<String, Value>> {
        self.document.get(self.backend_section).and_then(Value::as_object)
    }

    pub fn backend_config(&self, name: &str) -> Option<&Map<String, Value>> {
        self.backends().and_then(|backends| backends.get(name)).and_then(Value::as_object)
    }
}

/// Resolve `raw` against `workspace_root`.
///
/// `raw` is never modified. Feeding the resolved document back through this function
/// yields the same document.
pub fn resolve(
    raw: &Value,
    workspace_root: &Path,
    sample_name: Option<&str>,
    overrides: &ConfigOverrides,
) -> Result<ResolvedConfig, ConfigError> {
    let root = std::path::absolute(workspace_root).map_err(|source| ConfigError::Io {
        path: workspace_root.to_path_buf(),
        source,
    })?;
    let Value::Object(sections) = raw else {
        return Err(ConfigError::Malformed {
            section: "<root>".into(),
            message: "configuration must be a mapping".into(),
        });
    };
    for section in REQUIRED_SECTIONS {
        if !sections.contains_key(*section) {
            return Err(ConfigError::MissingSection(*section));
        }
    }
    let backend_section = BACKEND_SECTIONS
        .iter()
        .copied()
        .find(|name| sections.contains_key(*name))
        .ok_or(ConfigError::MissingSection("aligners"))?;
    for section in REQUIRED_SECTIONS.iter().chain(std::iter::once(&backend_section)) {
        match sections.get(*section) {
            Some(Value::Object(_)) | Some(Value::Null) => {}
            _ => {
                return Err(ConfigError::Malformed {
                    section: section.to_string(),
                    message: "expected a mapping".into(),
                });
            }
        }
    }

    let mut document = raw.clone();
    if let Some(sample) = sample_name {
        substitute_sample(&mut document, sample);
    }
    resolve_paths(&mut document, &root);

    let section = |name: &str| document.get(name).filter(|value| !value.is_null()).cloned().unwrap_or(Value::Object(Map::new()));
    let mut parameters_section = match section("parameters") {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    overrides.apply(&mut parameters_section);
    let parameters_section = Value::Object(parameters_section);

    let parameters: PipelineParameters = decode("parameters", &parameters_section)?;
    let input: InputSettings = decode("input", &section("input"))?;
    let genome: GenomeSettings = decode("genome", &section("genome"))?;
    let output = OutputLayout::from_section(&section("output"), &root)?;
    let steps = PipelineSteps::from_section(&section("pipeline_steps"))?;

    if let Some(map) = document.as_object_mut() {
        map.insert("parameters".into(), parameters_section);
    }
    debug!(workspace_root = %root.display(), sample = ?sample_name, backend_section, "resolved configuration");

    Ok(ResolvedConfig {
        workspace_root: root,
        sample: sample_name.map(str::to_string),
        document,
        backend_section,
        input,
        output,
        genome,
        parameters,
        steps,
    })
}

/// Create every output directory named by the configuration. Safe to call repeatedly.
pub fn ensure_directories(config: &ResolvedConfig) -> io::Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    for dir in config.output().all_dirs() {
        fs::create_dir_all(dir)?;
        created.push(dir.to_path_buf());
    }
    Ok(created)
}

fn substitute_sample(value: &mut Value, sample: &str) {
    match value {
        Value::String(text) if text.contains(SAMPLE_PLACEHOLDER) => *text = text.replace(SAMPLE_PLACEHOLDER, sample),
        Value::Array(items) => items.iter_mut().for_each(|item| substitute_sample(item, sample)),
        Value::Object(map) => map.values_mut().for_each(|item| substitute_sample(item, sample)),
        _ => {}
    }
}

fn resolve_paths(value: &mut Value, root: &Path) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_path_like_key(key) {
                    absolutize(entry, root);
                } else {
                    resolve_paths(entry, root);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|item| resolve_paths(item, root)),
        _ => {}
    }
}

fn absolutize(entry: &mut Value, root: &Path) {
    match entry {
        Value::String(text) if !text.trim().is_empty() => {
            *text = resolve_against(root, text).to_string_lossy().into_owned();
        }
        Value::Array(items) => items.iter_mut().for_each(|item| absolutize(item, root)),
        other => resolve_paths(other, root),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_config() -> Value {
        json!({
            "input": { "fastq_dir": "data/raw", "counts_file": "results/${sample}_counts.tsv" },
            "output": { "results_dir": "results/${sample}" },
            "genome": { "gtf_file": "/refs/genes.gtf" },
            "aligners": {
                "hisat2": { "index_prefix": "refs/hisat2/genome" },
                "kallisto": { "index": "refs/kallisto.idx", "bootstrap": 50 }
            },
            "parameters": { "threads": 8 },
            "pipeline_steps": { "qc": true }
        })
    }

    #[test]
    fn resolves_relative_paths_against_root() {
        let config = resolve(&sample_config(), Path::new("/work"), None, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.input().fastq_dir.as_deref(), Some(Path::new("/work/data/raw")));
        assert_eq!(config.genome().gtf_file.as_deref(), Some(Path::new("/refs/genes.gtf")));
        let kallisto = config.backend_config("kallisto").unwrap();
        assert_eq!(kallisto["index"], json!("/work/refs/kallisto.idx"));
        assert_eq!(kallisto["bootstrap"], json!(50));
        assert_eq!(config.backend_config("hisat2").unwrap()["index_prefix"], json!("/work/refs/hisat2/genome"));
    }

    #[test]
    fn resolution_is_idempotent() {
        let first = resolve(&sample_config(), Path::new("/work"), Some("S1"), &ConfigOverrides::default()).unwrap();
        let second = resolve(first.document(), Path::new("/work"), None, &ConfigOverrides::default()).unwrap();
        assert_eq!(first.document(), second.document());
        assert_eq!(first.output(), second.output());
        assert_eq!(first.input(), second.input());
    }

    #[test]
    fn sample_substitution_leaves_original_untouched() {
        let raw = sample_config();
        let snapshot = raw.clone();
        let config = resolve(&raw, Path::new("/work"), Some("S1"), &ConfigOverrides::default()).unwrap();

        assert_eq!(raw, snapshot);
        assert_eq!(config.input().counts_file.as_deref(), Some(Path::new("/work/results/S1_counts.tsv")));
        assert_eq!(config.output().results_dir, PathBuf::from("/work/results/S1"));
        assert_eq!(config.sample(), Some("S1"));
    }

    #[test]
    fn substitution_reaches_nested_arrays() {
        let mut value = json!({ "pipeline_steps": { "eda": { "command": ["Rscript", "eda.R", "--sample", "${sample}"] } } });
        substitute_sample(&mut value, "S9");
        assert_eq!(value["pipeline_steps"]["eda"]["command"][3], json!("S9"));
    }

    #[test]
    fn missing_section_is_reported_by_name() {
        let mut raw = sample_config();
        raw.as_object_mut().unwrap().remove("genome");
        let error = resolve(&raw, Path::new("/work"), None, &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(error, ConfigError::MissingSection("genome")));

        let mut raw = sample_config();
        raw.as_object_mut().unwrap().remove("aligners");
        let error = resolve(&raw, Path::new("/work"), None, &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(error, ConfigError::MissingSection("aligners")));
    }

    #[test]
    fn backends_section_is_accepted_in_place_of_aligners() {
        let mut raw = sample_config();
        let aligners = raw.as_object_mut().unwrap().remove("aligners").unwrap();
        raw.as_object_mut().unwrap().insert("backends".into(), aligners);
        let config = resolve(&raw, Path::new("/work"), None, &ConfigOverrides::default()).unwrap();
        let names: Vec<&String> = config.backends().unwrap().keys().collect();
        assert_eq!(names, vec!["hisat2", "kallisto"]);
    }

    #[test]
    fn overrides_take_precedence_over_parameters() {
        let overrides = ConfigOverrides {
            aligner: Some("hisat2".into()),
            multi_aligner: true,
            skip_fastqc: true,
            restart_from: Some("alignment".into()),
            continue_on_error: true,
        };
        let config = resolve(&sample_config(), Path::new("/work"), None, &overrides).unwrap();
        let params = config.parameters();
        assert_eq!(params.aligner.as_deref(), Some("hisat2"));
        assert!(params.multi_aligner && params.skip_fastqc && !params.fail_fast);
        assert_eq!(params.restart_from.as_deref(), Some("alignment"));
        assert_eq!(params.threads, 8);
        assert_eq!(config.document()["parameters"]["fail_fast"], json!(false));
    }

    #[test]
    fn non_mapping_parameters_are_malformed() {
        let mut raw = sample_config();
        raw["parameters"] = json!(["threads", 4]);
        let error = resolve(&raw, Path::new("/work"), None, &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(error, ConfigError::Malformed { section, .. } if section == "parameters"));
    }

    #[test]
    fn ensure_directories_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let raw = json!({
            "input": {},
            "output": { "results_dir": "out", "plots_dir": "out/plots" },
            "genome": {},
            "aligners": {},
            "parameters": {},
            "pipeline_steps": {}
        });
        let config = resolve(&raw, dir.path(), None, &ConfigOverrides::default()).unwrap();
        let created = ensure_directories(&config).unwrap();
        ensure_directories(&config).unwrap();
        assert!(created.iter().all(|path| path.is_dir()));
        assert!(dir.path().join("out/fastqc_results").is_dir());
        assert!(dir.path().join("out/plots").is_dir());
    }
}
