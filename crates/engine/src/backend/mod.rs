//! Alignment and quantification backends.
//!
//! Backends form a closed set: every supported tool is a variant of [`Backend`] and the
//! registry maps a configured name to one of those variants. A backend is built from its
//! resolved configuration section and then run once per input artifact.
//!
//! Construction failures ([`BackendUnavailableError`]) are absorbed by the registry, while
//! run failures ([`BackendFailure`]) are recoverable for the backend/input pair that
//! produced them.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use rnaflow_types::{BackendKind, BackendResult};

use crate::config::ResolvedConfig;
use crate::error::{BackendFailure, BackendUnavailableError};
use crate::inputs::InputArtifact;
use crate::tool::ToolRunner;

pub mod hisat2;
pub mod kallisto;
pub mod registry;
pub mod salmon;

pub use hisat2::Hisat2Backend;
pub use kallisto::KallistoBackend;
pub use registry::{available_backends, create, try_create};
pub use salmon::SalmonBackend;

/// Settings every backend shares, taken from `parameters` and `genome`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendContext {
    /// Parent of each backend's `aligned_reads_<name>` directory.
    pub output_base_dir: PathBuf,
    pub threads: usize,
    pub gtf_file: Option<PathBuf>,
}

impl BackendContext {
    pub fn from_config(config: &ResolvedConfig, output_base_dir: &Path) -> Self {
        Self {
            output_base_dir: output_base_dir.to_path_buf(),
            threads: config.parameters().threads.max(1),
            gtf_file: config.genome().gtf_file.clone(),
        }
    }

    pub fn output_dir_for(&self, kind: BackendKind) -> PathBuf {
        self.output_base_dir.join(format!("aligned_reads_{kind}"))
    }
}

/// A configured backend ready to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Hisat2(Hisat2Backend),
    Kallisto(KallistoBackend),
    Salmon(SalmonBackend),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Hisat2(_) => BackendKind::Hisat2,
            Backend::Kallisto(_) => BackendKind::Kallisto,
            Backend::Salmon(_) => BackendKind::Salmon,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn output_dir(&self) -> &Path {
        match self {
            Backend::Hisat2(backend) => backend.output_dir(),
            Backend::Kallisto(backend) => backend.output_dir(),
            Backend::Salmon(backend) => backend.output_dir(),
        }
    }

    /// Align or pseudo-align one input. With `run_quantification`, aligners also produce counts.
    pub fn run(&self, input: &InputArtifact, run_quantification: bool, tools: &dyn ToolRunner) -> Result<BackendResult, BackendFailure> {
        match self {
            Backend::Hisat2(backend) => backend.run(input, run_quantification, tools),
            Backend::Kallisto(backend) => backend.run(input, tools),
            Backend::Salmon(backend) => backend.run(input, tools),
        }
    }

    /// Where [`Backend::run`] leaves its primary output for `sample`.
    pub fn expected_primary_output(&self, sample: &str) -> PathBuf {
        match self {
            Backend::Hisat2(backend) => backend.bam_path(sample),
            Backend::Kallisto(backend) => backend.abundance_path(sample),
            Backend::Salmon(backend) => backend.quant_path(sample),
        }
    }

    /// Produce counts from an earlier run's primary output.
    ///
    /// Pseudo-aligners quantify while they run, so their abundance table is the count table.
    pub fn quantify(&self, sample: &str, primary_output: &Path, tools: &dyn ToolRunner) -> Result<BackendResult, BackendFailure> {
        if !primary_output.exists() {
            return Err(BackendFailure::new(
                self.name(),
                sample,
                format!("alignment output {} not found", primary_output.display()),
            ));
        }
        match self {
            Backend::Hisat2(backend) => backend.count_features(sample, primary_output, tools),
            Backend::Kallisto(_) | Backend::Salmon(_) => Ok(new_result(self.kind(), sample, primary_output.to_path_buf(), Some(primary_output.to_path_buf()))),
        }
    }
}

pub(crate) fn new_result(kind: BackendKind, sample: &str, primary_output: PathBuf, counts_file: Option<PathBuf>) -> BackendResult {
    BackendResult {
        backend: kind.as_str().to_string(),
        sample: sample.to_string(),
        primary_output,
        counts_file,
        secondary_outputs: Vec::new(),
        metrics: Map::new(),
    }
}

pub(crate) fn ensure_dir(kind: BackendKind, sample: &str, dir: &Path) -> Result<(), BackendFailure> {
    fs::create_dir_all(dir).map_err(|error| BackendFailure::new(kind.as_str(), sample, format!("cannot create {}: {error}", dir.display())))
}

pub(crate) fn setting_path(section: &Map<String, Value>, key: &str) -> Option<PathBuf> {
    section
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(PathBuf::from)
}

pub(crate) fn setting_u64(section: &Map<String, Value>, key: &str, default: u64) -> u64 {
    match section.get(key) {
        Some(Value::Number(number)) => number.as_u64().unwrap_or(default),
        Some(Value::String(text)) => text.trim().parse().unwrap_or(default),
        _ => default,
    }
}

pub(crate) fn setting_str(section: &Map<String, Value>, key: &str, default: &str) -> String {
    section
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Read a tool's JSON run summary and copy the listed numeric fields into `metrics`.
pub(crate) fn copy_json_metrics(path: &Path, fields: &[&str], metrics: &mut Map<String, Value>) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };
    let Ok(Value::Object(info)) = serde_json::from_str::<Value>(&content) else {
        return;
    };
    for field in fields {
        if let Some(value) = info.get(*field)
            && value.is_number()
        {
            metrics.insert((*field).to_string(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn settings_helpers_apply_defaults() {
        let section = json!({ "bootstrap": "25", "index": "  ", "library_type": "ISR", "threads": -1 });
        let section = section.as_object().unwrap();
        assert_eq!(setting_u64(section, "bootstrap", 100), 25);
        assert_eq!(setting_u64(section, "threads", 4), 4);
        assert_eq!(setting_u64(section, "fragment_length", 200), 200);
        assert!(setting_path(section, "index").is_none());
        assert_eq!(setting_str(section, "library_type", "A"), "ISR");
        assert_eq!(setting_str(section, "missing", "A"), "A");
    }

    #[test]
    fn copies_numeric_metrics_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_info.json");
        fs::write(&path, r#"{ "n_processed": 1000, "p_pseudoaligned": 87.5, "index_version": "13" }"#).unwrap();
        let mut metrics = Map::new();
        copy_json_metrics(&path, &["n_processed", "p_pseudoaligned", "index_version"], &mut metrics);
        assert_eq!(metrics.get("p_pseudoaligned"), Some(&json!(87.5)));
        assert_eq!(metrics.get("n_processed"), Some(&json!(1000)));
        assert!(!metrics.contains_key("index_version"));

        copy_json_metrics(&dir.path().join("absent.json"), &["n_processed"], &mut metrics);
        assert_eq!(metrics.len(), 2);
    }

    #[test]
    fn output_dirs_are_named_per_backend() {
        let context = BackendContext {
            output_base_dir: PathBuf::from("/out"),
            threads: 4,
            gtf_file: None,
        };
        assert_eq!(context.output_dir_for(BackendKind::Hisat2), PathBuf::from("/out/aligned_reads_hisat2"));
        assert_eq!(context.output_dir_for(BackendKind::Salmon), PathBuf::from("/out/aligned_reads_salmon"));
    }
}
