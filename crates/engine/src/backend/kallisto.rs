//! kallisto pseudo-alignment. Quantification is intrinsic: `abundance.tsv` is the count table.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::info;

use rnaflow_types::{BackendKind, BackendResult};

use super::{BackendContext, copy_json_metrics, ensure_dir, new_result, setting_path, setting_u64};
use crate::error::{BackendFailure, BackendUnavailableError};
use crate::inputs::InputArtifact;
use crate::tool::{ToolInvocation, ToolRunner};

const KIND: BackendKind = BackendKind::Kallisto;

pub const DEFAULT_BOOTSTRAP: u64 = 100;
pub const DEFAULT_FRAGMENT_LENGTH: u64 = 200;
pub const DEFAULT_FRAGMENT_SD: u64 = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct KallistoBackend {
    index: PathBuf,
    output_dir: PathBuf,
    threads: usize,
    bootstrap: u64,
    fragment_length: u64,
    fragment_sd: u64,
}

impl KallistoBackend {
    pub fn from_config(section: &Map<String, Value>, context: &BackendContext) -> Result<Self, BackendUnavailableError> {
        let index = setting_path(section, "index").ok_or_else(|| BackendUnavailableError::MissingSetting {
            backend: KIND.to_string(),
            key: "index",
        })?;
        if !index.exists() {
            return Err(BackendUnavailableError::IndexNotFound {
                backend: KIND.to_string(),
                path: index,
            });
        }
        Ok(Self {
            index,
            output_dir: context.output_dir_for(KIND),
            threads: context.threads,
            bootstrap: setting_u64(section, "bootstrap", DEFAULT_BOOTSTRAP),
            fragment_length: setting_u64(section, "fragment_length", DEFAULT_FRAGMENT_LENGTH),
            fragment_sd: setting_u64(section, "fragment_sd", DEFAULT_FRAGMENT_SD),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn sample_dir(&self, sample: &str) -> PathBuf {
        self.output_dir.join(format!("{sample}_kallisto"))
    }

    pub fn abundance_path(&self, sample: &str) -> PathBuf {
        self.sample_dir(sample).join("abundance.tsv")
    }

    pub fn run(&self, input: &InputArtifact, tools: &dyn ToolRunner) -> Result<BackendResult, BackendFailure> {
        let sample = input.sample.as_str();
        let sample_dir = self.sample_dir(sample);
        ensure_dir(KIND, sample, &sample_dir)?;
        let log = self.output_dir.join(format!("{sample}_kallisto_quant.log"));

        let quant = ToolInvocation::new("kallisto")
            .args(["quant", "-i"])
            .path_arg(&self.index)
            .arg("-o")
            .path_arg(&sample_dir)
            .args([
                "-t".to_string(),
                self.threads.to_string(),
                "-b".to_string(),
                self.bootstrap.to_string(),
                "--single".to_string(),
                "-l".to_string(),
                self.fragment_length.to_string(),
                "-s".to_string(),
                self.fragment_sd.to_string(),
            ])
            .path_arg(&input.path)
            .log_to(&log);
        tools
            .run(&quant)
            .map_err(|error| BackendFailure::new(KIND.as_str(), sample, error))?;

        let abundance = self.abundance_path(sample);
        let mut result = new_result(KIND, sample, abundance.clone(), Some(abundance.clone()));
        result.secondary_outputs = vec![log, sample_dir.join("run_info.json")];
        copy_json_metrics(&sample_dir.join("run_info.json"), &["n_processed", "n_pseudoaligned", "p_pseudoaligned"], &mut result.metrics);
        info!(sample, abundance = %abundance.display(), "kallisto quantification finished");
        Ok(result)
    }
}
