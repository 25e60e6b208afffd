//! Salmon selective-alignment quantification.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::info;

use rnaflow_types::{BackendKind, BackendResult};

use super::{BackendContext, copy_json_metrics, ensure_dir, new_result, setting_path, setting_str};
use crate::error::{BackendFailure, BackendUnavailableError};
use crate::inputs::InputArtifact;
use crate::tool::{ToolInvocation, ToolRunner};

const KIND: BackendKind = BackendKind::Salmon;

/// Let Salmon infer the library type.
pub const DEFAULT_LIBRARY_TYPE: &str = "A";

#[derive(Debug, Clone, PartialEq)]
pub struct SalmonBackend {
    index: PathBuf,
    output_dir: PathBuf,
    threads: usize,
    library_type: String,
}

impl SalmonBackend {
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
            library_type: setting_str(section, "library_type", DEFAULT_LIBRARY_TYPE),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn sample_dir(&self, sample: &str) -> PathBuf {
        self.output_dir.join(format!("{sample}_salmon"))
    }

    pub fn quant_path(&self, sample: &str) -> PathBuf {
        self.sample_dir(sample).join("quant.sf")
    }

    pub fn run(&self, input: &InputArtifact, tools: &dyn ToolRunner) -> Result<BackendResult, BackendFailure> {
        let sample = input.sample.as_str();
        let sample_dir = self.sample_dir(sample);
        ensure_dir(KIND, sample, &self.output_dir)?;
        let log = self.output_dir.join(format!("{sample}_salmon_quant.log"));

        let quant = ToolInvocation::new("salmon")
            .args(["quant", "-i"])
            .path_arg(&self.index)
            .args(["-l", self.library_type.as_str(), "-r"])
            .path_arg(&input.path)
            .args(["-p".to_string(), self.threads.to_string(), "--validateMappings".to_string(), "-o".to_string()])
            .path_arg(&sample_dir)
            .log_to(&log);
        tools
            .run(&quant)
            .map_err(|error| BackendFailure::new(KIND.as_str(), sample, error))?;

        let quant_file = self.quant_path(sample);
        let mut result = new_result(KIND, sample, quant_file.clone(), Some(quant_file.clone()));
        result.secondary_outputs.push(log);
        copy_json_metrics(&sample_dir.join("aux_info").join("meta_info.json"), &["num_processed", "percent_mapped"], &mut result.metrics);
        info!(sample, quant = %quant_file.display(), "salmon quantification finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::fake::FakeToolRunner;
    use serde_json::json;
    use std::fs;

    #[test]
    fn runs_quant_with_library_type() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("salmon_index");
        fs::create_dir(&index).unwrap();
        let context = BackendContext {
            output_base_dir: dir.path().join("results"),
            threads: 4,
            gtf_file: None,
        };
        let section = json!({ "index": index.to_string_lossy(), "library_type": "SR" });
        let backend = SalmonBackend::from_config(section.as_object().unwrap(), &context).unwrap();
        let tools = FakeToolRunner::new();

        let result = backend.run(&InputArtifact::from_path(dir.path().join("S7.fastq.gz")), &tools).unwrap();

        let calls = tools.calls.borrow();
        assert!(calls[0].args.windows(2).any(|pair| pair == ["-l", "SR"]));
        assert_eq!(result.sample, "S7");
        assert_eq!(result.primary_output, dir.path().join("results/aligned_reads_salmon/S7_salmon/quant.sf"));
    }

    #[test]
    fn defaults_library_type_to_automatic() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("salmon_index");
        fs::create_dir(&index).unwrap();
        let context = BackendContext {
            output_base_dir: dir.path().to_path_buf(),
            threads: 1,
            gtf_file: None,
        };
        let section = json!({ "index": index.to_string_lossy() });
        let backend = SalmonBackend::from_config(section.as_object().unwrap(), &context).unwrap();
        assert_eq!(backend.library_type, DEFAULT_LIBRARY_TYPE);
    }
}
