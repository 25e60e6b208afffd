//! HISAT2 splice-aware alignment with samtools sorting and featureCounts quantification.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use rnaflow_types::{BackendKind, BackendResult};
use rnaflow_util::remove_if_exists;

use super::{BackendContext, ensure_dir, new_result, setting_path};
use crate::error::{BackendFailure, BackendUnavailableError};
use crate::inputs::InputArtifact;
use crate::tool::{ToolInvocation, ToolRunner};

const KIND: BackendKind = BackendKind::Hisat2;

/// Matches both `Overall alignment rate: 93.10%` and `93.10% overall alignment rate`.
static ALIGNMENT_RATE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(?:overall alignment rate:\s*([0-9.]+)%|([0-9.]+)%\s+overall alignment rate)").ok());

#[derive(Debug, Clone, PartialEq)]
pub struct Hisat2Backend {
    index_prefix: PathBuf,
    output_dir: PathBuf,
    counts_dir: PathBuf,
    threads: usize,
    gtf_file: Option<PathBuf>,
}

impl Hisat2Backend {
    /// Requires `index_prefix`, and the first index shard `<index_prefix>.1.ht2` must exist.
    pub fn from_config(section: &Map<String, Value>, context: &BackendContext) -> Result<Self, BackendUnavailableError> {
        let index_prefix = setting_path(section, "index_prefix").ok_or_else(|| BackendUnavailableError::MissingSetting {
            backend: KIND.to_string(),
            key: "index_prefix",
        })?;
        let first_shard = PathBuf::from(format!("{}.1.ht2", index_prefix.display()));
        if !first_shard.is_file() {
            return Err(BackendUnavailableError::IndexNotFound {
                backend: KIND.to_string(),
                path: first_shard,
            });
        }
        Ok(Self {
            index_prefix,
            output_dir: context.output_dir_for(KIND),
            counts_dir: context.output_base_dir.join("counts_hisat2"),
            threads: context.threads,
            gtf_file: context.gtf_file.clone(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn bam_path(&self, sample: &str) -> PathBuf {
        self.output_dir.join(format!("{sample}.bam"))
    }

    pub fn counts_path(&self, sample: &str) -> PathBuf {
        self.counts_dir.join(format!("{sample}_counts.tsv"))
    }

    pub fn run(&self, input: &InputArtifact, run_quantification: bool, tools: &dyn ToolRunner) -> Result<BackendResult, BackendFailure> {
        let sample = input.sample.as_str();
        let fail = |reason: &dyn std::fmt::Display| BackendFailure::new(KIND.as_str(), sample, reason);
        ensure_dir(KIND, sample, &self.output_dir)?;

        let sam_path = self.output_dir.join(format!("{sample}.sam"));
        let bam_path = self.bam_path(sample);
        let align_log = self.output_dir.join(format!("{sample}_hisat2.log"));
        let sort_log = self.output_dir.join(format!("{sample}_samtools.log"));
        let threads = self.threads.to_string();

        let align = ToolInvocation::new("hisat2")
            .args(["-p", threads.as_str(), "-x"])
            .path_arg(&self.index_prefix)
            .arg("-U")
            .path_arg(&input.path)
            .args(["--new-summary", "--dta", "-S"])
            .path_arg(&sam_path)
            .log_to(&align_log);
        let aligned = tools.run(&align).map_err(|error| fail(&error))?;

        let sort = ToolInvocation::new("samtools")
            .args(["sort", "-@", threads.as_str(), "-o"])
            .path_arg(&bam_path)
            .path_arg(&sam_path)
            .log_to(&sort_log);
        tools.run(&sort).map_err(|error| fail(&error))?;
        if let Err(error) = remove_if_exists(&sam_path) {
            warn!(path = %sam_path.display(), error = %error, "could not remove intermediate SAM file");
        }

        let mut result = new_result(KIND, sample, bam_path.clone(), None);
        result.secondary_outputs = vec![align_log, sort_log];
        if let Some(rate) = parse_overall_alignment_rate(&aligned.stderr) {
            result.metrics.insert("overall_alignment_rate".into(), json!(rate));
        }
        info!(sample, bam = %bam_path.display(), "hisat2 alignment finished");

        if run_quantification {
            if self.gtf_file.is_some() {
                let counted = self.count_features(sample, &bam_path, tools)?;
                result.counts_file = counted.counts_file;
                result.secondary_outputs.extend(counted.secondary_outputs);
            } else {
                warn!(sample, "genome.gtf_file not configured; skipping featureCounts");
            }
        }
        Ok(result)
    }

    /// Run featureCounts over `bam_path` into `counts_hisat2/<sample>_counts.tsv`.
    pub fn count_features(&self, sample: &str, bam_path: &Path, tools: &dyn ToolRunner) -> Result<BackendResult, BackendFailure> {
        let gtf_file = self
            .gtf_file
            .as_deref()
            .ok_or_else(|| BackendFailure::new(KIND.as_str(), sample, "genome.gtf_file is required for featureCounts"))?;
        ensure_dir(KIND, sample, &self.counts_dir)?;
        let counts_path = self.counts_path(sample);
        let log = self.counts_dir.join(format!("{sample}_featurecounts.log"));
        let count = ToolInvocation::new("featureCounts")
            .args(["-T".to_string(), self.threads.to_string(), "-a".to_string()])
            .path_arg(gtf_file)
            .arg("-o")
            .path_arg(&counts_path)
            .path_arg(bam_path)
            .log_to(&log);
        tools
            .run(&count)
            .map_err(|error| BackendFailure::new(KIND.as_str(), sample, error))?;

        let mut result = new_result(KIND, sample, bam_path.to_path_buf(), Some(counts_path));
        result.secondary_outputs.push(log);
        Ok(result)
    }
}

/// Overall alignment rate, in percent, from a HISAT2 summary.
pub fn parse_overall_alignment_rate(summary: &str) -> Option<f64> {
    let captures = ALIGNMENT_RATE.as_ref()?.captures(summary)?;
    captures.get(1).or_else(|| captures.get(2))?.as_str().parse().ok()
}
