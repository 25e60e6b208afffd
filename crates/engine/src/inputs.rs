//! FASTQ input discovery.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use tracing::info;

use rnaflow_util::strip_extensions;

use crate::error::StepExecutionError;

/// Extensions removed from a FASTQ file name to obtain its sample name.
pub const FASTQ_EXTENSIONS: &[&str] = &[".fq.gz", ".fastq.gz", ".fq", ".fastq"];

/// One discovered read file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputArtifact {
    pub path: PathBuf,
    pub sample: String,
}

impl InputArtifact {
    pub fn from_path(path: PathBuf) -> Self {
        let sample = strip_extensions(&path, FASTQ_EXTENSIONS);
        Self { path, sample }
    }
}

/// Matches files directly inside `fastq_dir` against a glob such as `*.fq.gz`.
#[derive(Debug, Clone)]
pub struct InputDiscovery {
    fastq_dir: PathBuf,
    pattern: String,
    matcher: GlobMatcher,
}

impl InputDiscovery {
    pub fn new(fastq_dir: impl Into<PathBuf>, pattern: &str) -> Result<Self, StepExecutionError> {
        let matcher = Glob::new(pattern)
            .map_err(|error| StepExecutionError::InvalidPattern {
                pattern: pattern.to_string(),
                message: error.to_string(),
            })?
            .compile_matcher();
        Ok(Self {
            fastq_dir: fastq_dir.into(),
            pattern: pattern.to_string(),
            matcher,
        })
    }

    pub fn fastq_dir(&self) -> &Path {
        &self.fastq_dir
    }

    /// Matching files sorted by name so backends see inputs in a stable order.
    pub fn discover(&self) -> Result<Vec<InputArtifact>, StepExecutionError> {
        info!(dir = %self.fastq_dir.display(), pattern = %self.pattern, "looking for FASTQ files");
        let entries = fs::read_dir(&self.fastq_dir).map_err(|_| StepExecutionError::MissingInput(self.fastq_dir.clone()))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if entry.file_name().to_str().is_some_and(|name| self.matcher.is_match(name)) {
                paths.push(path);
            }
        }
        paths.sort();
        let inputs: Vec<InputArtifact> = paths.into_iter().map(InputArtifact::from_path).collect();
        info!(count = inputs.len(), "found FASTQ files");
        Ok(inputs)
    }

    /// Discover inputs, narrowed to `sample` when given. An empty result is an error.
    pub fn discover_for(&self, sample: Option<&str>) -> Result<Vec<InputArtifact>, StepExecutionError> {
        let inputs = self.discover()?;
        let inputs = match sample {
            Some(sample) => filter_by_sample(inputs, sample).ok_or_else(|| StepExecutionError::MissingSample {
                sample: sample.to_string(),
                dir: self.fastq_dir.clone(),
            })?,
            None => inputs,
        };
        if inputs.is_empty() {
            return Err(StepExecutionError::NoInputs {
                dir: self.fastq_dir.clone(),
                pattern: self.pattern.clone(),
            });
        }
        Ok(inputs)
    }
}

/// Keep only the inputs belonging to `sample`; `None` when nothing matches.
pub fn filter_by_sample(inputs: Vec<InputArtifact>, sample: &str) -> Option<Vec<InputArtifact>> {
    let filtered: Vec<InputArtifact> = inputs.into_iter().filter(|input| input.sample == sample).collect();
    if filtered.is_empty() { None } else { Some(filtered) }
}
