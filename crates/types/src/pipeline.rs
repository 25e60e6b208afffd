//! Pipeline vocabulary: kinds, run modes, canonical step orders, and backend names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const STEP_QC: &str = "qc";
pub const STEP_ALIGNMENT: &str = "alignment";
pub const STEP_QUANTIFICATION: &str = "quantification";
pub const STEP_MULTIQC: &str = "multiqc";
pub const STEP_EDA: &str = "eda";
pub const STEP_QA: &str = "qa";
pub const STEP_KALLISTO: &str = "kallisto";
pub const STEP_ENRICHMENT: &str = "enrichment";
pub const STEP_REPORT: &str = "report";

const PREPROCESSING_STEPS: &[&str] = &[STEP_QC, STEP_ALIGNMENT, STEP_QUANTIFICATION, STEP_MULTIQC];
const POSTPROCESSING_STEPS: &[&str] = &[STEP_EDA, STEP_QA, STEP_KALLISTO, STEP_ENRICHMENT, STEP_REPORT];

/// One of the two step sequences the engine knows how to drive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Raw reads to alignments and counts.
    Preprocessing,
    /// Counts to exploratory analysis, QA, enrichment, and the final report.
    Postprocessing,
}

impl PipelineKind {
    /// Canonical step order for this pipeline kind.
    pub fn steps(&self) -> &'static [&'static str] {
        match self {
            PipelineKind::Preprocessing => PREPROCESSING_STEPS,
            PipelineKind::Postprocessing => POSTPROCESSING_STEPS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Preprocessing => "preprocessing",
            PipelineKind::Postprocessing => "postprocessing",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode selected on the command line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    #[default]
    Preprocessing,
    Postprocessing,
    /// Preprocessing followed by postprocessing against the same checkpoint store.
    Full,
}

impl PipelineMode {
    pub fn kinds(&self) -> &'static [PipelineKind] {
        match self {
            PipelineMode::Preprocessing => &[PipelineKind::Preprocessing],
            PipelineMode::Postprocessing => &[PipelineKind::Postprocessing],
            PipelineMode::Full => &[PipelineKind::Preprocessing, PipelineKind::Postprocessing],
        }
    }

    /// Concatenated canonical order of every step the mode runs.
    pub fn steps(&self) -> Vec<&'static str> {
        self.kinds().iter().flat_map(|kind| kind.steps().iter().copied()).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineMode::Preprocessing => "preprocessing",
            PipelineMode::Postprocessing => "postprocessing",
            PipelineMode::Full => "full",
        }
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPipelineMode(pub String);

impl fmt::Display for UnknownPipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown pipeline mode '{}' (expected preprocessing, postprocessing, or full)", self.0)
    }
}

impl std::error::Error for UnknownPipelineMode {}

impl FromStr for PipelineMode {
    type Err = UnknownPipelineMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preprocessing" | "pre" => Ok(PipelineMode::Preprocessing),
            "postprocessing" | "post" => Ok(PipelineMode::Postprocessing),
            "full" | "both" => Ok(PipelineMode::Full),
            _ => Err(UnknownPipelineMode(s.to_string())),
        }
    }
}

/// How a step body is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepClass {
    /// Fixed routine invoking one external tool or script.
    Analysis,
    /// Dispatched through the backend registry, once per backend and input.
    Alignment,
}

impl StepClass {
    pub fn of(step: &str) -> Self {
        match step {
            STEP_ALIGNMENT | STEP_QUANTIFICATION => StepClass::Alignment,
            _ => StepClass::Analysis,
        }
    }
}

/// Closed set of supported alignment/quantification backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Hisat2,
    Kallisto,
    Salmon,
}

impl BackendKind {
    /// Backend used when neither `parameters.aligner` nor a CLI override names one.
    pub const DEFAULT: BackendKind = BackendKind::Kallisto;

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Hisat2 => "hisat2",
            BackendKind::Kallisto => "kallisto",
            BackendKind::Salmon => "salmon",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBackend(pub String);

impl fmt::Display for UnknownBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported backend '{}'", self.0)
    }
}

impl std::error::Error for UnknownBackend {}

impl FromStr for BackendKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hisat2" => Ok(BackendKind::Hisat2),
            "kallisto" => Ok(BackendKind::Kallisto),
            "salmon" => Ok(BackendKind::Salmon),
            _ => Err(UnknownBackend(s.to_string())),
        }
    }
}
