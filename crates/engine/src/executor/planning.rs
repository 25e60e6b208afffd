//! Per-step run/skip decisions.

use crate::error::ConfigError;

/// What the orchestrator does with one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDecision {
    /// Execute the step body.
    Run,
    /// Completed in an earlier run and not forced by a restart point.
    SkipCompleted,
    /// Precedes the restart point.
    BeforeRestartPoint,
    /// Switched off or not applicable to this configuration.
    Bypass(String),
}

impl StepDecision {
    pub fn reason(&self) -> Option<String> {
        match self {
            StepDecision::Run => None,
            StepDecision::SkipCompleted => Some("completed in a previous run".to_string()),
            StepDecision::BeforeRestartPoint => Some("before restart point".to_string()),
            StepDecision::Bypass(reason) => Some(reason.clone()),
        }
    }
}

/// Position of `restart_from` in `steps`.
///
/// An unknown name is a configuration error so the run can be rejected before any step executes.
pub fn restart_index(steps: &[String], restart_from: Option<&str>) -> Result<Option<usize>, ConfigError> {
    let Some(step) = restart_from.map(str::trim).filter(|step| !step.is_empty()) else {
        return Ok(None);
    };
    steps
        .iter()
        .position(|candidate| candidate == step)
        .map(Some)
        .ok_or_else(|| ConfigError::UnknownStep {
            step: step.to_string(),
            expected: steps.join(", "),
        })
}

/// Decide the fate of the step at `index`.
///
/// Steps before the restart point are skipped without looking at the checkpoint. From the
/// restart point on, steps run even when completed. Without a restart point, a completed
/// step is skipped; running and failed steps run again.
pub fn decide(index: usize, restart_at: Option<usize>, completed: bool, bypass: Option<String>) -> StepDecision {
    if let Some(restart) = restart_at
        && index < restart
    {
        return StepDecision::BeforeRestartPoint;
    }
    if let Some(reason) = bypass {
        return StepDecision::Bypass(reason);
    }
    if completed && restart_at.is_none() {
        return StepDecision::SkipCompleted;
    }
    StepDecision::Run
}
