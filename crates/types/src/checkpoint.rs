//! Checkpoint document persisted once per checkpoint directory.
//!
//! The on-disk shape is:
//!
//! ```json
//! {
//!   "last_completed_step": "alignment",
//!   "last_updated": "2026-01-01T00:00:00Z",
//!   "steps": {
//!     "qc": { "status": "completed", "timestamp": "2026-01-01T00:00:00Z", "metadata": {} }
//!   }
//! }
//! ```
//!
//! Step entries keep insertion order so a status listing reads in execution order.
//! Timestamps are written as RFC 3339; offset-less ISO-8601 values are read as UTC.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Value};

/// Lifecycle state of a single pipeline step.
///
/// `Pending` is never written by the engine; a step without an entry is pending.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StepStatus::Completed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of the latest transition for one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointEntry {
    pub status: StepStatus,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Free-form details: durations, backend outputs, or `error`/`cause` for failures.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CheckpointEntry {
    /// Error message recorded for a failed step, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.metadata.get("error").and_then(Value::as_str)
    }
}

/// Full checkpoint state for one checkpoint directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckpointDocument {
    #[serde(default)]
    pub last_completed_step: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: IndexMap<String, CheckpointEntry>,
}

impl CheckpointDocument {
    /// Overwrite the entry for `step`, stamping both the entry and the document with `at`.
    pub fn record(&mut self, step: &str, status: StepStatus, metadata: Map<String, Value>, at: DateTime<Utc>) {
        self.steps.insert(
            step.to_string(),
            CheckpointEntry {
                status,
                timestamp: at,
                metadata,
            },
        );
        if status.is_completed() {
            self.last_completed_step = Some(step.to_string());
        }
        self.last_updated = Some(at);
    }

    pub fn status_of(&self, step: &str) -> StepStatus {
        self.steps.get(step).map(|entry| entry.status).unwrap_or(StepStatus::Pending)
    }

    pub fn failed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|(_, entry)| entry.status == StepStatus::Failed)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Parse an RFC 3339 timestamp, or an ISO-8601 timestamp without offset taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'")))
}

fn deserialize_optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{raw}'"))),
        None => Ok(None),
    }
}
