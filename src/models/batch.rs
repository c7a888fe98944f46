use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::validation::{EmailValidationResult, ValidationFlags};

/// One unit of queued work. Doubles as the queue wire format:
/// `{"unitId": "...", "emails": [...], "validationFlags": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationUnit {
    pub unit_id: String,
    pub emails: Vec<String>,
    #[serde(default)]
    pub validation_flags: ValidationFlags,
}

impl ValidationUnit {
    pub fn total_count(&self) -> usize {
        self.emails.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Processing,
    Completed,
    Failed,
}

/// Bookkeeping for a submission that was split into several units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionTracker {
    pub request_id: String,
    pub unit_ids: Vec<String>,
    pub total_emails: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_emails: usize,
    #[serde(default = "processing")]
    pub status: UnitStatus,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

fn processing() -> UnitStatus {
    UnitStatus::Processing
}

impl SubmissionTracker {
    pub fn new(request_id: String, unit_ids: Vec<String>, total_emails: usize) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            unit_ids,
            total_emails,
            created_at: now,
            processed_emails: 0,
            status: UnitStatus::Processing,
            last_updated: now,
        }
    }
}

/// Latest known state of one unit, upserted by the worker after every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub unit_id: String,
    pub status: UnitStatus,
    pub total_emails: usize,
    pub processed_emails: usize,
    pub results: Vec<EmailValidationResult>,
    pub last_updated: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Processing, nothing validated yet.
    pub fn started(unit: &ValidationUnit) -> Self {
        let total = unit.total_count();
        Self {
            unit_id: unit.unit_id.clone(),
            status: UnitStatus::Processing,
            total_emails: total,
            processed_emails: 0,
            results: Vec::with_capacity(total),
            last_updated: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == UnitStatus::Completed
    }
}

/// Change notification published after each chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub unit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub processed_count: usize,
    pub total_count: usize,
    pub is_complete: bool,
}

/// Per-unit line of an aggregated status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitProgress {
    pub unit_id: String,
    pub status: UnitStatus,
    pub processed_emails: usize,
    /// Zero until the unit's first snapshot exists.
    pub total_emails: usize,
}

/// Aggregated view of a multi-unit submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStatus {
    pub request_id: String,
    pub status: UnitStatus,
    pub total_emails: usize,
    pub processed_emails: usize,
    /// Percentage in `0.0..=100.0`.
    pub progress: f64,
    pub units: Vec<UnitProgress>,
    pub results: Vec<EmailValidationResult>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// What `submit` handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Small submissions are validated in the request path.
    Inline { results: Vec<EmailValidationResult> },
    Unit { unit_id: String, total_emails: usize },
    Submission {
        request_id: String,
        unit_ids: Vec<String>,
        total_emails: usize,
    },
}

/// Answer to a status query by unit id.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusView {
    Unit(ProgressSnapshot),
    /// The id belongs to a multi-unit submission that has no snapshot of its
    /// own; the aggregate stands in for it.
    Submission(SubmissionStatus),
    /// Accepted but no worker has reported on it yet (or it expired).
    Pending { unit_id: String },
}
