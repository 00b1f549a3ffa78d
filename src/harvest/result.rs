//! Run results and per-profile outcomes

use crate::storage::RunStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Default cap on error details kept per run
pub const MAX_ERROR_DETAILS: usize = 10;

/// Summary of one orchestrator run for one source
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Unique profiles found on the schedule page
    pub total: usize,
    pub new: usize,
    pub updated: usize,

    /// Exact failure count; `error_details` may be shorter
    pub errors: usize,
    pub error_details: Vec<ErrorDetail>,
    pub status: RunStatus,

    /// Schedule rows parsed before grouping by profile
    pub schedule_items: usize,

    #[serde(skip)]
    max_error_details: usize,
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    /// Profile the failure belongs to; absent for run-level failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub error: String,
}

impl RunResult {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            started_at: Utc::now(),
            completed_at: None,
            total: 0,
            new: 0,
            updated: 0,
            errors: 0,
            error_details: Vec::new(),
            status: RunStatus::Completed,
            schedule_items: 0,
            max_error_details: MAX_ERROR_DETAILS,
        }
    }

    /// Sets how many error details are kept
    pub fn with_error_cap(mut self, cap: usize) -> Self {
        self.max_error_details = cap;
        self
    }

    pub fn record_outcome(&mut self, outcome: ProfileOutcome) {
        match outcome {
            ProfileOutcome::Created => self.new += 1,
            ProfileOutcome::Updated => self.updated += 1,
        }
    }

    pub fn record_error(&mut self, error: &ProfileError) {
        self.push_error(Some(error.profile_ref.clone()), error.to_string());
    }

    /// Marks the whole run as failed with a single run-level error
    pub fn fail(&mut self, error: impl fmt::Display) {
        self.push_error(None, error.to_string());
        self.finish(RunStatus::Failed);
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// True when no profile or run-level error was recorded
    pub fn success(&self) -> bool {
        self.errors == 0
    }

    /// Wall-clock length of the run, once it has finished
    pub fn duration_seconds(&self) -> Option<f64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    fn push_error(&mut self, profile: Option<String>, error: String) {
        self.errors += 1;
        if self.error_details.len() < self.max_error_details {
            self.error_details.push(ErrorDetail { profile, error });
        }
    }
}

/// What a successful profile did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOutcome {
    Created,
    Updated,
}

/// Pipeline stage a profile failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fetch,
    Parse,
    Persist,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Fetch => "fetch",
            Self::Parse => "parse",
            Self::Persist => "persist",
        };
        f.write_str(label)
    }
}

/// A failure confined to one profile
#[derive(Debug, Clone, Error)]
#[error("{kind} failed: {detail}")]
pub struct ProfileError {
    pub profile_ref: String,
    pub kind: ErrorKind,
    pub detail: String,
}

impl ProfileError {
    pub fn new(profile_ref: &str, kind: ErrorKind, detail: impl fmt::Display) -> Self {
        Self {
            profile_ref: profile_ref.to_string(),
            kind,
            detail: detail.to_string(),
        }
    }
}
