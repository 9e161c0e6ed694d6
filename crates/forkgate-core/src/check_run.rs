//! Check runs, their conclusions, and job outcomes.

use crate::commit::CommitId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunStatus {
    Queued,
    InProgress,
    Completed,
    /// Any status value this client does not know about (e.g. `waiting`).
    #[serde(other)]
    Unknown,
}

impl CheckRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckRunStatus::Queued => "queued",
            CheckRunStatus::InProgress => "in_progress",
            CheckRunStatus::Completed => "completed",
            CheckRunStatus::Unknown => "unknown",
        }
    }
}

/// Terminal conclusion of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    TimedOut,
    ActionRequired,
}

impl Conclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Conclusion::Success => "success",
            Conclusion::Failure => "failure",
            Conclusion::Neutral => "neutral",
            Conclusion::Cancelled => "cancelled",
            Conclusion::TimedOut => "timed_out",
            Conclusion::ActionRequired => "action_required",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Conclusion::Success)
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A check run as returned by the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
    pub head_sha: CommitId,
    pub status: CheckRunStatus,
    #[serde(default)]
    pub conclusion: Option<Conclusion>,
}

impl CheckRun {
    /// Whether this run already holds `completed` with the given conclusion.
    pub fn holds(&self, conclusion: Conclusion) -> bool {
        self.status == CheckRunStatus::Completed && self.conclusion == Some(conclusion)
    }
}

/// Terminal result of one matrix cell.
///
/// Whatever happened inside the executor (non-zero exit, spawn error,
/// timeout, panic) reduces to exactly one [`Conclusion`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub conclusion: Conclusion,

    /// Process exit code, when a process ran to completion.
    pub exit_code: Option<i32>,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// Human-readable detail (error text, last lines of stderr).
    pub detail: Option<String>,
}

impl JobOutcome {
    pub fn new(conclusion: Conclusion) -> Self {
        Self {
            conclusion,
            exit_code: None,
            duration_ms: 0,
            detail: None,
        }
    }

    pub fn success() -> Self {
        Self::new(Conclusion::Success)
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self::new(Conclusion::Failure).with_detail(detail)
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn passed(&self) -> bool {
        self.conclusion.is_success()
    }
}

/// Result of looking up a check run by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckRunMatch {
    None,
    One(CheckRun),
    Ambiguous(usize),
}

/// Check runs of one commit, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct CheckRunIndex {
    runs: Vec<CheckRun>,
}

impl CheckRunIndex {
    pub fn new(runs: Vec<CheckRun>) -> Self {
        Self { runs }
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Find the single run named exactly `name`.
    pub fn find(&self, name: &str) -> CheckRunMatch {
        let mut found = self.runs.iter().filter(|r| r.name == name);
        match (found.next(), found.next()) {
            (None, _) => CheckRunMatch::None,
            (Some(run), None) => CheckRunMatch::One(run.clone()),
            (Some(_), Some(_)) => CheckRunMatch::Ambiguous(2 + found.count()),
        }
    }
}
