//! Error types for the dispatch gate.

use crate::github::GitHubError;

/// Why a dispatch was refused. Always fatal to that dispatch: nothing is
/// executed and no secret is read.
#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    #[error("commit mismatch: approved {asserted}, pull request head is {actual}")]
    CommitMismatch { asserted: String, actual: String },

    #[error("untrusted origin: {origin} is not {base}")]
    UntrustedOrigin { origin: String, base: String },

    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("malformed {event} payload: {reason}")]
    MalformedPayload { event: String, reason: String },

    #[error("abbreviated commit id not accepted: {0}")]
    AbbreviatedCommit(String),

    #[error("pull request #{pr_number} lookup failed: {source}")]
    LookupFailed {
        pr_number: u64,
        #[source]
        source: GitHubError,
    },
}

impl AuthorizationError {
    /// Stable short code for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            AuthorizationError::CommitMismatch { .. } => "commit_mismatch",
            AuthorizationError::UntrustedOrigin { .. } => "untrusted_origin",
            AuthorizationError::UnknownEventKind(_) => "unknown_event_kind",
            AuthorizationError::MalformedPayload { .. } => "malformed_payload",
            AuthorizationError::AbbreviatedCommit(_) => "abbreviated_commit",
            AuthorizationError::LookupFailed { .. } => "lookup_failed",
        }
    }
}
