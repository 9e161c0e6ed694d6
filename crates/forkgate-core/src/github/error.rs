//! Error types for GitHub API access.

use thiserror::Error;

/// Errors raised while talking to the GitHub REST API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GitHubError {
    /// Request never got a response (DNS, TLS, connection reset, timeout).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success response.
    #[error("GitHub API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Primary or secondary rate limit hit.
    #[error("rate limit exceeded, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    /// Token missing, expired or lacking scope.
    #[error("GitHub API authentication failed, check the token")]
    Unauthorized,

    /// Response body did not have the expected shape.
    #[error("failed to decode GitHub response: {0}")]
    Decode(String),

    /// Client configuration rejected before any request.
    #[error("invalid GitHub configuration: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for GitHubError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GitHubError::Decode(err.to_string())
        } else {
            GitHubError::Http(err.to_string())
        }
    }
}

impl GitHubError {
    /// Whether the same request could succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            GitHubError::Http(_) | GitHubError::RateLimited { .. } => true,
            GitHubError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type for GitHub API operations.
pub type GitHubResult<T> = std::result::Result<T, GitHubError>;
