//! Commit identifiers, repository references and the commit matcher.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a full SHA-1 object id in hex.
pub const SHA1_HEX_LEN: usize = 40;

/// Length of a full SHA-256 object id in hex.
pub const SHA256_HEX_LEN: usize = 64;

/// A git commit identifier as reported by the hosting platform.
///
/// The value is kept verbatim. No trimming, no case folding: two ids are
/// the same commit only if their strings are byte-for-byte equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        CommitId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a fully qualified object id (40 or 64 lowercase hex).
    pub fn is_full_length(&self) -> bool {
        matches!(self.0.len(), SHA1_HEX_LEN | SHA256_HEX_LEN)
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
    }

    /// Short form (first 7 chars), for log lines only.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        CommitId::new(s)
    }
}

/// Compare an asserted commit against the actual PR head.
///
/// Exact full-string equality. A prefix, a substring or a case variant of
/// `actual` does not match, and an empty id never matches anything.
pub fn matches(asserted: &CommitId, actual: &CommitId) -> bool {
    !asserted.0.is_empty() && asserted.0 == actual.0
}

/// An `owner/name` repository reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// `owner/name`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Error returned when a repository string is not `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid repository reference '{0}', expected owner/name")]
pub struct InvalidRepoRef(pub String);

impl FromStr for RepoRef {
    type Err = InvalidRepoRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(RepoRef::new(owner, name))
            }
            _ => Err(InvalidRepoRef(s.to_string())),
        }
    }
}
