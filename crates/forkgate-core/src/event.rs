//! Inbound dispatch events.
//!
//! GitHub Actions hands a workflow its trigger as an event name
//! (`GITHUB_EVENT_NAME`) plus a JSON payload file (`GITHUB_EVENT_PATH`).
//! Three triggers are understood:
//!
//! - `push`: direct, ref taken from the payload
//! - `pull_request`: direct, trusted only when head and base repo agree
//! - `repository_dispatch`: a maintainer's slash command for a PR

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::commit::CommitId;
use crate::error::AuthorizationError;

/// A trigger that is not a maintainer approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectEvent {
    /// Ref the event points at (`refs/heads/main`, `refs/pull/7/merge`).
    pub git_ref: String,

    /// Commit at the tip of `git_ref`.
    pub head_sha: CommitId,

    /// `owner/name` of the repository the code comes from.
    pub origin_repo: String,

    /// `owner/name` of the repository the workflow runs in.
    pub base_repo: String,

    /// PR number, for `pull_request` events.
    pub pr_number: Option<u64>,
}

impl DirectEvent {
    /// Same-repository events never cross a trust boundary.
    pub fn is_same_repository(&self) -> bool {
        self.origin_repo.eq_ignore_ascii_case(&self.base_repo)
    }
}

/// A maintainer's slash-command approval of a specific PR commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommandEvent {
    /// The commit the maintainer approved.
    pub asserted_sha: CommitId,

    /// The PR the command was issued on.
    pub pr_number: u64,

    /// PR head as recorded in the payload when the command was typed.
    pub payload_head_sha: Option<CommitId>,
}

/// An inbound trigger, consumed once by the dispatch gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchEvent {
    Direct(DirectEvent),
    SlashCommand(SlashCommandEvent),
}

impl DispatchEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchEvent::Direct(_) => "direct",
            DispatchEvent::SlashCommand(_) => "slash_command",
        }
    }

    /// Parse a GitHub Actions event.
    pub fn from_github(
        event_name: &str,
        payload: serde_json::Value,
    ) -> Result<Self, AuthorizationError> {
        match event_name {
            "repository_dispatch" => {
                let p: RepositoryDispatchPayload = decode(event_name, payload)?;
                let slash = p.client_payload.slash_command;
                let asserted = slash
                    .sha
                    .or(slash.args.and_then(|a| a.named.sha))
                    .ok_or_else(|| AuthorizationError::MalformedPayload {
                        event: event_name.to_string(),
                        reason: "missing slash_command.sha".to_string(),
                    })?;
                let pr = p.client_payload.pull_request;
                Ok(DispatchEvent::SlashCommand(SlashCommandEvent {
                    asserted_sha: CommitId::new(asserted),
                    pr_number: pr.number,
                    payload_head_sha: pr.head.map(|h| CommitId::new(h.sha)),
                }))
            }
            "push" => {
                let p: PushPayload = decode(event_name, payload)?;
                Ok(DispatchEvent::Direct(DirectEvent {
                    git_ref: p.git_ref,
                    head_sha: CommitId::new(p.after),
                    origin_repo: p.repository.full_name.clone(),
                    base_repo: p.repository.full_name,
                    pr_number: None,
                }))
            }
            "pull_request" => {
                let p: PullRequestPayload = decode(event_name, payload)?;
                let pr = p.pull_request;
                let origin_repo = pr.head.repo.map(|r| r.full_name).unwrap_or_default();
                Ok(DispatchEvent::Direct(DirectEvent {
                    git_ref: format!("refs/pull/{}/merge", p.number),
                    head_sha: CommitId::new(pr.head.sha),
                    origin_repo,
                    base_repo: pr.base.repo.full_name,
                    pr_number: Some(p.number),
                }))
            }
            other => Err(AuthorizationError::UnknownEventKind(other.to_string())),
        }
    }

    /// Read the payload file and parse it.
    pub fn from_path(event_name: &str, path: &Path) -> Result<Self, AuthorizationError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| AuthorizationError::MalformedPayload {
                event: event_name.to_string(),
                reason: format!("cannot read {}: {}", path.display(), e),
            })?;
        let payload = serde_json::from_str(&content).map_err(|e| {
            AuthorizationError::MalformedPayload {
                event: event_name.to_string(),
                reason: e.to_string(),
            }
        })?;
        Self::from_github(event_name, payload)
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    event_name: &str,
    payload: serde_json::Value,
) -> Result<T, AuthorizationError> {
    serde_json::from_value(payload).map_err(|e| AuthorizationError::MalformedPayload {
        event: event_name.to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Payload shapes (only the fields the gate reads)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RepositoryDispatchPayload {
    client_payload: ClientPayload,
}

#[derive(Deserialize)]
struct ClientPayload {
    slash_command: SlashCommandPayload,
    pull_request: PullRequestRef,
}

#[derive(Deserialize)]
struct SlashCommandPayload {
    sha: Option<String>,
    args: Option<SlashCommandArgs>,
}

#[derive(Deserialize)]
struct SlashCommandArgs {
    #[serde(default)]
    named: NamedArgs,
}

#[derive(Default, Deserialize)]
struct NamedArgs {
    sha: Option<String>,
}

#[derive(Deserialize)]
struct PullRequestRef {
    number: u64,
    head: Option<HeadRef>,
}

#[derive(Deserialize)]
struct HeadRef {
    sha: String,
}

#[derive(Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    repository: Repository,
}

#[derive(Deserialize)]
struct Repository {
    full_name: String,
}

#[derive(Deserialize)]
struct PullRequestPayload {
    number: u64,
    pull_request: PullRequestBody,
}

#[derive(Deserialize)]
struct PullRequestBody {
    head: BranchRef,
    base: BaseRef,
}

#[derive(Deserialize)]
struct BranchRef {
    sha: String,
    // null when the fork has been deleted
    repo: Option<Repository>,
}

#[derive(Deserialize)]
struct BaseRef {
    repo: Repository,
}
