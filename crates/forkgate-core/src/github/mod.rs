//! GitHub REST API access.
//!
//! The gate and the synchronizer only see the two traits below:
//! - [`PullRequestApi`]: resolve a PR's current head
//! - [`CheckRunApi`]: list and update check runs on a commit
//!
//! [`GitHubClient`] implements both over HTTPS. In-memory fakes live in
//! [`crate::fakes`].

mod client;
mod config;
mod error;

pub use client::GitHubClient;
pub use config::{GitHubConfig, DEFAULT_API_BASE_URL, TOKEN_ENV_VARS};
pub use error::{GitHubError, GitHubResult};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::check_run::{CheckRun, CheckRunStatus, Conclusion};
use crate::commit::{CommitId, RepoRef};

/// A pull request as seen at lookup time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub head_sha: CommitId,
    /// Repository the head commit lives in (the fork, for fork PRs).
    pub head_repo: Option<String>,
}

impl PullRequest {
    /// Merge ref GitHub maintains for this PR.
    pub fn merge_ref(&self) -> String {
        merge_ref(self.number)
    }
}

/// `refs/pull/<number>/merge`.
pub fn merge_ref(number: u64) -> String {
    format!("refs/pull/{}/merge", number)
}

/// Pull request lookups.
#[async_trait]
pub trait PullRequestApi: Send + Sync {
    /// `GET /repos/{owner}/{repo}/pulls/{number}`.
    async fn get_pull_request(&self, repo: &RepoRef, number: u64) -> GitHubResult<PullRequest>;
}

/// Check run listing and updates.
#[async_trait]
pub trait CheckRunApi: Send + Sync {
    /// All check runs on `git_ref`, optionally filtered server-side by name.
    async fn list_check_runs_for_ref(
        &self,
        repo: &RepoRef,
        git_ref: &str,
        check_name: Option<&str>,
    ) -> GitHubResult<Vec<CheckRun>>;

    /// `PATCH /repos/{owner}/{repo}/check-runs/{id}`.
    async fn update_check_run(
        &self,
        repo: &RepoRef,
        check_run_id: u64,
        status: CheckRunStatus,
        conclusion: Option<Conclusion>,
    ) -> GitHubResult<CheckRun>;
}
