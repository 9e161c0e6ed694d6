//! Check-run status synchronizer.
//!
//! A privileged job triggered by slash command runs in the base
//! repository's context, so GitHub attaches nothing to the fork PR's
//! commit on its own. The synchronizer finds the check run named after the
//! job on that commit and completes it with the job's conclusion.
//!
//! Exactly one run must match. Zero or several matches are errors and no
//! update is made; picking one would report onto the wrong check.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::check_run::{CheckRunIndex, CheckRunMatch, CheckRunStatus, Conclusion, JobOutcome};
use crate::commit::{CommitId, RepoRef};
use crate::github::{CheckRunApi, GitHubError, PullRequestApi};
use crate::obs::{emit_sync_failed, emit_sync_succeeded};

/// Why a check run could not be synced.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no check run named '{job_name}' on {git_ref}")]
    NotFound { job_name: String, git_ref: String },

    #[error("{count} check runs named '{job_name}' on {git_ref}, refusing to guess")]
    Ambiguous {
        job_name: String,
        git_ref: String,
        count: usize,
    },

    #[error("GitHub transport error: {0}")]
    Transport(#[from] GitHubError),
}

impl SyncError {
    /// Only transient transport failures can be fixed by trying again.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// What a successful sync did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub job_name: String,
    pub check_run_id: u64,
    pub head_sha: CommitId,
    pub conclusion: Conclusion,

    /// The run already held this conclusion; no update call was made.
    pub already_synced: bool,
}

/// Completes check runs on behalf of privileged jobs.
pub struct CheckRunSynchronizer {
    repo: RepoRef,
    pull_requests: Arc<dyn PullRequestApi>,
    check_runs: Arc<dyn CheckRunApi>,
}

impl CheckRunSynchronizer {
    pub fn new(
        repo: RepoRef,
        pull_requests: Arc<dyn PullRequestApi>,
        check_runs: Arc<dyn CheckRunApi>,
    ) -> Self {
        Self {
            repo,
            pull_requests,
            check_runs,
        }
    }

    /// Sync `job_name` on the PR's current head.
    pub async fn sync(
        &self,
        pr_number: u64,
        job_name: &str,
        outcome: &JobOutcome,
    ) -> Result<SyncReport, SyncError> {
        let pr = self
            .pull_requests
            .get_pull_request(&self.repo, pr_number)
            .await?;
        debug!(pr = pr_number, head = %pr.head_sha.short(), "resolved pull request head");
        self.sync_commit(&pr.head_sha, job_name, outcome).await
    }

    /// Sync `job_name` on a commit the caller supplies (the commit that was
    /// actually tested).
    pub async fn sync_commit(
        &self,
        commit: &CommitId,
        job_name: &str,
        outcome: &JobOutcome,
    ) -> Result<SyncReport, SyncError> {
        let result = self.complete(commit, job_name, outcome.conclusion).await;
        match &result {
            Ok(report) => emit_sync_succeeded(
                job_name,
                report.check_run_id,
                report.conclusion,
                report.already_synced,
            ),
            Err(err) => emit_sync_failed(job_name, err),
        }
        result
    }

    /// Look up the single run named `job_name` on `commit`.
    pub async fn find(
        &self,
        commit: &CommitId,
        job_name: &str,
    ) -> Result<CheckRunMatch, SyncError> {
        let runs = self
            .check_runs
            .list_check_runs_for_ref(&self.repo, commit.as_str(), Some(job_name))
            .await?;
        Ok(CheckRunIndex::new(runs).find(job_name))
    }

    async fn complete(
        &self,
        commit: &CommitId,
        job_name: &str,
        conclusion: Conclusion,
    ) -> Result<SyncReport, SyncError> {
        let run = match self.find(commit, job_name).await? {
            CheckRunMatch::One(run) => run,
            CheckRunMatch::None => {
                return Err(SyncError::NotFound {
                    job_name: job_name.to_string(),
                    git_ref: commit.to_string(),
                })
            }
            CheckRunMatch::Ambiguous(count) => {
                return Err(SyncError::Ambiguous {
                    job_name: job_name.to_string(),
                    git_ref: commit.to_string(),
                    count,
                })
            }
        };

        if run.holds(conclusion) {
            return Ok(SyncReport {
                job_name: job_name.to_string(),
                check_run_id: run.id,
                head_sha: commit.clone(),
                conclusion,
                already_synced: true,
            });
        }

        let updated = self
            .check_runs
            .update_check_run(
                &self.repo,
                run.id,
                CheckRunStatus::Completed,
                Some(conclusion),
            )
            .await?;

        Ok(SyncReport {
            job_name: job_name.to_string(),
            check_run_id: updated.id,
            head_sha: commit.clone(),
            conclusion,
            already_synced: false,
        })
    }
}

/// Backoff schedule for [`sync_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = run once).
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds).
    pub backoff_base_ms: u64,

    /// Upper bound for any single delay, including server-requested ones.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn delay(&self, attempt: u32, err: &SyncError) -> Duration {
        let backoff = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let requested = match err {
            SyncError::Transport(GitHubError::RateLimited { retry_after_secs }) => {
                retry_after_secs.saturating_mul(1_000)
            }
            _ => 0,
        };
        Duration::from_millis(backoff.max(requested).min(self.max_delay_ms))
    }
}

/// Run a sync operation, retrying transient transport errors with exponential
/// backoff.
///
/// `NotFound` and `Ambiguous` return immediately: the check-run layout will
/// not change between attempts.
pub async fn sync_with_retry<F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<SyncReport, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<SyncReport, SyncError>>,
{
    let max_attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(report) => return Ok(report),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay(attempt, &err);
                warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "check-run sync failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
