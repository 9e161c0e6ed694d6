//! In-memory fakes for the GitHub API traits (testing only)
//!
//! [`MemoryGitHub`] implements [`PullRequestApi`] and [`CheckRunApi`] over
//! plain maps and counts every call, so tests can assert that a code path
//! performed no lookup or no update.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::check_run::{CheckRun, CheckRunStatus, Conclusion};
use crate::commit::{CommitId, RepoRef};
use crate::github::{CheckRunApi, GitHubError, GitHubResult, PullRequest, PullRequestApi};

/// Call counters for [`MemoryGitHub`].
#[derive(Debug, Default)]
pub struct CallCounts {
    pub pr_lookups: AtomicUsize,
    pub lists: AtomicUsize,
    pub updates: AtomicUsize,
}

impl CallCounts {
    pub fn pr_lookups(&self) -> usize {
        self.pr_lookups.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

/// In-memory GitHub backed by `HashMap`s.
#[derive(Debug, Default)]
pub struct MemoryGitHub {
    pull_requests: Mutex<HashMap<u64, PullRequest>>,
    check_runs: Mutex<Vec<CheckRun>>,
    next_id: AtomicU64,
    // errors handed out, in order, before any real answer
    pending_failures: Mutex<VecDeque<GitHubError>>,
    // same, but only consumed by check-run list calls
    list_failures: Mutex<VecDeque<GitHubError>>,
    calls: CallCounts,
}

impl MemoryGitHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Self::default()
        }
    }

    /// Set (or move) a PR's head.
    pub fn set_pull_request(&self, number: u64, head_sha: &str) {
        let mut prs = self.pull_requests.lock().unwrap();
        prs.insert(
            number,
            PullRequest {
                number,
                head_sha: CommitId::new(head_sha),
                head_repo: Some("contributor/fork".to_string()),
            },
        );
    }

    /// Add an in-progress check run and return its id.
    pub fn add_check_run(&self, head_sha: &str, name: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.check_runs.lock().unwrap().push(CheckRun {
            id,
            name: name.to_string(),
            head_sha: CommitId::new(head_sha),
            status: CheckRunStatus::InProgress,
            conclusion: None,
        });
        id
    }

    /// Make the next API call fail with `err`. Stacks in FIFO order.
    pub fn fail_next(&self, err: GitHubError) {
        self.pending_failures.lock().unwrap().push_back(err);
    }

    /// Make the next check-run list call fail with `err`, leaving PR
    /// lookups and updates alone.
    pub fn fail_next_list(&self, err: GitHubError) {
        self.list_failures.lock().unwrap().push_back(err);
    }

    pub fn check_run(&self, id: u64) -> Option<CheckRun> {
        self.check_runs
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    fn take_failure(&self) -> GitHubResult<()> {
        match self.pending_failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PullRequestApi for MemoryGitHub {
    async fn get_pull_request(&self, _repo: &RepoRef, number: u64) -> GitHubResult<PullRequest> {
        self.calls.pr_lookups.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        self.pull_requests
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| GitHubError::Api {
                status: 404,
                message: "Not Found".to_string(),
            })
    }
}

#[async_trait]
impl CheckRunApi for MemoryGitHub {
    async fn list_check_runs_for_ref(
        &self,
        _repo: &RepoRef,
        git_ref: &str,
        check_name: Option<&str>,
    ) -> GitHubResult<Vec<CheckRun>> {
        self.calls.lists.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        if let Some(err) = self.list_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let runs = self.check_runs.lock().unwrap();
        Ok(runs
            .iter()
            .filter(|r| r.head_sha.as_str() == git_ref)
            .filter(|r| check_name.map_or(true, |name| r.name == name))
            .cloned()
            .collect())
    }

    async fn update_check_run(
        &self,
        _repo: &RepoRef,
        check_run_id: u64,
        status: CheckRunStatus,
        conclusion: Option<Conclusion>,
    ) -> GitHubResult<CheckRun> {
        self.calls.updates.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let mut runs = self.check_runs.lock().unwrap();
        let run = runs
            .iter_mut()
            .find(|r| r.id == check_run_id)
            .ok_or_else(|| GitHubError::Api {
                status: 404,
                message: "Not Found".to_string(),
            })?;
        run.status = status;
        run.conclusion = conclusion;
        Ok(run.clone())
    }
}
