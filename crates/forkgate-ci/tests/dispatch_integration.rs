//! Integration tests for the dispatch worker with MemoryGitHub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use forkgate_ci::{
    CellSync, CommandExecutor, DispatchError, DispatchWorker, ExecutionError, MatrixCell,
    PrivilegedExecutor,
};
use forkgate_core::fakes::MemoryGitHub;
use forkgate_core::{
    AuthorizationError, CheckRunStatus, CheckRunSynchronizer, Conclusion, DispatchAuthorizer,
    DispatchEvent, GitHubError, Grant, JobOutcome, RepoRef, RetryPolicy, SecretVault,
};
use serde_json::json;

/// Executor that returns scripted outcomes and records what it saw.
#[derive(Default)]
struct RecordingExecutor {
    outcomes: HashMap<String, Conclusion>,
    panic_on: Option<String>,
    fail_prepare: bool,
    prepares: AtomicUsize,
    executions: AtomicUsize,
    checkout_refs: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    fn with_outcome(mut self, cell: &str, conclusion: Conclusion) -> Self {
        self.outcomes.insert(cell.to_string(), conclusion);
        self
    }

    fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrivilegedExecutor for RecordingExecutor {
    async fn prepare(&self, _grant: &Grant) -> Result<(), ExecutionError> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        if self.fail_prepare {
            return Err(ExecutionError::CommandFailed {
                command: "git fetch".to_string(),
                code: 128,
                stderr: "couldn't find remote ref".to_string(),
            });
        }
        Ok(())
    }

    async fn execute(&self, grant: &Grant, cell: &MatrixCell) -> JobOutcome {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.checkout_refs
            .lock()
            .unwrap()
            .push(grant.checkout_ref().to_string());
        if self.panic_on.as_deref() == Some(cell.name.as_str()) {
            panic!("executor blew up on {}", cell.name);
        }
        let conclusion = self
            .outcomes
            .get(&cell.name)
            .copied()
            .unwrap_or(Conclusion::Success);
        JobOutcome::new(conclusion)
    }
}

fn repo() -> RepoRef {
    RepoRef::new("octo-org", "widgets")
}

fn worker(gh: &Arc<MemoryGitHub>, executor: Arc<dyn PrivilegedExecutor>) -> DispatchWorker {
    DispatchWorker::new(
        DispatchAuthorizer::new(repo(), gh.clone()),
        executor,
        CheckRunSynchronizer::new(repo(), gh.clone(), gh.clone()),
    )
    .with_retry(RetryPolicy::none())
}

fn slash(sha: &str, pr: u64) -> DispatchEvent {
    DispatchEvent::from_github(
        "repository_dispatch",
        json!({
            "client_payload": {
                "slash_command": { "command": "ok-to-test", "sha": sha },
                "pull_request": { "number": pr, "head": { "sha": sha } }
            }
        }),
    )
    .expect("parse")
}

fn push() -> DispatchEvent {
    DispatchEvent::from_github(
        "push",
        json!({
            "ref": "refs/heads/main",
            "after": "abc123",
            "repository": { "full_name": "octo-org/widgets" }
        }),
    )
    .expect("parse")
}

fn cell(name: &str) -> MatrixCell {
    MatrixCell::custom(name, vec!["run-tests".to_string()], 60)
}

/// Test: approved head, failing cell is reported as failure on the PR
#[tokio::test]
async fn test_failing_cell_reported_on_fork_commit() {
    let gh = Arc::new(MemoryGitHub::new());
    gh.set_pull_request(42, "deadbeef");
    let run_id = gh.add_check_run("deadbeef", "py3.9");
    let executor =
        Arc::new(RecordingExecutor::default().with_outcome("py3.9", Conclusion::Failure));

    let report = worker(&gh, executor.clone())
        .run(slash("deadbeef", 42), SecretVault::new(), vec![cell("py3.9")])
        .await
        .expect("dispatch");

    assert_eq!(report.checkout_ref, "refs/pull/42/merge");
    assert!(!report.passed());
    assert_eq!(
        executor.checkout_refs.lock().unwrap().as_slice(),
        ["refs/pull/42/merge".to_string()]
    );

    let run = gh.check_run(run_id).expect("check run");
    assert_eq!(run.status, CheckRunStatus::Completed);
    assert_eq!(run.conclusion, Some(Conclusion::Failure));
    assert!(matches!(report.cells[0].sync, CellSync::Synced(_)));
}

/// Test: moved head rejects before anything runs
#[tokio::test]
async fn test_mismatch_runs_nothing() {
    let gh = Arc::new(MemoryGitHub::new());
    gh.set_pull_request(42, "cafef00d");
    gh.add_check_run("cafef00d", "py3.9");
    let executor = Arc::new(RecordingExecutor::default());
    let vault = SecretVault::new().with_secret("INTEGRATION_API_KEY", "s3cr3t");
    let audit = vault.audit();

    let err = worker(&gh, executor.clone())
        .run(slash("deadbeef", 42), vault, vec![cell("py3.9")])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Rejected(AuthorizationError::CommitMismatch { .. })
    ));
    assert!(err.to_string().contains("commit mismatch"));
    assert_eq!(executor.prepares.load(Ordering::SeqCst), 0);
    assert_eq!(executor.executions(), 0);
    assert_eq!(audit.reads(), 0);
    assert_eq!(gh.calls().updates(), 0);
}

/// Test: every cell is synced, each under its own name
#[tokio::test]
async fn test_cells_sync_independently() {
    let gh = Arc::new(MemoryGitHub::new());
    gh.set_pull_request(7, "deadbeef");
    let a = gh.add_check_run("deadbeef", "py3.9");
    let b = gh.add_check_run("deadbeef", "py3.10");
    let c = gh.add_check_run("deadbeef", "py3.11");
    let executor = Arc::new(
        RecordingExecutor::default()
            .with_outcome("py3.10", Conclusion::TimedOut)
            .with_outcome("py3.11", Conclusion::Cancelled),
    );

    let report = worker(&gh, executor.clone())
        .run(
            slash("deadbeef", 7),
            SecretVault::new(),
            vec![cell("py3.9"), cell("py3.10"), cell("py3.11")],
        )
        .await
        .expect("dispatch");

    assert_eq!(report.cells.len(), 3);
    assert_eq!(executor.executions(), 3);
    assert_eq!(gh.check_run(a).unwrap().conclusion, Some(Conclusion::Success));
    assert_eq!(gh.check_run(b).unwrap().conclusion, Some(Conclusion::TimedOut));
    assert_eq!(gh.check_run(c).unwrap().conclusion, Some(Conclusion::Cancelled));
    assert_eq!(report.sync_failures().count(), 0);
}

/// Test: a panicking executor still produces a synced failure
#[tokio::test]
async fn test_panic_is_synced_as_failure() {
    let gh = Arc::new(MemoryGitHub::new());
    gh.set_pull_request(42, "deadbeef");
    let crashed = gh.add_check_run("deadbeef", "py3.9");
    let fine = gh.add_check_run("deadbeef", "lint");
    let executor = Arc::new(RecordingExecutor {
        panic_on: Some("py3.9".to_string()),
        ..RecordingExecutor::default()
    });

    let report = worker(&gh, executor)
        .run(
            slash("deadbeef", 42),
            SecretVault::new(),
            vec![cell("py3.9"), cell("lint")],
        )
        .await
        .expect("dispatch");

    assert_eq!(gh.check_run(crashed).unwrap().conclusion, Some(Conclusion::Failure));
    assert_eq!(gh.check_run(fine).unwrap().conclusion, Some(Conclusion::Success));
    let crashed_cell = report
        .cells
        .iter()
        .find(|c| c.job_name == "py3.9")
        .expect("cell");
    assert_eq!(crashed_cell.outcome.detail.as_deref(), Some("executor panicked"));
}

/// Test: failed preparation fails every cell without executing any
#[tokio::test]
async fn test_prepare_failure_fails_all_cells() {
    let gh = Arc::new(MemoryGitHub::new());
    gh.set_pull_request(42, "deadbeef");
    let a = gh.add_check_run("deadbeef", "py3.9");
    let b = gh.add_check_run("deadbeef", "py3.10");
    let executor = Arc::new(RecordingExecutor {
        fail_prepare: true,
        ..RecordingExecutor::default()
    });

    let report = worker(&gh, executor.clone())
        .run(
            slash("deadbeef", 42),
            SecretVault::new(),
            vec![cell("py3.9"), cell("py3.10")],
        )
        .await
        .expect("dispatch");

    assert_eq!(executor.executions(), 0);
    assert_eq!(report.failed_count(), 2);
    assert_eq!(gh.check_run(a).unwrap().conclusion, Some(Conclusion::Failure));
    assert_eq!(gh.check_run(b).unwrap().conclusion, Some(Conclusion::Failure));
}

/// Test: a missing check run is reported per cell, others still sync
#[tokio::test]
async fn test_missing_check_run_is_a_sync_failure() {
    let gh = Arc::new(MemoryGitHub::new());
    gh.set_pull_request(42, "deadbeef");
    gh.add_check_run("deadbeef", "py3.9");
    let executor = Arc::new(RecordingExecutor::default());

    let report = worker(&gh, executor)
        .run(
            slash("deadbeef", 42),
            SecretVault::new(),
            vec![cell("py3.9"), cell("docs")],
        )
        .await
        .expect("dispatch");

    assert!(report.passed());
    let failures: Vec<_> = report.sync_failures().map(|c| c.job_name.as_str()).collect();
    assert_eq!(failures, vec!["docs"]);
    assert_eq!(gh.calls().updates(), 1);
}

fn one_quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        backoff_base_ms: 1,
        max_delay_ms: 10,
    }
}

/// Test: a dropped connection during sync is retried and the run completes
#[tokio::test]
async fn test_sync_retries_transport_failure() {
    let gh = Arc::new(MemoryGitHub::new());
    gh.set_pull_request(42, "deadbeef");
    let run_id = gh.add_check_run("deadbeef", "py3.9");
    gh.fail_next_list(GitHubError::Http("connection reset".into()));

    let report = worker(&gh, Arc::new(RecordingExecutor::default()))
        .with_retry(one_quick_retry())
        .run(slash("deadbeef", 42), SecretVault::new(), vec![cell("py3.9")])
        .await
        .expect("dispatch");

    assert!(matches!(report.cells[0].sync, CellSync::Synced(_)));
    assert_eq!(gh.calls().lists(), 2);
    assert_eq!(gh.check_run(run_id).unwrap().conclusion, Some(Conclusion::Success));
}

/// Test: an auth failure during sync is not retried
#[tokio::test]
async fn test_sync_does_not_retry_unauthorized() {
    let gh = Arc::new(MemoryGitHub::new());
    gh.set_pull_request(42, "deadbeef");
    let run_id = gh.add_check_run("deadbeef", "py3.9");
    gh.fail_next_list(GitHubError::Unauthorized);

    let report = worker(&gh, Arc::new(RecordingExecutor::default()))
        .with_retry(one_quick_retry())
        .run(slash("deadbeef", 42), SecretVault::new(), vec![cell("py3.9")])
        .await
        .expect("dispatch");

    assert!(matches!(report.cells[0].sync, CellSync::Failed { .. }));
    assert_eq!(gh.calls().lists(), 1);
    assert_eq!(gh.calls().updates(), 0);
    assert_eq!(gh.check_run(run_id).unwrap().status, CheckRunStatus::InProgress);
}

/// Test: direct events run on their own ref and skip check-run sync
#[tokio::test]
async fn test_push_runs_without_sync() {
    let gh = Arc::new(MemoryGitHub::new());
    let executor = Arc::new(RecordingExecutor::default());

    let report = worker(&gh, executor.clone())
        .run(
            push(),
            SecretVault::new(),
            vec![cell("py3.9"), cell("nightly").disabled()],
        )
        .await
        .expect("dispatch");

    assert_eq!(report.checkout_ref, "refs/heads/main");
    assert_eq!(report.skipped, vec!["nightly".to_string()]);
    assert_eq!(executor.executions(), 1);
    assert!(matches!(report.cells[0].sync, CellSync::Skipped));
    assert_eq!(gh.calls().lists(), 0);
}

/// Test: an invalid matrix is refused before the gate runs
#[tokio::test]
async fn test_duplicate_cells_refused() {
    let gh = Arc::new(MemoryGitHub::new());
    gh.set_pull_request(42, "deadbeef");
    let executor = Arc::new(RecordingExecutor::default());

    let err = worker(&gh, executor)
        .run(
            slash("deadbeef", 42),
            SecretVault::new(),
            vec![cell("py3.9"), cell("py3.9")],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::InvalidMatrix(_)));
    assert_eq!(gh.calls().pr_lookups(), 0);
}

/// Test: real processes through CommandExecutor
#[tokio::test]
async fn test_command_executor_end_to_end() {
    let gh = Arc::new(MemoryGitHub::new());
    gh.set_pull_request(42, "deadbeef");
    let ok = gh.add_check_run("deadbeef", "unit");
    let bad = gh.add_check_run("deadbeef", "integration");
    let cells = vec![
        MatrixCell::custom("unit", vec!["true".to_string()], 60),
        MatrixCell::custom(
            "integration",
            vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"[ "$INTEGRATION_API_KEY" = s3cr3t ] && exit 1"#.to_string(),
            ],
            60,
        ),
    ];

    let report = worker(&gh, Arc::new(CommandExecutor::new()))
        .run(
            slash("deadbeef", 42),
            SecretVault::new().with_secret("INTEGRATION_API_KEY", "s3cr3t"),
            cells,
        )
        .await
        .expect("dispatch");

    assert_eq!(report.passed_count(), 1);
    assert_eq!(gh.check_run(ok).unwrap().conclusion, Some(Conclusion::Success));
    assert_eq!(gh.check_run(bad).unwrap().conclusion, Some(Conclusion::Failure));
    let integration = report
        .cells
        .iter()
        .find(|c| c.job_name == "integration")
        .expect("cell");
    assert_eq!(integration.outcome.exit_code, Some(1));
}
