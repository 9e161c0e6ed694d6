//! Dispatch orchestration: gate, execute the matrix, report every cell.

use std::sync::Arc;
use std::time::Instant;

use forkgate_core::{
    dispatch_span, emit_cell_finished, emit_dispatch_finished, sync_with_retry,
    AuthorizationError, CheckRunSynchronizer, CommitId, DispatchAuthorizer, DispatchEvent,
    GateDecision, Grant, JobOutcome, RetryPolicy, SecretVault, SyncReport,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::matrix::{validate, ConfigError, MatrixCell};
use crate::runner::PrivilegedExecutor;

/// Why a dispatch did not run.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatch rejected: {0}")]
    Rejected(#[from] AuthorizationError),

    #[error("invalid matrix: {0}")]
    InvalidMatrix(#[from] ConfigError),
}

/// What happened to a cell's check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CellSync {
    /// The grant does not report onto a fork PR.
    Skipped,
    Synced(SyncReport),
    Failed { error: String },
}

/// One matrix cell's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellReport {
    pub job_name: String,
    pub outcome: JobOutcome,
    pub sync: CellSync,
}

/// Result of a complete dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReport {
    pub dispatch_id: String,
    pub kind: String,
    pub checkout_ref: String,
    pub approved_sha: CommitId,
    pub cells: Vec<CellReport>,

    /// Disabled cells, by name.
    pub skipped: Vec<String>,

    pub duration_ms: u64,
}

impl DispatchReport {
    /// Whether every cell that ran passed.
    pub fn passed(&self) -> bool {
        self.cells.iter().all(|c| c.outcome.passed())
    }

    /// Cells whose check run could not be completed.
    pub fn sync_failures(&self) -> impl Iterator<Item = &CellReport> {
        self.cells
            .iter()
            .filter(|c| matches!(c.sync, CellSync::Failed { .. }))
    }

    pub fn passed_count(&self) -> usize {
        self.cells.iter().filter(|c| c.outcome.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.cells.iter().filter(|c| !c.outcome.passed()).count()
    }
}

/// Runs one dispatch end to end.
///
/// The worker holds no state between dispatches. Cells run concurrently;
/// each cell's check-run sync is a finalizer that runs whatever the
/// executor did, including panicking.
pub struct DispatchWorker {
    authorizer: DispatchAuthorizer,
    executor: Arc<dyn PrivilegedExecutor>,
    synchronizer: CheckRunSynchronizer,
    retry: RetryPolicy,
}

impl DispatchWorker {
    pub fn new(
        authorizer: DispatchAuthorizer,
        executor: Arc<dyn PrivilegedExecutor>,
        synchronizer: CheckRunSynchronizer,
    ) -> Self {
        Self {
            authorizer,
            executor,
            synchronizer,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Authorize `event`, then run `cells` under the grant.
    ///
    /// On rejection the executor is never called and `secrets` is dropped
    /// unread.
    pub async fn run(
        &self,
        event: DispatchEvent,
        secrets: SecretVault,
        cells: Vec<MatrixCell>,
    ) -> Result<DispatchReport, DispatchError> {
        validate(&cells)?;

        let dispatch_id = Uuid::new_v4().to_string();
        let kind = event.kind();
        let span = dispatch_span(&dispatch_id, kind);

        async move {
            let start = Instant::now();

            let grant = match self.authorizer.authorize(event, secrets).await {
                GateDecision::Proceed(grant) => Arc::new(grant),
                GateDecision::Reject(err) => return Err(DispatchError::Rejected(err)),
            };

            let (enabled, disabled): (Vec<_>, Vec<_>) =
                cells.into_iter().partition(|cell| cell.enabled);
            let skipped: Vec<String> = disabled.into_iter().map(|cell| cell.name).collect();
            for name in &skipped {
                info!(cell = %name, "skipping disabled cell");
            }

            let setup_failure = match self.executor.prepare(&grant).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(error = %e, "dispatch preparation failed");
                    Some(format!("preparation failed: {}", e))
                }
            };

            let reports = join_all(enabled.into_iter().map(|cell| {
                self.run_cell_with_finalizer(grant.clone(), cell, setup_failure.as_deref())
            }))
            .await;

            let report = DispatchReport {
                dispatch_id: dispatch_id.clone(),
                kind: kind.to_string(),
                checkout_ref: grant.checkout_ref().to_string(),
                approved_sha: grant.approved_sha().clone(),
                cells: reports,
                skipped,
                duration_ms: start.elapsed().as_millis() as u64,
            };

            emit_dispatch_finished(
                &dispatch_id,
                report.cells.len(),
                report.passed(),
                report.duration_ms,
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Execute one cell, then always sync its outcome.
    async fn run_cell_with_finalizer(
        &self,
        grant: Arc<Grant>,
        cell: MatrixCell,
        setup_failure: Option<&str>,
    ) -> CellReport {
        let job_name = cell.name.clone();

        let outcome = match setup_failure {
            Some(reason) => JobOutcome::failure(reason),
            None => self.execute_isolated(grant.clone(), cell).await,
        };
        emit_cell_finished(&job_name, &outcome);

        let sync = if grant.reports_to_fork() {
            let result = sync_with_retry(&self.retry, || {
                self.synchronizer
                    .sync_commit(grant.approved_sha(), &job_name, &outcome)
            })
            .await;
            match result {
                Ok(report) => CellSync::Synced(report),
                Err(e) => CellSync::Failed {
                    error: e.to_string(),
                },
            }
        } else {
            CellSync::Skipped
        };

        CellReport {
            job_name,
            outcome,
            sync,
        }
    }

    /// Run the executor on its own task so a panic becomes an outcome.
    async fn execute_isolated(&self, grant: Arc<Grant>, cell: MatrixCell) -> JobOutcome {
        let executor = self.executor.clone();
        let span = info_span!("forkgate.cell", cell = %cell.name);
        let handle = tokio::spawn(
            async move { executor.execute(&grant, &cell).await }.instrument(span),
        );

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => JobOutcome::failure("executor panicked"),
            Err(e) => JobOutcome::failure(format!("executor task failed: {}", e)),
        }
    }
}
