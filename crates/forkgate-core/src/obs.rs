//! Structured observability hooks for the dispatch lifecycle.
//!
//! This module provides:
//! - Dispatch-scoped tracing spans via the `DispatchSpan` RAII guard
//! - Emission functions for key lifecycle events: gate decision, cell
//!   finished, check-run sync, dispatch finished
//!
//! Events are emitted at `info!` level, failures at `warn!`/`error!`.
//! For JSON output, pass `--json` to the CLI.

use tracing::{error, info, warn};

use crate::check_run::{Conclusion, JobOutcome};
use crate::error::AuthorizationError;

/// RAII guard that enters a dispatch-scoped tracing span.
///
/// # Example
///
/// ```ignore
/// let _span = DispatchSpan::enter("4f1c…", "slash_command");
/// // all tracing calls below carry dispatch_id and kind
/// ```
pub struct DispatchSpan {
    _span: tracing::span::EnteredSpan,
}

impl DispatchSpan {
    pub fn enter(dispatch_id: &str, kind: &str) -> Self {
        Self {
            _span: dispatch_span(dispatch_id, kind).entered(),
        }
    }
}

/// The dispatch span itself, for `.instrument()` on futures that must stay
/// `Send`.
pub fn dispatch_span(dispatch_id: &str, kind: &str) -> tracing::Span {
    tracing::info_span!("forkgate.dispatch", dispatch_id = %dispatch_id, kind = %kind)
}

/// Emit event: the gate decided.
pub fn emit_gate_decided(
    kind: &str,
    proceed: bool,
    checkout_ref: &str,
    reason: Option<&AuthorizationError>,
) {
    match reason {
        None => info!(
            event = "gate.decided",
            kind = %kind,
            proceed = proceed,
            checkout_ref = %checkout_ref,
        ),
        Some(err) => warn!(
            event = "gate.decided",
            kind = %kind,
            proceed = proceed,
            reason = err.code(),
            error = %err,
        ),
    }
}

/// Emit event: one matrix cell reached a terminal outcome.
pub fn emit_cell_finished(job_name: &str, outcome: &JobOutcome) {
    info!(
        event = "cell.finished",
        job = %job_name,
        conclusion = outcome.conclusion.as_str(),
        exit_code = outcome.exit_code,
        duration_ms = outcome.duration_ms,
    );
}

/// Emit event: a check run now holds the job's conclusion.
pub fn emit_sync_succeeded(
    job_name: &str,
    check_run_id: u64,
    conclusion: Conclusion,
    already_synced: bool,
) {
    info!(
        event = "check_run.synced",
        job = %job_name,
        check_run_id = check_run_id,
        conclusion = conclusion.as_str(),
        already_synced = already_synced,
    );
}

/// Emit event: syncing a check run failed (error level: the check stays stuck).
pub fn emit_sync_failed(job_name: &str, error: &dyn std::fmt::Display) {
    error!(event = "check_run.sync_failed", job = %job_name, error = %error);
}

/// Emit event: dispatch finished.
pub fn emit_dispatch_finished(dispatch_id: &str, cells: usize, passed: bool, duration_ms: u64) {
    info!(
        event = "dispatch.finished",
        dispatch_id = %dispatch_id,
        cells = cells,
        passed = passed,
        duration_ms = duration_ms,
    );
}
