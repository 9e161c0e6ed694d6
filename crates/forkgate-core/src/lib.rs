//! forkgate Core Library
//!
//! Gates privileged CI runs for pull requests from forks and reports their
//! results back onto the fork's commit.
//!
//! - [`commit`]: exact commit identifier matching
//! - [`event`]: inbound GitHub Actions events
//! - [`gate`]: the dispatch authorizer
//! - [`secrets`]: secrets that only an authorized dispatch can reach
//! - [`github`]: GitHub REST client and API traits
//! - [`sync`]: check-run status synchronizer

pub mod check_run;
pub mod commit;
pub mod error;
pub mod event;
pub mod fakes;
pub mod gate;
pub mod github;
pub mod obs;
pub mod secrets;
pub mod sync;
pub mod telemetry;

pub use check_run::{
    CheckRun, CheckRunIndex, CheckRunMatch, CheckRunStatus, Conclusion, JobOutcome,
};
pub use commit::{matches, CommitId, RepoRef};
pub use error::AuthorizationError;
pub use event::{DirectEvent, DispatchEvent, SlashCommandEvent};
pub use gate::{DispatchAuthorizer, GateDecision, GatePolicy, Grant};
pub use github::{
    CheckRunApi, GitHubClient, GitHubConfig, GitHubError, GitHubResult, PullRequest,
    PullRequestApi,
};
pub use obs::{
    dispatch_span, emit_cell_finished, emit_dispatch_finished, emit_gate_decided,
    emit_sync_failed, emit_sync_succeeded, DispatchSpan,
};
pub use secrets::{SecretAudit, SecretValue, SecretVault};
pub use sync::{sync_with_retry, CheckRunSynchronizer, RetryPolicy, SyncError, SyncReport};
pub use telemetry::init_tracing;

/// forkgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
