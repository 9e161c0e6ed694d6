//! The dispatch gate.
//!
//! Decides whether a privileged, secret-bearing run may start for an
//! inbound event. Rules:
//!
//! - Direct events proceed only when the code comes from the base
//!   repository itself. The checkout ref is the event's own ref.
//! - Slash-command events proceed only when the approved commit is exactly
//!   the PR's current head, looked up at decision time. The checkout ref is
//!   the PR's merge ref, so the run tests what would land after merge.
//!
//! The secrets travel with the decision: [`GateDecision::Proceed`] carries
//! them inside a [`Grant`], [`GateDecision::Reject`] has dropped them.

use std::sync::Arc;

use tracing::{info, warn};

use crate::commit::{matches, CommitId, RepoRef};
use crate::error::AuthorizationError;
use crate::event::{DirectEvent, DispatchEvent, SlashCommandEvent};
use crate::github::{merge_ref, PullRequestApi};
use crate::obs::emit_gate_decided;
use crate::secrets::SecretVault;

/// Knobs for the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GatePolicy {
    /// Refuse approvals that name an abbreviated commit id.
    pub require_full_sha: bool,
}

impl GatePolicy {
    /// Only fully qualified 40/64-hex commit ids are accepted.
    pub fn strict() -> Self {
        Self {
            require_full_sha: true,
        }
    }
}

/// Permission to run the privileged job. Only the gate constructs one.
#[derive(Debug)]
pub struct Grant {
    checkout_ref: String,
    approved_sha: CommitId,
    pr_number: Option<u64>,
    reports_to_fork: bool,
    secrets: SecretVault,
}

impl Grant {
    /// Ref the executor must check out.
    pub fn checkout_ref(&self) -> &str {
        &self.checkout_ref
    }

    /// Commit the approval was given for.
    pub fn approved_sha(&self) -> &CommitId {
        &self.approved_sha
    }

    pub fn pr_number(&self) -> Option<u64> {
        self.pr_number
    }

    /// Whether results must be pushed onto the PR's check runs.
    ///
    /// True for slash-command grants: the job runs in the base repository's
    /// context, so nothing reports onto the fork commit on its own.
    pub fn reports_to_fork(&self) -> bool {
        self.reports_to_fork
    }

    pub fn secret_names(&self) -> Vec<&str> {
        self.secrets.names().collect()
    }

    /// Secret name/value pairs for the executor's environment. Audited.
    pub fn secret_env(&self) -> Vec<(String, String)> {
        self.secrets.read_all()
    }
}

/// Outcome of [`DispatchAuthorizer::authorize`].
#[derive(Debug)]
pub enum GateDecision {
    Proceed(Grant),
    Reject(AuthorizationError),
}

impl GateDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, GateDecision::Proceed(_))
    }

    pub fn into_result(self) -> Result<Grant, AuthorizationError> {
        match self {
            GateDecision::Proceed(grant) => Ok(grant),
            GateDecision::Reject(err) => Err(err),
        }
    }
}

/// Authorizes dispatches against the base repository.
pub struct DispatchAuthorizer {
    repo: RepoRef,
    pull_requests: Arc<dyn PullRequestApi>,
    policy: GatePolicy,
}

impl DispatchAuthorizer {
    pub fn new(repo: RepoRef, pull_requests: Arc<dyn PullRequestApi>) -> Self {
        Self {
            repo,
            pull_requests,
            policy: GatePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: GatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn repo(&self) -> &RepoRef {
        &self.repo
    }

    /// Decide whether `event` may run with `secrets`.
    ///
    /// `secrets` is consumed: on `Reject` it is dropped before this returns.
    pub async fn authorize(&self, event: DispatchEvent, secrets: SecretVault) -> GateDecision {
        let kind = event.kind();
        let decision = match event {
            DispatchEvent::Direct(direct) => self.authorize_direct(direct, secrets),
            DispatchEvent::SlashCommand(slash) => {
                self.authorize_slash_command(slash, secrets).await
            }
        };

        match &decision {
            GateDecision::Proceed(grant) => {
                emit_gate_decided(kind, true, grant.checkout_ref(), None);
            }
            GateDecision::Reject(err) => {
                emit_gate_decided(kind, false, "", Some(err));
            }
        }
        decision
    }

    fn authorize_direct(&self, event: DirectEvent, secrets: SecretVault) -> GateDecision {
        if !event.is_same_repository() {
            return GateDecision::Reject(AuthorizationError::UntrustedOrigin {
                origin: event.origin_repo,
                base: event.base_repo,
            });
        }

        GateDecision::Proceed(Grant {
            checkout_ref: event.git_ref,
            approved_sha: event.head_sha,
            pr_number: event.pr_number,
            reports_to_fork: false,
            secrets,
        })
    }

    async fn authorize_slash_command(
        &self,
        event: SlashCommandEvent,
        secrets: SecretVault,
    ) -> GateDecision {
        if self.policy.require_full_sha && !event.asserted_sha.is_full_length() {
            return GateDecision::Reject(AuthorizationError::AbbreviatedCommit(
                event.asserted_sha.to_string(),
            ));
        }

        let pr = match self
            .pull_requests
            .get_pull_request(&self.repo, event.pr_number)
            .await
        {
            Ok(pr) => pr,
            Err(source) => {
                return GateDecision::Reject(AuthorizationError::LookupFailed {
                    pr_number: event.pr_number,
                    source,
                });
            }
        };

        if let Some(payload_head) = &event.payload_head_sha {
            if payload_head != &pr.head_sha {
                info!(
                    pr = event.pr_number,
                    payload_head = %payload_head.short(),
                    current_head = %pr.head_sha.short(),
                    "pull request head moved since the command was issued"
                );
            }
        }

        if !matches(&event.asserted_sha, &pr.head_sha) {
            warn!(
                pr = event.pr_number,
                asserted = %event.asserted_sha,
                actual = %pr.head_sha,
                "approved commit is not the pull request head"
            );
            return GateDecision::Reject(AuthorizationError::CommitMismatch {
                asserted: event.asserted_sha.to_string(),
                actual: pr.head_sha.to_string(),
            });
        }

        GateDecision::Proceed(Grant {
            checkout_ref: merge_ref(event.pr_number),
            approved_sha: event.asserted_sha,
            pr_number: Some(event.pr_number),
            reports_to_fork: true,
            secrets,
        })
    }
}
