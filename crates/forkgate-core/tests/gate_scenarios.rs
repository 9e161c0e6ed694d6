//! Dispatch gate scenarios, end to end from raw event payloads.

use std::sync::Arc;

use forkgate_core::fakes::MemoryGitHub;
use forkgate_core::{
    AuthorizationError, DispatchAuthorizer, DispatchEvent, GateDecision, RepoRef, SecretVault,
};
use serde_json::json;

fn slash_payload(sha: &str, pr: u64, head: &str) -> serde_json::Value {
    json!({
        "action": "ok-to-test-command",
        "client_payload": {
            "slash_command": { "command": "ok-to-test", "sha": sha },
            "pull_request": { "number": pr, "head": { "sha": head } }
        }
    })
}

fn gate(gh: &Arc<MemoryGitHub>) -> DispatchAuthorizer {
    DispatchAuthorizer::new(RepoRef::new("octo-org", "widgets"), gh.clone())
}

/// Scenario: approved commit is still the head
#[tokio::test]
async fn approved_head_proceeds_on_merge_ref() {
    let gh = Arc::new(MemoryGitHub::new());
    gh.set_pull_request(42, "deadbeef");

    let event =
        DispatchEvent::from_github("repository_dispatch", slash_payload("deadbeef", 42, "deadbeef"))
            .expect("parse");
    let grant = gate(&gh)
        .authorize(event, SecretVault::new())
        .await
        .into_result()
        .expect("should proceed");

    assert_eq!(grant.checkout_ref(), "refs/pull/42/merge");
    assert_eq!(gh.calls().pr_lookups(), 1);
}

/// Scenario: fork pushed after approval
#[tokio::test]
async fn push_after_approval_is_rejected() {
    let gh = Arc::new(MemoryGitHub::new());
    gh.set_pull_request(42, "cafef00d");
    let vault = SecretVault::new().with_secret("INTEGRATION_API_KEY", "s3cr3t");
    let audit = vault.audit();

    let event =
        DispatchEvent::from_github("repository_dispatch", slash_payload("deadbeef", 42, "deadbeef"))
            .expect("parse");
    let decision = gate(&gh).authorize(event, vault).await;

    match decision {
        GateDecision::Reject(err @ AuthorizationError::CommitMismatch { .. }) => {
            assert!(err.to_string().starts_with("commit mismatch"));
        }
        other => panic!("expected commit mismatch, got {other:?}"),
    }
    assert_eq!(audit.reads(), 0);
}

/// Property: proceed iff exact match, over a spread of pairs
#[tokio::test]
async fn proceeds_iff_exact_match() {
    let pairs = [
        ("abc123", "abc123", true),
        ("abc123", "abc123456", false),
        ("abc123456", "abc123", false),
        ("ABC123", "abc123", false),
        ("bc123", "abc123", false),
        (" abc123", "abc123", false),
        ("", "abc123", false),
    ];

    for (asserted, actual, expected) in pairs {
        let gh = Arc::new(MemoryGitHub::new());
        gh.set_pull_request(1, actual);
        let event =
            DispatchEvent::from_github("repository_dispatch", slash_payload(asserted, 1, actual))
                .expect("parse");
        let decision = gate(&gh).authorize(event, SecretVault::new()).await;
        assert_eq!(
            decision.is_proceed(),
            expected,
            "asserted={asserted:?} actual={actual:?}"
        );
    }
}

/// Scenario: push to the base repository proceeds on its own ref
#[tokio::test]
async fn push_to_base_repository_proceeds() {
    let gh = Arc::new(MemoryGitHub::new());
    let event = DispatchEvent::from_github(
        "push",
        json!({
            "ref": "refs/heads/main",
            "after": "abc123",
            "repository": { "full_name": "octo-org/widgets" }
        }),
    )
    .expect("parse");

    let grant = gate(&gh)
        .authorize(event, SecretVault::new())
        .await
        .into_result()
        .expect("should proceed");
    assert_eq!(grant.checkout_ref(), "refs/heads/main");
    assert!(!grant.reports_to_fork());
}

/// Scenario: pull_request from a fork never reaches secrets
#[tokio::test]
async fn pull_request_from_fork_is_rejected() {
    let gh = Arc::new(MemoryGitHub::new());
    let vault = SecretVault::new().with_secret("INTEGRATION_API_KEY", "s3cr3t");
    let audit = vault.audit();
    let event = DispatchEvent::from_github(
        "pull_request",
        json!({
            "number": 5,
            "pull_request": {
                "head": { "sha": "f00d", "repo": { "full_name": "mallory/widgets" } },
                "base": { "repo": { "full_name": "octo-org/widgets" } }
            }
        }),
    )
    .expect("parse");

    let err = gate(&gh)
        .authorize(event, vault)
        .await
        .into_result()
        .unwrap_err();
    assert!(matches!(err, AuthorizationError::UntrustedOrigin { .. }));
    assert_eq!(audit.reads(), 0);
}
