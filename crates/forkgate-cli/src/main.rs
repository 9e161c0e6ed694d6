//! forkgate - privileged CI for pull requests from forks
//!
//! The `forkgate` command runs inside a GitHub Actions job of the base
//! repository.
//!
//! ## Commands
//!
//! - `authorize`: decide whether the triggering event may run with secrets
//! - `dispatch`: authorize, run the test matrix, report each cell on the PR
//! - `sync`: complete one check run with a given conclusion

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use forkgate_ci::{load_matrix, CheckoutConfig, CommandExecutor, DispatchReport, DispatchWorker};
use forkgate_core::github::DEFAULT_API_BASE_URL;
use forkgate_core::{
    CheckRunApi, CheckRunSynchronizer, CommitId, Conclusion, DispatchAuthorizer, DispatchEvent,
    DispatchSpan, GateDecision, GatePolicy, GitHubClient, GitHubConfig, JobOutcome,
    PullRequestApi, RepoRef, RetryPolicy, SecretVault,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "forkgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Gate privileged CI runs for fork pull requests", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON reports
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether the triggering event may run privileged jobs
    Authorize {
        #[command(flatten)]
        github: GitHubArgs,

        #[command(flatten)]
        event: EventArgs,
    },

    /// Authorize, run the matrix, and report every cell onto the PR
    Dispatch {
        #[command(flatten)]
        github: GitHubArgs,

        #[command(flatten)]
        event: EventArgs,

        /// JSON matrix file ({"cells": [...]})
        #[arg(short, long)]
        matrix: PathBuf,

        /// Environment variable to pass to cells as a secret (repeatable)
        #[arg(short, long = "secret", value_name = "NAME")]
        secrets: Vec<String>,

        /// Fetch the granted ref, verify it tests the approved commit, and check it out
        #[arg(long)]
        checkout: bool,

        /// Remote to fetch from with --checkout
        #[arg(long, default_value = "origin")]
        remote: String,

        /// Directory to run cells in (default: current directory)
        #[arg(long)]
        workdir: Option<PathBuf>,

        /// Retries for a failed check-run update
        #[arg(long, default_value = "3")]
        retries: u32,
    },

    /// Complete a check run with a conclusion
    Sync {
        #[command(flatten)]
        github: GitHubArgs,

        /// Pull request whose current head to report on
        #[arg(long, required_unless_present = "commit")]
        pr: Option<u64>,

        /// Commit to report on instead of the PR head
        #[arg(long)]
        commit: Option<String>,

        /// Check-run (job) name
        #[arg(long)]
        job: String,

        /// success, failure, neutral, cancelled, timed_out, action_required
        #[arg(long, value_parser = parse_conclusion)]
        conclusion: Conclusion,

        /// Retries for a failed check-run update
        #[arg(long, default_value = "3")]
        retries: u32,
    },
}

#[derive(Args)]
struct GitHubArgs {
    /// Base repository (owner/name)
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repo: String,

    /// GitHub REST API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_BASE_URL)]
    api_url: String,

    /// API token for the base repository [default: $FORKGATE_TOKEN, then $GITHUB_TOKEN]
    #[arg(long)]
    token: Option<String>,
}

#[derive(Args)]
struct EventArgs {
    /// Triggering event name
    #[arg(long, env = "GITHUB_EVENT_NAME")]
    event_name: String,

    /// Path to the event payload JSON
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    event_path: PathBuf,

    /// Accept abbreviated commit ids in slash commands
    #[arg(long)]
    allow_short_sha: bool,
}

impl EventArgs {
    fn policy(&self) -> GatePolicy {
        if self.allow_short_sha {
            GatePolicy::default()
        } else {
            GatePolicy::strict()
        }
    }
}

/// The two API seams, backed by one client in production.
struct Api {
    repo: RepoRef,
    pull_requests: Arc<dyn PullRequestApi>,
    check_runs: Arc<dyn CheckRunApi>,
}

impl Api {
    fn from_args(args: &GitHubArgs) -> Result<Self> {
        let repo: RepoRef = args.repo.parse().context("Invalid --repo")?;
        let config = GitHubConfig::new(args.api_url.clone(), repo.clone())
            .context("Invalid GitHub configuration")?
            .with_token_or_env(args.token.clone())
            .context("Invalid API token")?;
        let client = Arc::new(GitHubClient::new(config).context("Failed to build GitHub client")?);
        Ok(Self {
            repo,
            pull_requests: client.clone(),
            check_runs: client,
        })
    }

    fn authorizer(&self, policy: GatePolicy) -> DispatchAuthorizer {
        DispatchAuthorizer::new(self.repo.clone(), self.pull_requests.clone()).with_policy(policy)
    }

    fn synchronizer(&self) -> CheckRunSynchronizer {
        CheckRunSynchronizer::new(
            self.repo.clone(),
            self.pull_requests.clone(),
            self.check_runs.clone(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    forkgate_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Authorize { github, event } => {
            let api = Api::from_args(&github)?;
            cmd_authorize(&api, &event.event_name, &event.event_path, event.policy(), cli.json)
                .await
        }
        Commands::Dispatch {
            github,
            event,
            matrix,
            secrets,
            checkout,
            remote,
            workdir,
            retries,
        } => {
            let api = Api::from_args(&github)?;
            let mut executor = CommandExecutor::new();
            if let Some(dir) = workdir {
                executor = executor.in_dir(dir);
            }
            if checkout {
                executor = executor.with_checkout(CheckoutConfig { remote });
            }
            let vault = SecretVault::from_env(&secrets).context("Failed to load secrets")?;
            let worker = DispatchWorker::new(
                api.authorizer(event.policy()),
                Arc::new(executor),
                api.synchronizer(),
            )
            .with_retry(retry_policy(retries));
            cmd_dispatch(&worker, &event.event_name, &event.event_path, &matrix, vault, cli.json)
                .await
        }
        Commands::Sync {
            github,
            pr,
            commit,
            job,
            conclusion,
            retries,
        } => {
            let api = Api::from_args(&github)?;
            cmd_sync(
                &api,
                pr,
                commit.as_deref(),
                &job,
                conclusion,
                retry_policy(retries),
                cli.json,
            )
            .await
        }
    }
}

fn parse_conclusion(s: &str) -> std::result::Result<Conclusion, String> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| format!("unknown conclusion '{}'", s))
}

fn retry_policy(retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries: retries,
        ..RetryPolicy::default()
    }
}

fn run_id() -> String {
    std::env::var("GITHUB_RUN_ID").unwrap_or_else(|_| "local".to_string())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_authorize(
    api: &Api,
    event_name: &str,
    event_path: &Path,
    policy: GatePolicy,
    json: bool,
) -> Result<()> {
    let event = DispatchEvent::from_path(event_name, event_path)?;
    let _span = DispatchSpan::enter(&run_id(), event.kind());

    // The authorize command never runs anything, so it needs no secrets.
    match api.authorizer(policy).authorize(event, SecretVault::new()).await {
        GateDecision::Proceed(grant) => {
            if json {
                print_json(&serde_json::json!({
                    "decision": "proceed",
                    "checkout_ref": grant.checkout_ref(),
                    "approved_sha": grant.approved_sha(),
                    "pr_number": grant.pr_number(),
                }))?;
            } else {
                println!("✓ proceed");
                println!("  checkout ref: {}", grant.checkout_ref());
                println!("  approved sha: {}", grant.approved_sha());
            }
            Ok(())
        }
        GateDecision::Reject(err) => {
            if json {
                print_json(&serde_json::json!({
                    "decision": "reject",
                    "reason": err.code(),
                    "error": err.to_string(),
                }))?;
            }
            Err(err).context("Dispatch rejected")
        }
    }
}

async fn cmd_dispatch(
    worker: &DispatchWorker,
    event_name: &str,
    event_path: &Path,
    matrix_path: &Path,
    secrets: SecretVault,
    json: bool,
) -> Result<()> {
    let cells = load_matrix(matrix_path)?;
    let event = DispatchEvent::from_path(event_name, event_path)?;

    info!(cells = cells.len(), kind = event.kind(), "starting dispatch");
    let report = worker.run(event, secrets, cells).await?;

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    let sync_failures = report.sync_failures().count();
    if sync_failures > 0 {
        anyhow::bail!("{} check run(s) could not be updated", sync_failures);
    }
    if !report.passed() {
        anyhow::bail!("{} matrix cell(s) failed", report.failed_count());
    }
    Ok(())
}

fn print_report(report: &DispatchReport) {
    println!("Dispatch: {}", report.dispatch_id);
    println!("Ref: {} ({})", report.checkout_ref, report.approved_sha);
    println!(
        "Status: {}",
        if report.passed() { "✓ PASSED" } else { "✗ FAILED" }
    );
    println!("Duration: {}ms", report.duration_ms);
    println!();

    for cell in &report.cells {
        let status = if cell.outcome.passed() { "✓" } else { "✗" };
        println!(
            "  {} {} ({}, {}ms)",
            status, cell.job_name, cell.outcome.conclusion, cell.outcome.duration_ms
        );
        if let forkgate_ci::CellSync::Failed { error } = &cell.sync {
            println!("      check run not updated: {}", error);
        }
    }
    for name in &report.skipped {
        println!("  - {} (disabled)", name);
    }

    println!();
    println!(
        "Summary: {}/{} cells passed",
        report.passed_count(),
        report.cells.len()
    );
}

async fn cmd_sync(
    api: &Api,
    pr: Option<u64>,
    commit: Option<&str>,
    job: &str,
    conclusion: Conclusion,
    retry: RetryPolicy,
    json: bool,
) -> Result<()> {
    let synchronizer = api.synchronizer();
    let outcome = JobOutcome::new(conclusion);

    let report = match (commit, pr) {
        (Some(sha), _) => {
            let sha = CommitId::new(sha);
            forkgate_core::sync_with_retry(&retry, || {
                synchronizer.sync_commit(&sha, job, &outcome)
            })
            .await
        }
        (None, Some(pr)) => {
            forkgate_core::sync_with_retry(&retry, || synchronizer.sync(pr, job, &outcome)).await
        }
        (None, None) => anyhow::bail!("either --pr or --commit is required"),
    }
    .with_context(|| format!("Failed to sync check run '{}'", job))?;

    if json {
        print_json(&report)?;
    } else if report.already_synced {
        println!("✓ {} already {} (check run {})", job, conclusion, report.check_run_id);
    } else {
        println!("✓ {} → {} (check run {})", job, conclusion, report.check_run_id);
    }
    Ok(())
}
