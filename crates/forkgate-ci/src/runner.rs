//! Privileged matrix-cell execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use forkgate_core::{matches, CommitId, Conclusion, Grant, JobOutcome};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::matrix::MatrixCell;

/// Environment variables never passed to cell commands. The cell runs code
/// from the PR; only the secrets in the grant may reach it.
pub const STRIPPED_ENV: &[&str] = &[
    "FORKGATE_TOKEN",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "ACTIONS_RUNTIME_TOKEN",
    "ACTIONS_ID_TOKEN_REQUEST_TOKEN",
    "ACTIONS_ID_TOKEN_REQUEST_URL",
];

// Bytes of stderr kept in a failed outcome's detail.
const DETAIL_TAIL_BYTES: usize = 2_048;

/// Errors from the per-dispatch preparation step.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("fetched {git_ref} tests {fetched}, not the approved commit {approved}")]
    CheckoutMismatch {
        git_ref: String,
        approved: String,
        fetched: String,
    },
}

/// Runs matrix cells under a grant.
///
/// `execute` never fails: every error is folded into the returned
/// [`JobOutcome`], so the caller can always report something.
#[async_trait]
pub trait PrivilegedExecutor: Send + Sync {
    /// Once per dispatch, before any cell runs.
    async fn prepare(&self, _grant: &Grant) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn execute(&self, grant: &Grant, cell: &MatrixCell) -> JobOutcome;
}

/// Where and how to fetch the granted ref before running cells.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub remote: String,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
        }
    }
}

/// Executor that runs each cell as a child process.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    workdir: Option<PathBuf>,
    checkout: Option<CheckoutConfig>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands (and the checkout) in `dir`.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Fetch and detach onto the granted ref in `prepare`.
    pub fn with_checkout(mut self, checkout: CheckoutConfig) -> Self {
        self.checkout = Some(checkout);
        self
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Run git and return its trimmed stdout.
    async fn git(&self, args: &[&str]) -> Result<String, ExecutionError> {
        let output = self
            .command("git")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ExecutionError::Spawn {
                program: "git".to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExecutionError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// `refs/pull/<n>/merge`, whose second parent is the PR head it was built from.
fn is_merge_ref(git_ref: &str) -> bool {
    git_ref.starts_with("refs/pull/") && git_ref.ends_with("/merge")
}

#[async_trait]
impl PrivilegedExecutor for CommandExecutor {
    async fn prepare(&self, grant: &Grant) -> Result<(), ExecutionError> {
        let Some(checkout) = &self.checkout else {
            return Ok(());
        };
        let git_ref = grant.checkout_ref();
        info!(remote = %checkout.remote, git_ref = %git_ref, "checking out");
        self.git(&["fetch", "--no-tags", &checkout.remote, git_ref])
            .await?;
        let fetched = self
            .git(&["rev-parse", "--verify", "FETCH_HEAD^{commit}"])
            .await?;

        // The ref may have moved since the gate looked at the PR.
        let tested = if is_merge_ref(git_ref) {
            self.git(&["rev-parse", "--verify", &format!("{}^2", fetched)])
                .await?
        } else {
            fetched.clone()
        };
        if !matches(grant.approved_sha(), &CommitId::new(tested.as_str())) {
            warn!(
                git_ref = %git_ref,
                approved = %grant.approved_sha(),
                fetched = %tested,
                "fetched ref does not test the approved commit"
            );
            return Err(ExecutionError::CheckoutMismatch {
                git_ref: git_ref.to_string(),
                approved: grant.approved_sha().to_string(),
                fetched: tested,
            });
        }

        self.git(&["checkout", "--detach", &fetched]).await?;
        Ok(())
    }

    async fn execute(&self, grant: &Grant, cell: &MatrixCell) -> JobOutcome {
        let start = Instant::now();

        let Some((exe, args)) = cell.command.split_first() else {
            return JobOutcome::failure(format!("cell {} has an empty command", cell.name));
        };

        let mut cmd = self.command(exe);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for name in STRIPPED_ENV {
            cmd.env_remove(name);
        }
        cmd.envs(cell.env.iter().map(|(k, v)| (k, v)));
        cmd.envs(grant.secret_env());

        debug!(cell = %cell.name, command = ?cell.command, "spawning");
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(cell = %cell.name, error = %e, "spawn failed");
                return JobOutcome::failure(format!("failed to spawn '{}': {}", exe, e))
                    .with_duration_ms(elapsed_ms(start));
            }
        };

        // Dropping the future on timeout drops the child, which kills it.
        let output = if cell.timeout_secs > 0 {
            match tokio::time::timeout(
                Duration::from_secs(cell.timeout_secs),
                child.wait_with_output(),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    return JobOutcome::new(Conclusion::TimedOut)
                        .with_duration_ms(elapsed_ms(start))
                        .with_detail(format!("timed out after {} seconds", cell.timeout_secs));
                }
            }
        } else {
            child.wait_with_output().await
        };

        let duration_ms = elapsed_ms(start);
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return JobOutcome::failure(format!("failed to wait for '{}': {}", exe, e))
                    .with_duration_ms(duration_ms);
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        if output.status.success() {
            return JobOutcome::success()
                .with_exit_code(exit_code)
                .with_duration_ms(duration_ms);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        JobOutcome::failure(tail(stderr.trim(), DETAIL_TAIL_BYTES))
            .with_exit_code(exit_code)
            .with_duration_ms(duration_ms)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn tail(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut cut = s.len() - max_bytes;
    while !s.is_char_boundary(cut) {
        cut += 1;
    }
    s[cut..].to_string()
}
