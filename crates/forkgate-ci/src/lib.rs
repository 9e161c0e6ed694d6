//! forkgate CI - privileged matrix execution for fork pull requests
//!
//! Provides a dispatch worker that:
//! - Runs the dispatch gate on an inbound event
//! - Executes matrix cells concurrently under the resulting grant
//! - Reports every cell's outcome onto the PR's check runs

pub mod matrix;
pub mod pipeline;
pub mod runner;

// Re-export key types
pub use matrix::{load_matrix, ConfigError, MatrixCell};
pub use pipeline::{CellReport, CellSync, DispatchError, DispatchReport, DispatchWorker};
pub use runner::{CheckoutConfig, CommandExecutor, ExecutionError, PrivilegedExecutor};
