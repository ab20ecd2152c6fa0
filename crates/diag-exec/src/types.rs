//! Execution options and per-command results.

use std::path::PathBuf;
use std::time::Duration;

use diag_catalog::Category;
use diag_common::DiagError;

/// Tunables for a batch execution.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Wall-clock limit per attempt.
    pub timeout: Duration,
    /// Maximum commands in flight at once.
    pub max_concurrency: usize,
    /// Captured output cap per command; excess is dropped and the result
    /// marked truncated.
    pub max_output_bytes: usize,
    /// Fixed delay between a failed attempt and its retry.
    pub retry_delay: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_concurrency: 4,
            max_output_bytes: 1024 * 1024,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// Terminal state of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exited successfully; output was written into the working directory.
    Success,
    /// All attempts failed (non-zero exit, spawn failure, timeout, panic).
    Failed,
    /// Never attempted (e.g. REST entry without a fetcher).
    Skipped,
    /// Cancellation arrived before the command finished.
    Cancelled,
}

/// What happened to one command, across all its attempts.
///
/// Only the final attempt is authoritative; output from earlier failed
/// attempts is discarded.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub id: String,
    pub category: Category,
    pub outcome: CommandOutcome,
    /// Exit code of the final attempt, when the child ran to completion.
    pub exit_code: Option<i32>,
    /// Merged stdout/stderr of the final attempt, lossily decoded.
    pub output: String,
    /// Whether `output` hit the capture cap.
    pub truncated: bool,
    /// Wall-clock time across all attempts.
    pub duration: Duration,
    /// Attempts actually made.
    pub attempts: u32,
    pub error: Option<DiagError>,
    /// Where the output was written, on success.
    pub output_file: Option<PathBuf>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.outcome == CommandOutcome::Success
    }
}
