//! Bounded worker pool over a batch of resolved commands.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use diag_common::DiagError;
use diag_catalog::{Invocation, ResolvedCommand};

use crate::child::{self, Attempt};
use crate::rest::RestFetcher;
use crate::types::{CommandOutcome, ExecOptions, ExecutionResult};

/// Appended to an output file whose capture hit the byte cap.
const TRUNCATION_MARKER: &[u8] = b"\n...[output truncated]\n";

/// Execute a batch of commands against the working directory.
///
/// Concurrency is bounded by `opts.max_concurrency`; every command yields
/// exactly one result, and results come back in input order. A worker
/// panic is caught and surfaced as a failed result for that command only.
pub async fn execute(
    commands: Vec<ResolvedCommand>,
    working_dir: &Path,
    opts: &ExecOptions,
    fetcher: Option<Arc<dyn RestFetcher>>,
    cancel: CancellationToken,
) -> Vec<ExecutionResult> {
    let total = commands.len();
    info!(
        commands = total,
        concurrency = opts.max_concurrency,
        "Executing command batch"
    );

    let semaphore = Arc::new(Semaphore::new(opts.max_concurrency.max(1)));
    let mut join_set: JoinSet<(usize, ExecutionResult)> = JoinSet::new();

    for (index, command) in commands.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let working_dir = working_dir.to_path_buf();
        let opts = opts.clone();
        let fetcher = fetcher.clone();
        let cancel = cancel.clone();

        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    // Semaphore only closes if the pool is torn down.
                    let result = failed(
                        &command,
                        DiagError::command(&command.id, "worker pool shut down"),
                    );
                    return (index, result);
                }
            };
            let result = run_with_panic_recovery(command, &working_dir, &opts, fetcher, cancel)
                .await;
            (index, result)
        });
    }

    let mut slots: Vec<Option<ExecutionResult>> = (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(err) => {
                // Panics are handled inside the task; this is abort only.
                error!(%err, "Worker task did not complete");
            }
        }
    }

    slots.into_iter().flatten().collect()
}

/// A panicking command produces a failed result, never a lost slot.
async fn run_with_panic_recovery(
    command: ResolvedCommand,
    working_dir: &Path,
    opts: &ExecOptions,
    fetcher: Option<Arc<dyn RestFetcher>>,
    cancel: CancellationToken,
) -> ExecutionResult {
    let id = command.id.clone();
    let category = command.category;
    let caught = AssertUnwindSafe(run_command(command, working_dir, opts, fetcher, cancel))
        .catch_unwind()
        .await;

    match caught {
        Ok(result) => result,
        Err(panic_info) => {
            let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            error!(id, panic_msg, "Command worker panicked");
            ExecutionResult {
                id: id.clone(),
                category,
                outcome: CommandOutcome::Failed,
                exit_code: None,
                output: String::new(),
                truncated: false,
                duration: std::time::Duration::ZERO,
                attempts: 1,
                error: Some(DiagError::command(id, format!("panic: {panic_msg}"))),
                output_file: None,
            }
        }
    }
}

/// Run one command through its retry budget.
///
/// Only the final attempt's outcome and output are kept. Cancellation is
/// observed between attempts and raced against the running child; a
/// cancelled command never retries.
async fn run_command(
    command: ResolvedCommand,
    working_dir: &Path,
    opts: &ExecOptions,
    fetcher: Option<Arc<dyn RestFetcher>>,
    cancel: CancellationToken,
) -> ExecutionResult {
    let fetcher = match (&command.invocation, fetcher) {
        (Invocation::Rest { .. }, None) => {
            debug!(id = command.id, "No REST transport; entry skipped");
            return ExecutionResult {
                id: command.id.clone(),
                category: command.category,
                outcome: CommandOutcome::Skipped,
                exit_code: None,
                output: String::new(),
                truncated: false,
                duration: std::time::Duration::ZERO,
                attempts: 0,
                error: None,
                output_file: None,
            };
        }
        (_, fetcher) => fetcher,
    };

    let started = Instant::now();
    let max_attempts = command.retries + 1;
    let mut attempts = 0;
    let mut last: Attempt = Attempt::Cancelled;

    while attempts < max_attempts {
        if cancel.is_cancelled() {
            last = Attempt::Cancelled;
            break;
        }
        attempts += 1;

        last = match &command.invocation {
            Invocation::Exec { program, args } => {
                child::run_once(
                    &command.id,
                    program,
                    args,
                    opts.timeout,
                    opts.max_output_bytes,
                    &cancel,
                )
                .await
            }
            Invocation::Rest { path } => {
                // The (_, None) arm above returned already.
                match &fetcher {
                    Some(fetcher) => {
                        fetch_once(&cancel, opts, fetcher.as_ref(), path).await
                    }
                    None => Attempt::Cancelled,
                }
            }
        };

        let succeeded = matches!(&last, Attempt::Exited { exit_code: Some(0), .. });
        if succeeded || matches!(last, Attempt::Cancelled) {
            break;
        }
        if attempts < max_attempts {
            debug!(
                id = command.id,
                attempt = attempts,
                "Command attempt failed; retrying"
            );
            tokio::time::sleep(opts.retry_delay).await;
        }
    }

    let duration = started.elapsed();
    finish(command, last, attempts, duration, working_dir, opts).await
}

/// One REST attempt, bounded by the same timeout and cancellation rules as
/// a child process.
async fn fetch_once(
    cancel: &CancellationToken,
    opts: &ExecOptions,
    fetcher: &dyn RestFetcher,
    path: &str,
) -> Attempt {
    tokio::select! {
        fetched = fetcher.fetch(path) => match fetched {
            Ok(body) => {
                let bytes = body.into_bytes();
                let truncated = bytes.len() > opts.max_output_bytes;
                let mut output = bytes;
                output.truncate(opts.max_output_bytes);
                Attempt::Exited { exit_code: Some(0), output, truncated }
            }
            Err(err) => Attempt::SpawnFailed(format!("rest fetch failed: {err}")),
        },
        _ = cancel.cancelled() => Attempt::Cancelled,
        _ = tokio::time::sleep(opts.timeout) => Attempt::TimedOut,
    }
}

/// Turn the final attempt into a result, writing the output file on
/// success.
async fn finish(
    command: ResolvedCommand,
    attempt: Attempt,
    attempts: u32,
    duration: std::time::Duration,
    working_dir: &Path,
    opts: &ExecOptions,
) -> ExecutionResult {
    match attempt {
        Attempt::Exited {
            exit_code: Some(0),
            output,
            truncated,
        } => {
            let rel = command.output_rel_path();
            let mut file_bytes = output.clone();
            if truncated {
                file_bytes.extend_from_slice(TRUNCATION_MARKER);
            }
            match write_output(working_dir, &rel, &file_bytes).await {
                Ok(path) => {
                    debug!(id = command.id, ?duration, "Command succeeded");
                    ExecutionResult {
                        id: command.id,
                        category: command.category,
                        outcome: CommandOutcome::Success,
                        exit_code: Some(0),
                        output: String::from_utf8_lossy(&output).into_owned(),
                        truncated,
                        duration,
                        attempts,
                        error: None,
                        output_file: Some(path),
                    }
                }
                Err(err) => {
                    warn!(id = command.id, %err, "Failed to write command output");
                    ExecutionResult {
                        id: command.id,
                        category: command.category,
                        outcome: CommandOutcome::Failed,
                        exit_code: Some(0),
                        output: String::from_utf8_lossy(&output).into_owned(),
                        truncated,
                        duration,
                        attempts,
                        error: Some(err),
                        output_file: None,
                    }
                }
            }
        }
        Attempt::Exited {
            exit_code,
            output,
            truncated,
        } => {
            let reason = match exit_code {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            };
            ExecutionResult {
                error: Some(DiagError::command(&command.id, reason)),
                id: command.id,
                category: command.category,
                outcome: CommandOutcome::Failed,
                exit_code,
                output: String::from_utf8_lossy(&output).into_owned(),
                truncated,
                duration,
                attempts,
                output_file: None,
            }
        }
        Attempt::TimedOut => ExecutionResult {
            error: Some(DiagError::timeout(&command.id, opts.timeout.as_secs())),
            id: command.id,
            category: command.category,
            outcome: CommandOutcome::Failed,
            exit_code: None,
            output: String::new(),
            truncated: false,
            duration,
            attempts,
            output_file: None,
        },
        Attempt::Cancelled => ExecutionResult {
            id: command.id,
            category: command.category,
            outcome: CommandOutcome::Cancelled,
            exit_code: None,
            output: String::new(),
            truncated: false,
            duration,
            attempts,
            error: Some(DiagError::Cancelled),
            output_file: None,
        },
        Attempt::SpawnFailed(reason) => ExecutionResult {
            error: Some(DiagError::command(&command.id, reason)),
            id: command.id,
            category: command.category,
            outcome: CommandOutcome::Failed,
            exit_code: None,
            output: String::new(),
            truncated: false,
            duration,
            attempts,
            output_file: None,
        },
    }
}

async fn write_output(
    working_dir: &Path,
    rel: &str,
    output: &[u8],
) -> Result<PathBuf, DiagError> {
    let path = working_dir.join(rel);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|err| {
            DiagError::resource("create dir", parent.display().to_string(), err.to_string())
        })?;
    }
    tokio::fs::write(&path, output).await.map_err(|err| {
        DiagError::resource("write", path.display().to_string(), err.to_string())
    })?;
    Ok(path)
}

fn failed(command: &ResolvedCommand, error: DiagError) -> ExecutionResult {
    ExecutionResult {
        id: command.id.clone(),
        category: command.category,
        outcome: CommandOutcome::Failed,
        exit_code: None,
        output: String::new(),
        truncated: false,
        duration: std::time::Duration::ZERO,
        attempts: 0,
        error: Some(error),
        output_file: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use diag_catalog::Category;
    use diag_common::DiagResult;
    use std::time::Duration;

    fn exec_cmd(id: &str, program: &str, args: &[&str], retries: u32) -> ResolvedCommand {
        ResolvedCommand {
            id: id.to_string(),
            category: Category::Syscall,
            subdir: "syscall".to_string(),
            extension: ".txt".to_string(),
            retries,
            invocation: Invocation::Exec {
                program: program.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    fn rest_cmd(id: &str, path: &str) -> ResolvedCommand {
        ResolvedCommand {
            id: id.to_string(),
            category: Category::Rest,
            subdir: "rest".to_string(),
            extension: ".json".to_string(),
            retries: 0,
            invocation: Invocation::Rest {
                path: path.to_string(),
            },
        }
    }

    fn quick_opts() -> ExecOptions {
        ExecOptions {
            timeout: Duration::from_secs(5),
            max_concurrency: 4,
            max_output_bytes: 64 * 1024,
            retry_delay: Duration::from_millis(10),
        }
    }

    struct StaticFetcher;

    #[async_trait]
    impl RestFetcher for StaticFetcher {
        async fn fetch(&self, _path: &str) -> DiagResult<String> {
            Ok("{\"status\":\"green\"}".to_string())
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_writes_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let results = execute(
            vec![exec_cmd("greeting", "echo", &["hello"], 0)],
            dir.path(),
            &quick_opts(),
            None,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.outcome, CommandOutcome::Success);
        assert_eq!(result.attempts, 1);
        assert!(result.output.contains("hello"));

        let file = dir.path().join("syscall/greeting.txt");
        assert_eq!(result.output_file.as_deref(), Some(file.as_path()));
        let content = std::fs::read_to_string(file).unwrap();
        assert!(content.contains("hello"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_exhausts_retries() {
        let dir = tempfile::tempdir().unwrap();
        let results = execute(
            vec![exec_cmd("boom", "sh", &["-c", "exit 7"], 2)],
            dir.path(),
            &quick_opts(),
            None,
            CancellationToken::new(),
        )
        .await;

        let result = &results[0];
        assert_eq!(result.outcome, CommandOutcome::Failed);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.exit_code, Some(7));
        assert!(matches!(result.error, Some(DiagError::Command { .. })));
        assert!(!dir.path().join("syscall/boom.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ExecOptions {
            timeout: Duration::from_millis(200),
            ..quick_opts()
        };
        let started = Instant::now();
        let results = execute(
            vec![exec_cmd("hang", "sleep", &["30"], 0)],
            dir.path(),
            &opts,
            None,
            CancellationToken::new(),
        )
        .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        let result = &results[0];
        assert_eq!(result.outcome, CommandOutcome::Failed);
        assert!(matches!(result.error, Some(DiagError::Timeout { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_truncated_at_cap() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ExecOptions {
            max_output_bytes: 8,
            ..quick_opts()
        };
        let results = execute(
            vec![exec_cmd("chatty", "echo", &["a rather long line of text"], 0)],
            dir.path(),
            &opts,
            None,
            CancellationToken::new(),
        )
        .await;

        let result = &results[0];
        assert_eq!(result.outcome, CommandOutcome::Success);
        assert!(result.truncated);
        assert_eq!(result.output.len(), 8);

        // The file carries the capped bytes plus the marker.
        let content =
            std::fs::read_to_string(dir.path().join("syscall/chatty.txt")).unwrap();
        assert!(content.starts_with("a rather"));
        assert!(content.ends_with("...[output truncated]\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_does_not_block_other_commands() {
        let dir = tempfile::tempdir().unwrap();
        let results = execute(
            vec![
                exec_cmd("bad", "sh", &["-c", "exit 1"], 0),
                exec_cmd("good", "echo", &["fine"], 0),
            ],
            dir.path(),
            &quick_opts(),
            None,
            CancellationToken::new(),
        )
        .await;

        // Input order preserved.
        assert_eq!(results[0].id, "bad");
        assert_eq!(results[0].outcome, CommandOutcome::Failed);
        assert_eq!(results[1].id, "good");
        assert_eq!(results[1].outcome, CommandOutcome::Success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancellation_skips_remaining_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = execute(
            vec![exec_cmd("never", "sleep", &["30"], 5)],
            dir.path(),
            &quick_opts(),
            None,
            cancel,
        )
        .await;

        let result = &results[0];
        assert_eq!(result.outcome, CommandOutcome::Cancelled);
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn test_rest_without_fetcher_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let results = execute(
            vec![rest_cmd("health", "/_cluster/health")],
            dir.path(),
            &quick_opts(),
            None,
            CancellationToken::new(),
        )
        .await;

        let result = &results[0];
        assert_eq!(result.outcome, CommandOutcome::Skipped);
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn test_rest_with_fetcher_writes_body() {
        let dir = tempfile::tempdir().unwrap();
        let results = execute(
            vec![rest_cmd("health", "/_cluster/health")],
            dir.path(),
            &quick_opts(),
            Some(Arc::new(StaticFetcher)),
            CancellationToken::new(),
        )
        .await;

        let result = &results[0];
        assert_eq!(result.outcome, CommandOutcome::Success);
        let content =
            std::fs::read_to_string(dir.path().join("rest/health.json")).unwrap();
        assert_eq!(content, "{\"status\":\"green\"}");
    }
}
