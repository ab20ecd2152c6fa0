//! Single-attempt child process execution.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Merged stdout/stderr buffer with a hard cap.
struct Capture {
    buf: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl Capture {
    fn new(cap: usize) -> Self {
        Self {
            buf: Vec::new(),
            cap,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let remaining = self.cap.saturating_sub(self.buf.len());
        if chunk.len() > remaining {
            self.buf.extend_from_slice(&chunk[..remaining]);
            self.truncated = true;
        } else {
            self.buf.extend_from_slice(chunk);
        }
    }
}

/// Outcome of one attempt.
pub(crate) enum Attempt {
    Exited {
        exit_code: Option<i32>,
        output: Vec<u8>,
        truncated: bool,
    },
    TimedOut,
    Cancelled,
    SpawnFailed(String),
}

async fn drain(mut reader: impl AsyncRead + Unpin, capture: Arc<Mutex<Capture>>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => capture.lock().push(&chunk[..n]),
        }
    }
}

/// Run one child to completion, cap its merged output, and enforce the
/// attempt timeout. The child is always reaped, including on timeout and
/// cancellation.
pub(crate) async fn run_once(
    id: &str,
    program: &str,
    args: &[String],
    timeout: Duration,
    max_output_bytes: usize,
    cancel: &CancellationToken,
) -> Attempt {
    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            return Attempt::SpawnFailed(format!("failed to spawn {program}: {err}"));
        }
    };

    let capture = Arc::new(Mutex::new(Capture::new(max_output_bytes)));
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(drain(stdout, Arc::clone(&capture))));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(drain(stderr, Arc::clone(&capture))));
    }

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = cancel.cancelled() => None,
        _ = tokio::time::sleep(timeout) => {
            debug!(id, ?timeout, "Command attempt timed out");
            None
        }
    };

    let attempt = match waited {
        Some(Ok(status)) => {
            for reader in readers {
                let _ = reader.await;
            }
            let capture = capture.lock();
            Attempt::Exited {
                exit_code: status.code(),
                output: capture.buf.clone(),
                truncated: capture.truncated,
            }
        }
        Some(Err(err)) => {
            warn!(id, %err, "Failed to wait on child");
            Attempt::SpawnFailed(format!("failed to wait on {program}: {err}"))
        }
        None => {
            // Kill and reap; kill_on_drop is only the fallback.
            if let Err(err) = child.kill().await {
                warn!(id, %err, "Failed to kill child");
            }
            for reader in readers {
                reader.abort();
            }
            if cancel.is_cancelled() {
                Attempt::Cancelled
            } else {
                Attempt::TimedOut
            }
        }
    };

    attempt
}
