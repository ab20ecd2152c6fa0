//! # Diag Logcopy
//!
//! Log rotation collector: walks a product's log directory, classifies
//! candidates into main and GC rotation families, and copies the newest N
//! of each family into the working directory. The source tree is strictly
//! read-only; a missing or empty source is a note, not an error.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use diag_common::{DiagError, DiagResult};

/// Rotation family a log file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationClass {
    /// Server/application logs.
    Main,
    /// Garbage-collection logs, capped separately.
    Gc,
}

/// One file eligible for collection.
#[derive(Debug, Clone)]
pub struct LogCandidate {
    pub path: PathBuf,
    pub file_name: String,
    pub modified: SystemTime,
    pub size: u64,
    pub class: RotationClass,
}

/// What a collection pass did.
#[derive(Debug, Clone, Default)]
pub struct CollectSummary {
    /// Files actually copied.
    pub collected: usize,
    pub main_count: usize,
    pub gc_count: usize,
    /// Candidates found before the caps were applied.
    pub candidates: usize,
    /// The source directory did not exist.
    pub source_missing: bool,
}

/// Copy the newest `max_main` main logs and `max_gc` GC logs from
/// `source` into `dest`.
///
/// Candidates are sorted newest-first by modification time, with the file
/// name as a deterministic tie-break. Files are copied flat into `dest`
/// under their original names.
pub async fn collect(
    source: &Path,
    dest: &Path,
    max_main: usize,
    max_gc: usize,
) -> DiagResult<CollectSummary> {
    if !source.exists() {
        info!(source = %source.display(), "Log directory does not exist; nothing to collect");
        return Ok(CollectSummary {
            source_missing: true,
            ..Default::default()
        });
    }

    let candidates = enumerate(source).await;
    let mut summary = CollectSummary {
        candidates: candidates.len(),
        ..Default::default()
    };
    if candidates.is_empty() {
        info!(source = %source.display(), "No log candidates found");
        return Ok(summary);
    }

    tokio::fs::create_dir_all(dest).await.map_err(|err| {
        DiagError::resource("create dir", dest.display().to_string(), err.to_string())
    })?;

    let (mut main, mut gc): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|c| c.class == RotationClass::Main);
    sort_newest_first(&mut main);
    sort_newest_first(&mut gc);

    for candidate in main.iter().take(max_main) {
        if copy_one(candidate, dest).await {
            summary.main_count += 1;
        }
    }
    for candidate in gc.iter().take(max_gc) {
        if copy_one(candidate, dest).await {
            summary.gc_count += 1;
        }
    }
    summary.collected = summary.main_count + summary.gc_count;

    info!(
        collected = summary.collected,
        main = summary.main_count,
        gc = summary.gc_count,
        candidates = summary.candidates,
        "Log collection finished"
    );
    Ok(summary)
}

/// Recursively enumerate log candidates under `root`.
///
/// Unreadable subtrees are logged and skipped; collection is best-effort
/// over whatever is readable.
async fn enumerate(root: &Path) -> Vec<LogCandidate> {
    let mut candidates = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), %err, "Skipping unreadable directory");
                continue;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(dir = %dir.display(), %err, "Error listing directory");
                    break;
                }
            };
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(path = %path.display(), %err, "Skipping unreadable entry");
                    continue;
                }
            };
            if metadata.is_dir() {
                pending.push(path);
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(class) = classify(&file_name) else {
                continue;
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push(LogCandidate {
                path,
                file_name,
                modified,
                size: metadata.len(),
                class,
            });
        }
    }
    candidates
}

/// Classify a file name, or `None` when it is not a log at all.
///
/// A candidate either ends in `.log` or carries `.log.` somewhere in its
/// name (rotated forms like `server.log.3` or `server.log.2024-01-07`).
fn classify(file_name: &str) -> Option<RotationClass> {
    let lower = file_name.to_ascii_lowercase();
    if !(lower.ends_with(".log") || lower.contains(".log.")) {
        return None;
    }
    let is_gc = lower.starts_with("gc")
        || lower.contains("_gc")
        || lower.contains("-gc")
        || lower.contains(".gc");
    Some(if is_gc {
        RotationClass::Gc
    } else {
        RotationClass::Main
    })
}

fn sort_newest_first(candidates: &mut [LogCandidate]) {
    candidates.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
}

async fn copy_one(candidate: &LogCandidate, dest: &Path) -> bool {
    let target = dest.join(&candidate.file_name);
    if target.exists() {
        warn!(file = %candidate.file_name, "Duplicate log name; keeping the newer copy");
        return false;
    }
    match tokio::fs::copy(&candidate.path, &target).await {
        Ok(_) => {
            debug!(file = %candidate.file_name, size = candidate.size, "Copied log");
            true
        }
        Err(err) => {
            warn!(file = %candidate.file_name, %err, "Failed to copy log");
            false
        }
    }
}
