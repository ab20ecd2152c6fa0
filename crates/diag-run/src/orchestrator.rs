//! The run state machine.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use diag_archive::{pack, WorkDir};
use diag_catalog::{resolver, Catalog, OsId};
use diag_common::{DiagError, DiagResult, Report, RunParams, Severity};
use diag_exec::{CommandOutcome, ExecOptions, ExecutionResult, RestFetcher};
use diag_logcopy::CollectSummary;
use diag_version::Version;

use crate::manifest::{CommandCounts, Manifest};

/// Stage the run is in, or finished as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Resolving,
    Executing,
    Packaging,
    Cleaning,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Resolving => "resolving",
            Self::Executing => "executing",
            Self::Packaging => "packaging",
            Self::Cleaning => "cleaning",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything one run needs to know.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Scratch tree; created at start, always removed at the end.
    pub working_dir: PathBuf,
    /// Where the final bundle lands.
    pub archive_path: PathBuf,
    pub os: OsId,
    /// Product version string, e.g. `7.10.2`.
    pub product_version: String,
    pub params: RunParams,
    /// Product log directory to collect from, if any.
    pub log_source: Option<PathBuf>,
    pub max_main_logs: usize,
    pub max_gc_logs: usize,
    pub exec: ExecOptions,
}

/// Terminal description of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: RunState,
    /// The bundle, when packaging succeeded.
    pub archive: Option<PathBuf>,
    pub report: Report,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub logs_collected: usize,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        if self.state == RunState::Failed {
            1
        } else {
            0
        }
    }
}

#[derive(Default)]
struct Counts {
    succeeded: usize,
    failed: usize,
    skipped: usize,
    logs_collected: usize,
}

/// Drives one support-bundle run.
///
/// Fatality rules: configuration defects (including an ambiguous catalog)
/// and resource failures end the run; individual command failures are
/// recorded and never do. Cleanup runs on every exit path.
pub struct Orchestrator {
    catalog: Catalog,
    rest: Option<Arc<dyn RestFetcher>>,
    cancel: CancellationToken,
    report: Report,
}

impl Orchestrator {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            rest: None,
            cancel: CancellationToken::new(),
            report: Report::new(),
        }
    }

    /// Attach the REST transport. Without one, REST entries are recorded
    /// as skipped.
    pub fn with_rest_fetcher(mut self, fetcher: Arc<dyn RestFetcher>) -> Self {
        self.rest = Some(fetcher);
        self
    }

    /// Token that cancels the run when triggered externally.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run to completion. Never returns early without cleanup: the
    /// working directory is removed on success, failure, and
    /// cancellation alike.
    pub async fn run(&self, opts: RunOptions) -> RunSummary {
        info!(
            stage = %RunState::Initializing,
            version = opts.product_version,
            os = %opts.os,
            archive = %opts.archive_path.display(),
            "Starting support bundle run"
        );

        let version = match Version::parse(&opts.product_version) {
            Ok(version) => version,
            Err(err) => {
                self.report
                    .fatal("run", "version", format!("invalid product version: {err}"));
                return self.summary(RunState::Failed, None, Counts::default());
            }
        };

        let mut workdir = match WorkDir::create(&opts.working_dir) {
            Ok(workdir) => workdir,
            Err(err) => {
                self.report
                    .fatal("run", "workdir", format!("cannot create working directory: {err}"));
                return self.summary(RunState::Failed, None, Counts::default());
            }
        };

        let mut counts = Counts::default();
        let outcome = self
            .run_stages(&opts, &version, &workdir, &mut counts)
            .await;

        // Cleaning always runs, whatever the stages did.
        info!(stage = %RunState::Cleaning, "Removing working directory");
        let state = match workdir.remove() {
            Ok(()) => match outcome {
                Ok(_) => RunState::Done,
                Err(_) => RunState::Failed,
            },
            Err(err) => {
                error!(%err, "Working directory cleanup failed");
                self.report
                    .error("run", "cleanup", format!("cleanup failed: {err}"));
                RunState::Failed
            }
        };

        let archive = outcome.ok().flatten();
        info!(state = %state, "Run finished");
        self.summary(state, archive, counts)
    }

    /// Everything between workdir creation and cleanup. A returned error
    /// was already recorded in the report.
    async fn run_stages(
        &self,
        opts: &RunOptions,
        version: &Version,
        workdir: &WorkDir,
        counts: &mut Counts,
    ) -> DiagResult<Option<PathBuf>> {
        info!(stage = %RunState::Resolving, "Resolving catalog");
        // Templates may reference the working directory.
        let mut params = opts.params.clone();
        params.extra.insert(
            "OUTPUT_DIR".to_string(),
            workdir.path().display().to_string(),
        );
        let resolved = match resolver::resolve(&self.catalog, opts.os, version, &params) {
            Ok(resolved) => resolved,
            Err(err) => {
                self.report.fatal("run", "catalog", err.to_string());
                return Err(err);
            }
        };
        for skipped in &resolved.skipped {
            counts.skipped += 1;
            self.report
                .warning("catalog", skipped.id.as_str(), format!("skipped: {}", skipped.reason));
        }
        info!(
            commands = resolved.commands.len(),
            skipped = resolved.skipped.len(),
            "Catalog resolved"
        );

        // Executing and collecting run concurrently over disjoint trees.
        info!(stage = %RunState::Executing, "Running commands and collecting logs");
        let exec_fut = diag_exec::execute(
            resolved.commands,
            workdir.path(),
            &opts.exec,
            self.rest.clone(),
            self.cancel.clone(),
        );
        let logs_dest = workdir.path().join("logs");
        let collect_fut = async {
            match &opts.log_source {
                Some(source) => {
                    diag_logcopy::collect(source, &logs_dest, opts.max_main_logs, opts.max_gc_logs)
                        .await
                }
                None => Ok(CollectSummary::default()),
            }
        };
        let (results, collected) = tokio::join!(exec_fut, collect_fut);

        for result in &results {
            match result.outcome {
                CommandOutcome::Success => {
                    counts.succeeded += 1;
                    self.report.push_with_values(
                        Severity::Info,
                        result.category.to_string(),
                        result.id.as_str(),
                        format!("ok in {:?}", result.duration),
                        command_values(result),
                    );
                }
                CommandOutcome::Failed => {
                    counts.failed += 1;
                    let reason = result
                        .error
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "failed".to_string());
                    self.report.push_with_values(
                        Severity::Error,
                        result.category.to_string(),
                        result.id.as_str(),
                        reason,
                        command_values(result),
                    );
                }
                CommandOutcome::Skipped => {
                    counts.skipped += 1;
                    self.report.warning(
                        result.category.to_string(),
                        result.id.as_str(),
                        "skipped: no REST transport configured",
                    );
                }
                CommandOutcome::Cancelled => {
                    counts.skipped += 1;
                    self.report
                        .warning(result.category.to_string(), result.id.as_str(), "cancelled");
                }
            }
        }

        match collected {
            Ok(summary) => {
                counts.logs_collected = summary.collected;
                if summary.source_missing {
                    self.report
                        .warning("logs", "collector", "log directory not found");
                } else if opts.log_source.is_some() {
                    self.report.info(
                        "logs",
                        "collector",
                        format!(
                            "collected {} of {} candidates",
                            summary.collected, summary.candidates
                        ),
                    );
                }
            }
            Err(err) => {
                // The bundle still carries command output; note the loss.
                warn!(%err, "Log collection failed");
                self.report
                    .error("logs", "collector", format!("collection failed: {err}"));
            }
        }

        if self.cancel.is_cancelled() {
            self.report.fatal("run", "cancel", "run cancelled");
            return Err(DiagError::Cancelled);
        }

        let manifest = Manifest {
            tool_version: env!("CARGO_PKG_VERSION"),
            generated_at: Utc::now(),
            product_version: version.to_string(),
            os: opts.os.to_string(),
            commands: CommandCounts {
                succeeded: counts.succeeded,
                failed: counts.failed,
                skipped: counts.skipped,
            },
            logs_collected: counts.logs_collected,
        };
        if let Err(err) = manifest.write(workdir.path()).await {
            warn!(%err, "Failed to write manifest");
            self.report
                .warning("run", "manifest", format!("manifest not written: {err}"));
        }

        info!(stage = %RunState::Packaging, "Packaging bundle");
        match pack(workdir.path(), &opts.archive_path) {
            Ok(files) => {
                self.report.info(
                    "run",
                    "archive",
                    format!("{} files packed into {}", files, opts.archive_path.display()),
                );
                Ok(Some(opts.archive_path.clone()))
            }
            Err(err) => {
                self.report
                    .fatal("run", "archive", format!("packaging failed: {err}"));
                Err(err)
            }
        }
    }

    fn summary(&self, state: RunState, archive: Option<PathBuf>, counts: Counts) -> RunSummary {
        RunSummary {
            state,
            archive,
            report: self.report.clone(),
            succeeded: counts.succeeded,
            failed: counts.failed,
            skipped: counts.skipped,
            logs_collected: counts.logs_collected,
        }
    }
}

/// Structured values machine consumers read off a command entry.
fn command_values(result: &ExecutionResult) -> serde_json::Map<String, serde_json::Value> {
    let mut values = serde_json::Map::new();
    values.insert(
        "duration_ms".to_string(),
        (result.duration.as_millis() as u64).into(),
    );
    values.insert("attempts".to_string(), result.attempts.into());
    if let Some(code) = result.exit_code {
        values.insert("exit_code".to_string(), code.into());
    }
    if result.truncated {
        values.insert("truncated".to_string(), true.into());
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn catalog(yaml: &str) -> Catalog {
        Catalog::load_from_string(yaml).unwrap()
    }

    fn options(base: &std::path::Path) -> RunOptions {
        RunOptions {
            working_dir: base.join("work"),
            archive_path: base.join("bundle.zip"),
            os: OsId::current(),
            product_version: "7.10.2".to_string(),
            params: RunParams::default(),
            log_source: None,
            max_main_logs: 3,
            max_gc_logs: 3,
            exec: ExecOptions {
                timeout: std::time::Duration::from_secs(5),
                retry_delay: std::time::Duration::from_millis(10),
                ..ExecOptions::default()
            },
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_produces_archive_and_removes_workdir() {
        let base = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(catalog(
            r#"
entries:
  - id: hello
    category: syscall
    versions: [{ range: ">=0.0.0", template: "echo hello" }]
"#,
        ));
        let opts = options(base.path());
        let summary = orchestrator.run(opts.clone()).await;

        assert_eq!(summary.state, RunState::Done);
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(summary.succeeded, 1);
        assert!(!opts.working_dir.exists());

        let entries = summary.report.entries();
        let hello = entries.iter().find(|e| e.identifier == "hello").unwrap();
        assert_eq!(hello.values.get("attempts"), Some(&1u32.into()));
        assert!(hello.values.contains_key("duration_ms"));

        let archive = summary.archive.unwrap();
        let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
        let names: Vec<&str> = zip.file_names().collect();
        assert!(names.contains(&"syscall/hello.txt"));
        assert!(names.contains(&"manifest.json"));
        drop(zip);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_dir_placeholder_resolves_to_workdir() {
        let base = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(catalog(
            r#"
entries:
  - id: outdir
    category: syscall
    versions: [{ range: ">=0.0.0", template: "echo {{OUTPUT_DIR}}" }]
"#,
        ));
        let opts = options(base.path());
        let summary = orchestrator.run(opts.clone()).await;

        assert_eq!(summary.state, RunState::Done);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 0);

        let mut zip =
            zip::ZipArchive::new(File::open(summary.archive.unwrap()).unwrap()).unwrap();
        let mut content = String::new();
        std::io::Read::read_to_string(
            &mut zip.by_name("syscall/outdir.txt").unwrap(),
            &mut content,
        )
        .unwrap();
        assert_eq!(content.trim(), opts.working_dir.display().to_string());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_does_not_fail_the_run() {
        let base = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(catalog(
            r#"
entries:
  - id: bad
    category: syscall
    versions: [{ range: ">=0.0.0", template: "sh -c exit_code_is_127" }]
  - id: good
    category: syscall
    versions: [{ range: ">=0.0.0", template: "echo fine" }]
"#,
        ));
        let summary = orchestrator.run(options(base.path())).await;

        assert_eq!(summary.state, RunState::Done);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary
            .report
            .entries()
            .iter()
            .any(|e| e.severity == Severity::Error && e.identifier == "bad"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_collects_logs_into_bundle() {
        let base = tempfile::tempdir().unwrap();
        let logs = base.path().join("logs");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join("server.log"), "lines").unwrap();

        let orchestrator = Orchestrator::new(catalog(
            r#"
entries:
  - id: hello
    category: syscall
    versions: [{ range: ">=0.0.0", template: "echo hello" }]
"#,
        ));
        let mut opts = options(base.path());
        opts.log_source = Some(logs);
        let summary = orchestrator.run(opts).await;

        assert_eq!(summary.state, RunState::Done);
        assert_eq!(summary.logs_collected, 1);
        let mut zip =
            zip::ZipArchive::new(File::open(summary.archive.unwrap()).unwrap()).unwrap();
        assert!(zip.by_name("logs/server.log").is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_archive_path_fails_but_still_cleans_up() {
        let base = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(catalog(
            r#"
entries:
  - id: hello
    category: syscall
    versions: [{ range: ">=0.0.0", template: "echo hello" }]
"#,
        ));
        let mut opts = options(base.path());
        opts.archive_path = PathBuf::from("/nonexistent/dir/bundle.zip");
        let summary = orchestrator.run(opts.clone()).await;

        assert_eq!(summary.state, RunState::Failed);
        assert_eq!(summary.exit_code(), 1);
        assert!(summary.archive.is_none());
        assert!(summary.report.has_fatal());
        assert!(!opts.working_dir.exists());
    }

    #[tokio::test]
    async fn test_invalid_product_version_is_fatal() {
        let base = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(catalog(
            r#"
entries:
  - id: hello
    category: syscall
    versions: [{ range: ">=0.0.0", template: "echo hello" }]
"#,
        ));
        let mut opts = options(base.path());
        opts.product_version = "not-a-version".to_string();
        let summary = orchestrator.run(opts.clone()).await;

        assert_eq!(summary.state, RunState::Failed);
        assert!(summary.report.has_fatal());
        assert!(!opts.working_dir.exists());
    }

    #[tokio::test]
    async fn test_ambiguous_catalog_is_fatal_before_execution() {
        use diag_catalog::{CatalogEntry, Category, VersionedTemplate};

        // Built directly; the loader would have rejected this.
        let catalog = Catalog {
            entries: vec![CatalogEntry {
                id: "overlap".to_string(),
                category: Category::Rest,
                subdir: None,
                extension: None,
                retries: 0,
                versions: vec![
                    VersionedTemplate {
                        range: ">=5.0.0".to_string(),
                        template: "/old".to_string(),
                    },
                    VersionedTemplate {
                        range: ">=6.0.0".to_string(),
                        template: "/new".to_string(),
                    },
                ],
                os: Default::default(),
            }],
        };

        let base = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(catalog);
        let opts = options(base.path());
        let summary = orchestrator.run(opts.clone()).await;

        assert_eq!(summary.state, RunState::Failed);
        assert_eq!(summary.succeeded + summary.failed, 0);
        assert!(summary.report.has_fatal());
        assert!(!opts.working_dir.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_run_skips_packaging_and_cleans_up() {
        let base = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(catalog(
            r#"
entries:
  - id: slow
    category: syscall
    versions: [{ range: ">=0.0.0", template: "sleep 30" }]
"#,
        ));
        let cancel = orchestrator.cancellation_token();
        cancel.cancel();

        let opts = options(base.path());
        let summary = orchestrator.run(opts.clone()).await;

        assert_eq!(summary.state, RunState::Failed);
        assert!(summary.archive.is_none());
        assert!(!opts.working_dir.exists());
        assert!(!opts.archive_path.exists());
    }
}
