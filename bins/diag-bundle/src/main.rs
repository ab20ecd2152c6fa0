use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use diag_catalog::{Catalog, OsId};
use diag_common::{RunParams, Severity};
use diag_exec::ExecOptions;
use diag_run::{Orchestrator, RunOptions};

/// Support bundle collector
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Catalog file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    catalog: PathBuf,

    /// Product version to resolve the catalog against, e.g. 7.10.2
    #[arg(short = 'V', long)]
    product_version: String,

    /// Target OS (linux, mac, windows); detected when omitted
    #[arg(long)]
    os: Option<OsId>,

    /// Target process id, substituted as {{PID}}
    #[arg(long)]
    pid: Option<u32>,

    /// Product home directory, substituted as {{HOME}}
    #[arg(long)]
    home: Option<PathBuf>,

    /// Product log directory to collect rotated logs from
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Output archive path
    #[arg(short, long, default_value = "diag-bundle.zip")]
    output: PathBuf,

    /// Working directory for intermediate files
    #[arg(long, default_value = "diag-bundle.tmp")]
    work_dir: PathBuf,

    /// Newest main log files to collect
    #[arg(long, default_value_t = 3)]
    max_main_logs: usize,

    /// Newest GC log files to collect
    #[arg(long, default_value_t = 3)]
    max_gc_logs: usize,

    /// Per-command timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Maximum commands in flight at once
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.debug)?;

    let os = args.os.unwrap_or_else(OsId::current);
    info!("Starting support bundle collection");
    info!("Catalog file: {}", args.catalog.display());

    let catalog = Catalog::load_from_file(&args.catalog)?;
    info!("Loaded catalog with {} entries", catalog.entries.len());

    let orchestrator = Orchestrator::new(catalog);
    spawn_cancel_handler(&orchestrator);

    let opts = RunOptions {
        working_dir: args.work_dir,
        archive_path: args.output,
        os,
        product_version: args.product_version,
        params: RunParams {
            pid: args.pid,
            home: args.home,
            extra: Default::default(),
        },
        log_source: args.log_dir,
        max_main_logs: args.max_main_logs,
        max_gc_logs: args.max_gc_logs,
        exec: ExecOptions {
            timeout: Duration::from_secs(args.timeout),
            max_concurrency: args.concurrency,
            ..ExecOptions::default()
        },
    };

    let summary = orchestrator.run(opts).await;
    render_summary(&summary);

    std::process::exit(summary.exit_code());
}

/// Cancel the run on the first Ctrl+C; a second one aborts the process.
fn spawn_cancel_handler(orchestrator: &Orchestrator) {
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling run");
            cancel.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt; aborting");
            std::process::exit(130);
        }
    });
}

fn render_summary(summary: &diag_run::RunSummary) {
    for entry in summary.report.entries() {
        let marker = match entry.severity {
            Severity::Info => "ok  ",
            Severity::Warning => "warn",
            Severity::Error => "FAIL",
            Severity::Fatal => "FATAL",
        };
        println!(
            "[{marker}] {}/{}: {}",
            entry.category, entry.identifier, entry.text
        );
    }
    println!(
        "\n{}: {} succeeded, {} failed, {} skipped, {} logs collected",
        summary.state, summary.succeeded, summary.failed, summary.skipped, summary.logs_collected
    );
    match &summary.archive {
        Some(path) => println!("Bundle: {}", path.display()),
        None => println!("No bundle produced"),
    }
}

fn initialize_logging(debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    Ok(())
}
