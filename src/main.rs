use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use web_sweep::config::{
    normalize_server, parse_keywords, parse_protocols_str, DEFAULT_RESULTS_FILE, DEFAULT_WORKERS,
};
use web_sweep::scanner::StatsHandle;
use web_sweep::types::{ScanSummary, StatsSnapshot};
use web_sweep::{HttpProber, ScanConfig, ScanCoordinator, ScanEvent};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// web-sweep — probe random public IPv4 addresses for live web servers and keep the ones matching your filters.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "web-sweep",
    version,
    about = "Probe random public IPv4 addresses for live HTTP/HTTPS sites and keep the ones matching your filters.",
    long_about = None
)]
struct Cli {
    /// Comma separated protocols to probe, tried in this order.
    #[arg(long, default_value = "http,https")]
    protocols: String,

    /// Title keywords, space separated; a site matches if any appears in its title.
    #[arg(long)]
    title: Option<String>,

    /// Keep only sites whose Server header contains this text (e.g. nginx).
    #[arg(long)]
    server: Option<String>,

    /// Minimum page size in bytes (inclusive).
    #[arg(long = "min-size")]
    min_size: Option<u64>,

    /// Maximum page size in bytes (inclusive).
    #[arg(long = "max-size")]
    max_size: Option<u64>,

    /// Number of concurrent probe workers.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Per-protocol probe deadline in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 2000)]
    timeout_ms: u64,

    /// Stop each worker after this many addresses. Omit to scan until Ctrl+C.
    #[arg(long)]
    cycles: Option<u64>,

    /// Results file; truncated at start.
    #[arg(long, default_value = DEFAULT_RESULTS_FILE)]
    output: PathBuf,

    /// Write the final summary as pretty JSON to this path (optional).
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Raise the open file descriptor limit to this value before scanning.
    #[arg(long)]
    ulimit: Option<u64>,

    /// Validate HTTPS certificates instead of accepting any.
    #[arg(long = "verify-certs", default_value_t = false)]
    verify_certs: bool,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = build_config(&cli)?;
    let fd_limit = adjust_ulimit_size(cli.ulimit);
    if fd_limit < config.workers as u64 {
        log::warn!(
            "[main] fd_limit_low: soft_limit={} workers={} - some probes will fail to open sockets",
            fd_limit,
            config.workers
        );
    }

    println!("starting up with {} workers...", config.workers);
    println!("current settings:");
    for line in config.describe_filters() {
        println!("  {line}");
    }
    println!("  results      : {}", config.results_path.display());
    println!("\npress ctrl+c to stop\n");

    let prober = HttpProber::new(&config).context("failed to set up probe clients")?;
    let (tx, rx) = mpsc::channel(1024);
    let mut coordinator = ScanCoordinator::new(config, prober)?.with_events(tx);

    let display = tokio::spawn(render_events(rx));

    let cancel = coordinator.cancel_token();
    let stats = coordinator.stats_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        let snap = interrupt(&cancel, &stats).await;
        println!(
            "\n\nstopping... waiting for in-flight probes to finish (checked {} so far)",
            snap.checked
        );
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupted again, exiting without waiting");
            std::process::exit(130);
        }
    });

    coordinator.start().await.context("failed to start scan")?;
    let outcome = coordinator.wait().await;
    drop(coordinator);
    display.abort();

    let summary = outcome.context("scan aborted")?;
    println!(
        "\nall done! checked {} ips, found {} websites",
        summary.stats.checked, summary.stats.found
    );
    println!("everything is saved in '{}'", summary.results_path.display());

    if let Some(path) = cli.summary.as_deref() {
        if let Err(e) = write_summary_json(path, &summary) {
            eprintln!("Failed to write JSON to {}: {}", path.display(), e);
        } else {
            println!("Wrote JSON summary to {}", path.display());
        }
    }

    Ok(())
}

/// Stop the scan, then read the counters. Cancelling first keeps the signal
/// from queueing behind workers on the ledger lock.
async fn interrupt(cancel: &CancellationToken, stats: &StatsHandle) -> StatsSnapshot {
    cancel.cancel();
    stats.stats().await
}

fn build_config(cli: &Cli) -> Result<ScanConfig> {
    let config = ScanConfig {
        protocols: parse_protocols_str(&cli.protocols)?,
        title_keywords: cli.title.as_deref().map(parse_keywords).unwrap_or_default(),
        server_contains: cli.server.as_deref().and_then(normalize_server),
        min_size: cli.min_size,
        max_size: cli.max_size,
        workers: cli.workers,
        timeout: Duration::from_millis(cli.timeout_ms),
        cycle_limit: cli.cycles,
        accept_invalid_certs: !cli.verify_certs,
        results_path: cli.output.clone(),
    };
    config.validate()?;
    Ok(config)
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis()
        .init();
}

async fn render_events(mut rx: mpsc::Receiver<ScanEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ScanEvent::Progress(s) => {
                print!(
                    "\rchecked: {} | found: {} | speed: {:.2} ips/s",
                    s.checked, s.found, s.checks_per_sec
                );
                let _ = std::io::stdout().flush();
            }
            ScanEvent::Found(o) => println!("\nfound website: {} - {}", o.ip, o.title),
        }
    }
}

#[cfg(unix)]
fn adjust_ulimit_size(ulimit: Option<u64>) -> u64 {
    use rlimit::Resource;

    if let Some(limit) = ulimit {
        match Resource::NOFILE.set(limit, limit) {
            Ok(()) => log::info!("[main] ulimit_raised: limit={}", limit),
            Err(e) => log::warn!("[main] ulimit_failed: limit={} error={}", limit, e),
        }
    }

    match Resource::NOFILE.get() {
        Ok((soft, _)) => soft,
        Err(e) => {
            log::warn!("[main] ulimit_unknown: error={}", e);
            u64::MAX
        }
    }
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_ulimit: Option<u64>) -> u64 {
    u64::MAX
}

fn write_summary_json(path: &std::path::Path, summary: &ScanSummary) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}
