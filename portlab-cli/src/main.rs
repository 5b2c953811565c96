//! PortLab CLI — serve, batch run, and cache warm-up commands.
//!
//! Commands:
//! - `serve` — newline-delimited JSON session over stdin/stdout
//! - `run` — compute a batch of allocators from a TOML file
//! - `download` — fetch price history into the Parquet disk cache
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` filter), so
//! stdout carries only events or results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use portlab_core::allocator::{
    Allocator, AllocatorConfig, AllocatorKind, CancelToken, PhaseEvent, ProgressSink,
};
use portlab_core::data::{PriceService, PriceSource};
use portlab_core::domain::{AllocatorId, ComputeWindow};
use portlab_runner::compute::{run_compute, ComputeResult};
use portlab_runner::config::ServiceConfig;
use portlab_runner::session::{Session, SessionOptions};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "portlab",
    about = "PortLab CLI — portfolio allocation backtesting service"
)]
struct Cli {
    /// Service config (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve one session: JSON messages on stdin, JSON events on stdout.
    Serve {
        /// User the session's allocators are scoped to.
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Compute every allocator in a batch file and print a summary.
    Run {
        /// Batch file with a [window] table and [[allocators]] entries.
        batch: PathBuf,

        /// Write full results (segments and curves) as JSON.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Download price history into the disk cache.
    Download {
        /// Symbols to download (e.g., SPY AGG GLD).
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Start date (YYYY-MM-DD). Defaults to 10 years ago.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Cache directory. Overrides data.cache_dir from the config.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };

    match cli.command {
        Commands::Serve { user } => run_serve(&config, user),
        Commands::Run { batch, output } => run_batch(&config, &batch, output.as_deref()),
        Commands::Download {
            symbols,
            start,
            end,
            cache_dir,
        } => run_download(config, symbols, start, end, cache_dir),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init()
        .ok();
}

fn parse_date(s: Option<&str>) -> Result<Option<NaiveDate>> {
    s.map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .context("dates must be YYYY-MM-DD")
}

// ── serve ────────────────────────────────────────────────────────────

fn run_serve(config: &ServiceConfig, user: String) -> Result<()> {
    // Built outside the runtime: the HTTP provider uses a blocking client,
    // which must not be created or dropped on an async worker.
    let source = Arc::new(config.build_price_source()?);
    let options = SessionOptions {
        user_id: user,
        compute_timeout: config.compute_timeout(),
        store: None,
    };
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(source.clone(), options))?;
    drop(runtime);
    drop(source);
    Ok(())
}

async fn serve(source: Arc<PriceSource>, options: SessionOptions) -> Result<()> {
    let (session, mut events) = Session::new(source, options);
    info!(user_id = session.user_id(), "session opened");

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = events.recv().await {
            let mut line = serde_json::to_vec(&event)?;
            line.push(b'\n');
            stdout.write_all(&line).await?;
            stdout.flush().await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if !line.is_empty() {
            session.handle_json(line);
        }
    }

    // stdin closed: the client is gone
    session.close().await;
    drop(session);
    writer.await??;
    Ok(())
}

// ── run ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BatchFile {
    window: BatchWindow,
    allocators: Vec<BatchAllocator>,
}

#[derive(Debug, Deserialize)]
struct BatchWindow {
    fit_start: NaiveDate,
    fit_end: NaiveDate,
    test_end: NaiveDate,
    #[serde(default)]
    include_dividends: bool,
}

#[derive(Debug, Deserialize)]
struct BatchAllocator {
    #[serde(rename = "type")]
    allocator_type: AllocatorKind,
    config: serde_json::Value,
}

/// Logs each phase as it happens.
struct LogProgress {
    name: String,
}

impl ProgressSink for LogProgress {
    fn emit(&self, event: PhaseEvent) {
        info!(
            allocator = %self.name,
            phase = ?event.phase,
            segment = ?event.segment,
            total_segments = ?event.total_segments,
            "progress"
        );
    }
}

fn run_batch(config: &ServiceConfig, batch_path: &Path, output: Option<&Path>) -> Result<()> {
    let text = std::fs::read_to_string(batch_path)
        .with_context(|| format!("failed to read {}", batch_path.display()))?;
    let batch: BatchFile = toml::from_str(&text)
        .with_context(|| format!("failed to parse {}", batch_path.display()))?;
    if batch.allocators.is_empty() {
        bail!("batch file has no [[allocators]] entries");
    }
    let window = ComputeWindow::new(
        batch.window.fit_start,
        batch.window.fit_end,
        batch.window.test_end,
    )?;

    let prices = PriceService::new(Arc::new(config.build_price_source()?));
    let cancel = CancelToken::new();
    let mut results: Vec<ComputeResult> = Vec::new();
    let mut failures = 0usize;

    println!(
        "{:<24} {:>10} {:>10} {:>8} {:>8} {:>9}",
        "Allocator", "Total %", "CAGR %", "Vol %", "Sharpe", "MaxDD %"
    );
    println!("{}", "-".repeat(74));

    for (i, entry) in batch.allocators.into_iter().enumerate() {
        let allocator_config = AllocatorConfig::from_json(entry.allocator_type, entry.config)
            .with_context(|| format!("allocator #{} has an invalid config", i + 1))?;
        let allocator =
            Allocator::new(AllocatorId::from(format!("batch-{}", i + 1)), allocator_config);
        let progress = LogProgress {
            name: allocator.name().to_string(),
        };

        match run_compute(
            &allocator,
            &window,
            batch.window.include_dividends,
            &prices,
            &progress,
            &cancel,
        ) {
            Ok(result) => {
                match &result.performance.stats {
                    Some(s) => println!(
                        "{:<24} {:>10.2} {:>10.2} {:>8.2} {:>8.2} {:>9.2}",
                        allocator.name(),
                        s.total_return,
                        s.annualized_return,
                        s.volatility,
                        s.sharpe_ratio,
                        s.max_drawdown
                    ),
                    None => println!("{:<24} (no return history)", allocator.name()),
                }
                results.push(result);
            }
            Err(e) => {
                failures += 1;
                warn!(allocator = allocator.name(), code = e.code(), "compute failed: {e}");
                println!("{:<24} FAILED {}: {}", allocator.name(), e.code(), e.public_message());
            }
        }
    }

    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&results)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Results saved to: {}", path.display());
    }
    if failures > 0 {
        bail!("{failures} allocator(s) failed");
    }
    Ok(())
}

// ── download ─────────────────────────────────────────────────────────

fn run_download(
    mut config: ServiceConfig,
    symbols: Vec<String>,
    start: Option<String>,
    end: Option<String>,
    cache_dir: Option<PathBuf>,
) -> Result<()> {
    if cache_dir.is_some() {
        config.data.cache_dir = cache_dir;
    }
    let Some(dir) = config.data.cache_dir.clone() else {
        bail!("download needs a cache directory (--cache-dir or data.cache_dir)");
    };

    let today = chrono::Local::now().date_naive();
    let start = parse_date(start.as_deref())?
        .unwrap_or_else(|| today - chrono::Duration::days(365 * 10));
    let end = parse_date(end.as_deref())?.unwrap_or(today);
    if start >= end {
        bail!("start ({start}) must be before end ({end})");
    }

    let source = config.build_price_source()?;
    let mut errors = Vec::new();
    for symbol in &symbols {
        let symbol = symbol.trim().to_uppercase();
        match source.fetch_bars(&symbol, start, end) {
            Ok(bars) => println!("{symbol:<8} {:>6} bars", bars.len()),
            Err(e) => {
                eprintln!("Error for {symbol}: {e}");
                errors.push(symbol);
            }
        }
    }
    println!("Cache: {}", dir.display());

    if !errors.is_empty() {
        bail!("failed to download: {}", errors.join(", "));
    }
    Ok(())
}
