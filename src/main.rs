mod date_cursor;
mod db;
mod discovery;
mod error;
mod fetcher;
mod parser;
mod pipeline;
mod settings;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use date_cursor::TradingDate;
use db::{PersistPolicy, Repository};
use discovery::LinkDiscoverer;
use fetcher::HttpFetcher;
use pipeline::{IngestionPipeline, PersistOutcome};
use settings::Settings;

#[derive(Parser)]
#[command(name = "spimex_ingest", about = "SPIMEX oil products bulletin ingester")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover, download, parse and store every bulletin since the earliest date
    Run(RunArgs),
    /// List the bulletins that would be ingested, without touching the store
    Discover {
        /// Oldest trading date to include (YYYYMMDD)
        #[arg(long, default_value = date_cursor::DEFAULT_EARLIEST)]
        earliest_date: TradingDate,
    },
    /// Rows stored per trading date
    Stats,
}

#[derive(Args)]
struct RunArgs {
    /// Oldest trading date to include (YYYYMMDD)
    #[arg(long, default_value = date_cursor::DEFAULT_EARLIEST)]
    earliest_date: TradingDate,
    /// What to do with days already in the store (default: from settings)
    #[arg(long, value_enum)]
    policy: Option<PersistPolicy>,
    /// Concurrent file downloads, 1 to 256 (default: from settings)
    #[arg(long, value_parser = concurrency_in_range)]
    concurrency: Option<usize>,
    /// Cancel the run after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Print the ingestion report as JSON
    #[arg(long)]
    json: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            earliest_date: TradingDate::default_earliest(),
            policy: None,
            concurrency: None,
            timeout_secs: None,
            json: false,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load().context("invalid configuration")?;

    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run(&settings, args, t0).await,
        Commands::Discover { earliest_date } => {
            let transport = HttpFetcher::new(&settings.user_agent, settings.request_timeout())?;
            let cancel = cancel_on_ctrl_c();
            let listing = settings.listing_url()?;
            let found = LinkDiscoverer::new(&transport, &listing)?
                .discover(&earliest_date, &cancel)
                .await?;

            let mut refs: Vec<_> = found.references.iter().collect();
            refs.sort_by(|a, b| b.stamp().cmp(&a.stamp()));
            for r in &refs {
                println!("{}  {}", r.date(), r.href());
            }
            for e in &found.rejected {
                println!("skipped: {}", e);
            }
            println!(
                "\n{} bulletins on {} listing pages",
                refs.len(),
                found.pages_fetched
            );
            Ok(())
        }
        Commands::Stats => {
            let repo = Repository::open(&settings.db_path(), settings.persist_policy)?;
            let counts = repo.date_counts()?;
            if counts.is_empty() {
                println!("No rows stored. Run 'run' first.");
                return Ok(());
            }
            println!("{:<10} | {:>6}", "Date", "Rows");
            println!("{}", "-".repeat(19));
            for (date, n) in &counts {
                println!("{:<10} | {:>6}", date, n);
            }
            let total: usize = counts.iter().map(|(_, n)| n).sum();
            println!("\n{} rows over {} trading days", total, counts.len());
            Ok(())
        }
    }
}

async fn run(settings: &Settings, args: RunArgs, t0: Instant) -> anyhow::Result<()> {
    let policy = args.policy.unwrap_or(settings.persist_policy);
    let concurrency = args.concurrency.unwrap_or(settings.concurrency);
    info!("Store: {} ({:?})", settings.describe_db(), policy);

    let transport = HttpFetcher::new(&settings.user_agent, settings.request_timeout())?;
    let repository = Repository::open(&settings.db_path(), policy)
        .with_context(|| format!("cannot open {}", settings.db_path().display()))?;
    let pipeline = IngestionPipeline::new(
        Arc::new(transport),
        repository,
        settings.host()?,
        settings.listing_url()?,
        concurrency,
    );

    let cancel = pipeline.cancellation();
    spawn_ctrl_c(cancel.clone());
    if let Some(secs) = args.timeout_secs {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!("Deadline of {}s reached, cancelling", secs);
            cancel.cancel();
        });
    }

    let report = pipeline.run(&args.earliest_date).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if !report.failures.is_empty() {
        warn!("{} references failed", report.failures.len());
    }

    let elapsed = format_duration(t0.elapsed());
    match &report.persist {
        PersistOutcome::Saved(r) => {
            info!(
                "Done in {}: {} records written, {} days already stored",
                elapsed,
                r.inserted,
                r.skipped_dates.len()
            );
            Ok(())
        }
        PersistOutcome::NothingToSave => {
            info!("Done in {}: nothing to write", elapsed);
            Ok(())
        }
        PersistOutcome::Failed { reason } => {
            error!("Failed after {}: {}", elapsed, reason);
            anyhow::bail!("persistence failed: {}", reason)
        }
    }
}

fn concurrency_in_range(s: &str) -> Result<usize, String> {
    let n: usize = s.parse().map_err(|e| format!("'{}' is not a number: {}", s, e))?;
    if (1..=settings::MAX_CONCURRENCY).contains(&n) {
        Ok(n)
    } else {
        Err(format!("must be between 1 and {}", settings::MAX_CONCURRENCY))
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());
    cancel
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            cancel.cancel();
        }
    });
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
