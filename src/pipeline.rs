use std::collections::HashSet;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::date_cursor::{FileReference, TradingDate};
use crate::db::{PersistResult, Repository};
use crate::discovery::LinkDiscoverer;
use crate::error::{PipelineError, ReferenceError};
use crate::fetcher::{Fetch, FileFetcher};
use crate::parser::records::{self, TradingRecord};
use crate::parser::table;
use crate::settings::MAX_CONCURRENCY;

#[derive(Debug, Clone, Serialize)]
pub struct ReferenceFailure {
    pub reference: String,
    pub stage: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum PersistOutcome {
    Saved(PersistResult),
    Failed { reason: String },
    NothingToSave,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub references_discovered: usize,
    pub pages_fetched: u32,
    pub references_processed: usize,
    pub records_produced: usize,
    pub rows_rejected: usize,
    pub duplicates_dropped: usize,
    pub failures: Vec<ReferenceFailure>,
    pub persist: PersistOutcome,
}

impl IngestionReport {
    pub fn records_written(&self) -> usize {
        match &self.persist {
            PersistOutcome::Saved(r) => r.inserted,
            _ => 0,
        }
    }
}

/// Records harvested from one file.
struct Harvest {
    reference: FileReference,
    records: Vec<TradingRecord>,
    rows_rejected: usize,
}

pub struct IngestionPipeline<F: Fetch + 'static> {
    transport: Arc<F>,
    repository: Repository,
    host: Url,
    listing_url: String,
    concurrency: usize,
    cancel: CancellationToken,
}

impl<F: Fetch + 'static> IngestionPipeline<F> {
    pub fn new(
        transport: Arc<F>,
        repository: Repository,
        host: Url,
        listing_url: String,
        concurrency: usize,
    ) -> Self {
        Self {
            transport,
            repository,
            host,
            listing_url,
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts the run; once cancelled nothing is persisted.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Discover, harvest every reference concurrently, then persist once.
    pub async fn run(&self, earliest: &TradingDate) -> Result<IngestionReport, PipelineError> {
        let discovery = LinkDiscoverer::new(self.transport.as_ref(), &self.listing_url)?
            .discover(earliest, &self.cancel)
            .await?;

        let mut failures: Vec<ReferenceFailure> = discovery
            .rejected
            .iter()
            .map(|e| ReferenceFailure {
                reference: e.subject().to_string(),
                stage: "discover",
                reason: e.to_string(),
            })
            .collect();

        let references_discovered = discovery.references.len();
        let outcomes = self.harvest_all(discovery.references).await;
        if self.cancel.is_cancelled() {
            warn!("Run cancelled; skipping persistence");
            return Err(PipelineError::Cancelled);
        }

        let mut harvests = Vec::new();
        for (reference, outcome) in outcomes {
            match outcome {
                Ok(h) => harvests.push(h),
                Err(e) => {
                    warn!("{} failed at {}: {}", reference, e.stage(), e);
                    failures.push(ReferenceFailure {
                        reference: reference.href().to_string(),
                        stage: e.stage(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let references_processed = harvests.len();
        let rows_rejected = harvests.iter().map(|h| h.rows_rejected).sum();
        let records_produced = harvests.iter().map(|h| h.records.len()).sum();
        let (batch, duplicates_dropped) = deduplicate(harvests);

        let persist = if batch.is_empty() {
            info!("No records to persist");
            PersistOutcome::NothingToSave
        } else {
            info!(
                "Persisting {} records ({:?} policy)",
                batch.len(),
                self.repository.policy()
            );
            match self.repository.save(&batch) {
                Ok(result) => PersistOutcome::Saved(result),
                Err(e) => PersistOutcome::Failed {
                    reason: e.to_string(),
                },
            }
        };

        Ok(IngestionReport {
            references_discovered,
            pages_fetched: discovery.pages_fetched,
            references_processed,
            records_produced,
            rows_rejected,
            duplicates_dropped,
            failures,
            persist,
        })
    }

    /// One task per reference, bounded by a semaphore. Every task is joined;
    /// a reference whose task never hands back an outcome is reported as failed.
    async fn harvest_all(
        &self,
        references: HashSet<FileReference>,
    ) -> Vec<(FileReference, Result<Harvest, ReferenceError>)> {
        let total = references.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut pending = references.clone();

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        for reference in references {
            let transport = Arc::clone(&self.transport);
            let host = self.host.clone();
            let sem = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();

            tasks.spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    outcome = async {
                        let Ok(_permit) = sem.acquire().await else {
                            return None;
                        };
                        Some(harvest_one(transport.as_ref(), &host, &reference).await)
                    } => outcome,
                };
                (reference, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        let mut task_errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((reference, outcome)) => {
                    pending.remove(&reference);
                    if let Some(outcome) = outcome {
                        outcomes.push((reference, outcome));
                    }
                }
                Err(e) => {
                    error!("Worker task died: {}", e);
                    task_errors.push(e.to_string());
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        if !task_errors.is_empty() {
            let reason = task_errors.join("; ");
            outcomes.extend(
                pending
                    .into_iter()
                    .map(|r| (r, Err(ReferenceError::Task(reason.clone())))),
            );
        }
        outcomes
    }
}

/// fetch → extract → build for a single reference.
async fn harvest_one<F: Fetch + ?Sized>(
    transport: &F,
    host: &Url,
    reference: &FileReference,
) -> Result<Harvest, ReferenceError> {
    let bytes = FileFetcher::new(transport, host).fetch(reference).await?;
    let table = table::extract(&bytes)?;

    let mut records = Vec::with_capacity(table.len());
    let mut rows_rejected = 0;
    for row in records::build(&table, reference) {
        match row {
            Ok(r) => records.push(r),
            Err(e) => {
                debug!("{}: dropping row: {}", reference, e);
                rows_rejected += 1;
            }
        }
    }
    info!("{}: {} records", reference, records.len());
    Ok(Harvest {
        reference: reference.clone(),
        records,
        rows_rejected,
    })
}

/// Flatten harvests into one batch, keeping one record per (date, product
/// code). A day republished under a later stamp wins.
fn deduplicate(mut harvests: Vec<Harvest>) -> (Vec<TradingRecord>, usize) {
    harvests.sort_by(|a, b| b.reference.stamp().cmp(&a.reference.stamp()));

    let mut seen = HashSet::new();
    let mut batch = Vec::new();
    let mut dropped = 0;
    for harvest in harvests {
        for record in harvest.records {
            let key = (record.trading_date().clone(), record.product_code().to_string());
            if seen.insert(key) {
                batch.push(record);
            } else {
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        info!("Dropped {} duplicate records from republished bulletins", dropped);
    }
    (batch, dropped)
}
