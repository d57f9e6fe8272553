//! Batch driver around the resolver: bounded parallelism, bounded retry of
//! transient failures, and a per-batch tally.
//!
//! A failing record never stops the batch. Only an unavailable rule
//! catalog or live book does, since no correct decision is possible without
//! them; records not yet started are then reported as skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::ResolveError;
use crate::metrics_consts::{BATCH_ABORTED_COUNTER, BATCH_RECORDS_COUNTER, BATCH_RETRIES_COUNTER};
use crate::types::{CustomerRecord, OfferRecord};
use crate::Resolver;

/// One line of ingestion input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestItem {
    Customer(CustomerRecord),
    Offer(OfferRecord),
}

impl IngestItem {
    /// Human-readable reference used in failure reports.
    pub fn reference(&self) -> String {
        match self {
            IngestItem::Customer(record) => format!(
                "customer {}/{}",
                record.source_system, record.source_customer_id
            ),
            IngestItem::Offer(offer) => format!("offer {}", offer.offer_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRecord {
    /// Position of the record in the batch input.
    pub index: usize,
    pub reference: String,
    pub kind: &'static str,
    pub reason: String,
    pub attempts: u32,
    /// Routed to the manual-review queue rather than simply rejected.
    pub manual_review: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub profiles_created: usize,
    pub profiles_merged: usize,
    pub offers_unique: usize,
    pub offers_duplicate: usize,
    pub skipped: usize,
    pub failures: Vec<FailedRecord>,
    /// Set when the batch stopped early.
    pub aborted: Option<String>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.profiles_created + self.profiles_merged + self.offers_unique + self.offers_duplicate
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn manual_review(&self) -> impl Iterator<Item = &FailedRecord> {
        self.failures.iter().filter(|f| f.manual_review)
    }
}

#[derive(Debug)]
enum ItemOutcome {
    ProfileCreated,
    ProfileMerged,
    OfferUnique,
    OfferDuplicate,
    Failed(FailedRecord),
    Skipped,
}

impl ItemOutcome {
    fn status(&self) -> &'static str {
        match self {
            ItemOutcome::ProfileCreated => "profile_created",
            ItemOutcome::ProfileMerged => "profile_merged",
            ItemOutcome::OfferUnique => "offer_unique",
            ItemOutcome::OfferDuplicate => "offer_duplicate",
            ItemOutcome::Failed(_) => "failed",
            ItemOutcome::Skipped => "skipped",
        }
    }
}

/// Errors a person has to look at. Validation failures are plain rejects.
fn needs_manual_review(error: &ResolveError) -> bool {
    !matches!(
        error,
        ResolveError::Validation(_) | ResolveError::RuleRetrieval(_) | ResolveError::Store(_)
    )
}

#[derive(Clone)]
pub struct BatchIngestor {
    resolver: Arc<Resolver>,
    worker_count: usize,
    max_conflict_retries: u32,
}

impl BatchIngestor {
    pub fn new(resolver: Arc<Resolver>, worker_count: usize, max_conflict_retries: u32) -> Self {
        Self {
            resolver,
            worker_count: worker_count.max(1),
            max_conflict_retries,
        }
    }

    /// Resolves every item with at most `worker_count` in flight.
    pub async fn run(&self, items: Vec<IngestItem>) -> BatchSummary {
        let total = items.len();
        info!(records = total, workers = self.worker_count, "starting batch");

        let permits = Arc::new(Semaphore::new(self.worker_count));
        let abort: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
        let abort_reason: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let handles: Vec<_> = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let ingestor = self.clone();
                let permits = permits.clone();
                let abort = abort.clone();
                let abort_reason = abort_reason.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return ItemOutcome::Skipped;
                    };
                    if abort.load(Ordering::SeqCst) {
                        return ItemOutcome::Skipped;
                    }
                    let outcome = ingestor.process(index, &item).await;
                    if let Err((_, e)) = &outcome {
                        if e.aborts_batch() && !abort.swap(true, Ordering::SeqCst) {
                            error!(error = %e, reference = %item.reference(), "collaborator unavailable, aborting batch");
                            if let Ok(mut reason) = abort_reason.lock() {
                                *reason = Some(e.to_string());
                            }
                        }
                    }
                    outcome.unwrap_or_else(|(failed, _)| ItemOutcome::Failed(failed))
                })
            })
            .collect();

        let mut summary = BatchSummary::default();
        for (index, joined) in futures::future::join_all(handles).await.into_iter().enumerate() {
            let outcome = joined.unwrap_or_else(|e| {
                ItemOutcome::Failed(FailedRecord {
                    index,
                    reference: format!("record #{index}"),
                    kind: "panic",
                    reason: e.to_string(),
                    attempts: 1,
                    manual_review: true,
                })
            });
            metrics::counter!(BATCH_RECORDS_COUNTER, "status" => outcome.status()).increment(1);
            match outcome {
                ItemOutcome::ProfileCreated => summary.profiles_created += 1,
                ItemOutcome::ProfileMerged => summary.profiles_merged += 1,
                ItemOutcome::OfferUnique => summary.offers_unique += 1,
                ItemOutcome::OfferDuplicate => summary.offers_duplicate += 1,
                ItemOutcome::Failed(failed) => summary.failures.push(failed),
                ItemOutcome::Skipped => summary.skipped += 1,
            }
        }

        if abort.load(Ordering::SeqCst) {
            metrics::counter!(BATCH_ABORTED_COUNTER).increment(1);
            summary.aborted = abort_reason
                .lock()
                .ok()
                .and_then(|reason| reason.clone())
                .or_else(|| Some("collaborator unavailable".to_string()));
        }

        info!(
            records = total,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            skipped = summary.skipped,
            aborted = summary.aborted.is_some(),
            "finished batch"
        );
        summary
    }

    /// Runs one item, retrying transient failures. The error side carries
    /// the failure report and the final error.
    async fn process(
        &self,
        index: usize,
        item: &IngestItem,
    ) -> Result<ItemOutcome, (FailedRecord, ResolveError)> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match item {
                IngestItem::Customer(record) => {
                    self.resolver.resolve_customer(record).await.map(|resolution| {
                        if resolution.is_new {
                            ItemOutcome::ProfileCreated
                        } else {
                            ItemOutcome::ProfileMerged
                        }
                    })
                }
                IngestItem::Offer(offer) => self.resolver.resolve_offer(offer).await.map(|result| {
                    if result.is_duplicate {
                        ItemOutcome::OfferDuplicate
                    } else {
                        ItemOutcome::OfferUnique
                    }
                }),
            };

            match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() && attempts <= self.max_conflict_retries => {
                    metrics::counter!(BATCH_RETRIES_COUNTER, "kind" => e.kind()).increment(1);
                    warn!(reference = %item.reference(), attempt = attempts, error = %e, "retrying record");
                }
                Err(e) => {
                    let failed = FailedRecord {
                        index,
                        reference: item.reference(),
                        kind: e.kind(),
                        reason: error_chain(&e),
                        attempts,
                        manual_review: needs_manual_review(&e),
                    };
                    if failed.manual_review {
                        warn!(reference = %failed.reference, kind = failed.kind, reason = %failed.reason, "routing record to manual review");
                    }
                    return Err((failed, e));
                }
            }
        }
    }
}

/// The error and all of its sources, `: `-joined.
fn error_chain(error: &ResolveError) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
