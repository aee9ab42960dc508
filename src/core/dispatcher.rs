//! Fans filtered work items out to a fixed pool of workers.

use crate::core::error::{AppError, Result};
use crate::core::ledger::Ledger;
use crate::core::models::{Endpoint, LedgerKey, RunSummary, WorkItem};
use crate::core::outcome::{Outcome, OutcomeKind};
use crate::core::policy::RetryPolicy;
use crate::remote::RemoteOperation;
use futures::FutureExt;
use indicatif::ProgressBar;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Knobs of one dispatcher run.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOptions {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Shuffle the filtered candidates before dispatch.
    pub shuffle: bool,
    /// Items a worker takes from the queue at a time.
    pub chunk_size: usize,
    /// Throttle: submit at most this many items, then pause.
    pub batch_size: Option<usize>,
    pub batch_pause: Duration,
    /// Record permanent failures in the ledger as handled.
    pub record_permanent: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            workers: 3,
            shuffle: false,
            chunk_size: 1,
            batch_size: None,
            batch_pause: Duration::from_secs(7),
            record_permanent: false,
        }
    }
}

/// What a worker reports back for each item.
#[derive(Debug)]
struct ItemReport {
    key: LedgerKey,
    /// `None` when the worker panicked on the item.
    kind: Option<OutcomeKind>,
}

/// Runs a [`RemoteOperation`] over a candidate list with ledger-backed
/// deduplication, a worker pool, and optional batch throttling.
pub struct Dispatcher {
    options: DispatchOptions,
    policy: RetryPolicy,
    endpoints: Arc<Vec<Endpoint>>,
    progress: Option<ProgressBar>,
}

impl Dispatcher {
    pub fn new(options: DispatchOptions, policy: RetryPolicy, endpoints: Vec<Endpoint>) -> Self {
        Self {
            options,
            policy,
            endpoints: Arc::new(endpoints),
            progress: None,
        }
    }

    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Dispatches every candidate not already in `ledger`.
    ///
    /// `factory` is called once per worker, before any worker starts, to
    /// build that worker's own operation instance. A factory error aborts
    /// the run without dispatching anything.
    pub async fn run<O, F>(
        &self,
        candidates: Vec<O::Item>,
        ledger: Option<Arc<Ledger>>,
        mut factory: F,
    ) -> Result<RunSummary>
    where
        O: RemoteOperation,
        F: FnMut(usize) -> Result<O>,
    {
        let mut summary = RunSummary {
            fetched: candidates.len(),
            ..RunSummary::default()
        };

        let processed: HashSet<LedgerKey> = match &ledger {
            Some(l) => l.load()?,
            None => HashSet::new(),
        };
        let mut pending: Vec<O::Item> = candidates
            .into_iter()
            .filter(|item| !processed.contains(&item.ledger_key()))
            .collect();
        summary.skipped = summary.fetched - pending.len();

        if summary.skipped > 0 {
            tracing::info!(target: "dispatch", "Skipped {} items already recorded in the ledger.", summary.skipped);
        }
        if pending.is_empty() {
            tracing::info!(target: "dispatch", "No new work items to dispatch.");
            return Ok(summary);
        }
        if self.options.workers == 0 {
            return Err(AppError::Config("worker count must be at least 1".to_string()));
        }

        if self.options.shuffle {
            pending.shuffle(&mut rand::thread_rng());
        }

        let worker_count = self.options.workers.min(pending.len());
        let ops = (0..worker_count)
            .map(&mut factory)
            .collect::<Result<Vec<O>>>()?;

        if let Some(bar) = &self.progress {
            bar.set_length(pending.len() as u64);
        }

        let (job_tx, job_rx) = mpsc::unbounded_channel::<Vec<O::Item>>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<ItemReport>();

        let handles: Vec<_> = ops
            .into_iter()
            .enumerate()
            .map(|(worker_id, op)| {
                tokio::spawn(worker_loop(
                    worker_id,
                    op,
                    self.policy.clone(),
                    Arc::clone(&self.endpoints),
                    ledger.clone(),
                    self.options.record_permanent,
                    Arc::clone(&job_rx),
                    report_tx.clone(),
                ))
            })
            .collect();
        drop(report_tx);

        tracing::info!(target: "dispatch",
            "Dispatching {} items across {} workers.", pending.len(), worker_count
        );

        let batch_size = self.options.batch_size.filter(|n| *n > 0).unwrap_or(pending.len());
        let chunk_size = self.options.chunk_size.max(1);
        let batches: Vec<&[O::Item]> = pending.chunks(batch_size).collect();
        let batch_count = batches.len();

        'batches: for (batch_idx, batch) in batches.into_iter().enumerate() {
            for chunk in batch.chunks(chunk_size) {
                if job_tx.send(chunk.to_vec()).is_err() {
                    tracing::error!(target: "dispatch", "All workers exited early; stopping dispatch.");
                    break 'batches;
                }
            }
            summary.batches += 1;

            for _ in 0..batch.len() {
                match report_rx.recv().await {
                    Some(report) => self.record(&mut summary, report),
                    None => {
                        tracing::error!(target: "dispatch", "Workers stopped reporting before the batch completed.");
                        break 'batches;
                    }
                }
            }

            if batch_idx + 1 < batch_count {
                tracing::info!(target: "dispatch",
                    "Processed batch {}/{} ({} items), pausing for {:?}...",
                    batch_idx + 1, batch_count, batch.len(), self.options.batch_pause
                );
                tokio::time::sleep(self.options.batch_pause).await;
            }
        }

        drop(job_tx);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(target: "dispatch", "A worker task failed to join: {}", e);
            }
        }
        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }

        tracing::info!(target: "dispatch",
            "Run finished: {} succeeded, {} not found, {} failed (fetched={}, skipped={}).",
            summary.success_count(), summary.not_found, summary.failed, summary.fetched, summary.skipped
        );
        Ok(summary)
    }

    fn record(&self, summary: &mut RunSummary, report: ItemReport) {
        summary.attempted += 1;
        match report.kind {
            Some(OutcomeKind::Success) => summary.succeeded.push(report.key),
            Some(OutcomeKind::PermanentFailure) => summary.not_found += 1,
            Some(OutcomeKind::TransientFailure) | Some(OutcomeKind::ProtocolError) | None => {
                summary.failed += 1
            }
        }
        if let Some(bar) = &self.progress {
            bar.inc(1);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop<O: RemoteOperation>(
    worker_id: usize,
    mut op: O,
    policy: RetryPolicy,
    endpoints: Arc<Vec<Endpoint>>,
    ledger: Option<Arc<Ledger>>,
    record_permanent: bool,
    jobs: Arc<Mutex<mpsc::UnboundedReceiver<Vec<O::Item>>>>,
    reports: mpsc::UnboundedSender<ItemReport>,
) {
    tracing::debug!(target: "dispatch", "Worker {} started.", worker_id);
    loop {
        let chunk = {
            let mut rx = jobs.lock().await;
            rx.recv().await
        };
        let Some(chunk) = chunk else { break };

        for item in chunk {
            let key = item.ledger_key();
            let attempt = AssertUnwindSafe(policy.execute(&mut op, &endpoints, &item))
                .catch_unwind()
                .await;

            let kind = match attempt {
                Ok(outcome) => {
                    log_outcome(worker_id, &item, &outcome);
                    let record = outcome.is_success() || (record_permanent && outcome.is_permanent());
                    if record {
                        if let Some(ledger) = &ledger {
                            // persist immediately so an interrupted run loses at most this item
                            if let Err(e) = ledger.append(std::slice::from_ref(&key)) {
                                tracing::error!(target: "ledger",
                                    "Failed to record {} in {}: {}", key, ledger.path().display(), e
                                );
                            }
                        }
                    }
                    Some(outcome.kind())
                }
                Err(_) => {
                    tracing::error!(target: "dispatch",
                        "Worker {} panicked while processing {}; continuing.", worker_id, item.label()
                    );
                    None
                }
            };

            if reports.send(ItemReport { key, kind }).is_err() {
                break;
            }
        }
        op.end_chunk().await;
    }
    op.shutdown().await;
    tracing::debug!(target: "dispatch", "Worker {} finished.", worker_id);
}

fn log_outcome<T: WorkItem>(worker_id: usize, item: &T, outcome: &Outcome) {
    match outcome {
        Outcome::Success(_) => {
            tracing::info!(target: "dispatch", "[worker {}] Completed {}", worker_id, item.label())
        }
        Outcome::PermanentFailure(_) => {
            tracing::info!(target: "dispatch",
                "[worker {}] Not found on any endpoint: {} ({})", worker_id, item.label(), outcome
            )
        }
        Outcome::TransientFailure(_) | Outcome::ProtocolError(_) => {
            tracing::warn!(target: "dispatch",
                "[worker {}] Failed {}: {}", worker_id, item.label(), outcome
            )
        }
    }
}
