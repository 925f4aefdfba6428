//! The bounded worker pool that drives extractions end to end.
//!
//! ```text
//! discovery ──► ledger + per-query limit ──► queue (2 × concurrency)
//!                                               │
//!                              ┌────────────────┼────────────────┐
//!                              ▼                ▼                ▼
//!                           worker           worker     ...   worker
//!                   (slot ► coordinator ► release ► retry?)
//!                              └──────────► sink ◄───────────────┘
//! ```
//!
//! The dispatcher awaits queue capacity, so discovery never outpaces the
//! workers. Each worker holds a pool slot only for the duration of one
//! attempt, including backoff sleeps outside of it.

use crate::acquisition::Gateway;
use crate::config::HarvestConfig;
use crate::coordinator::ExtractionCoordinator;
use crate::dedup::DedupLedger;
use crate::error::HarvestResult;
use crate::extraction::SelectorSet;
use crate::pool::{IdentityId, IdentityPool, Verdict};
use crate::record::{
    DatasetEntry, DiscoveredPlace, ExtractionOutcome, ExtractionRequest, FailureRecord,
};
use crate::stealth;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub discovered: u64,
    pub duplicates: u64,
    pub over_limit: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub content_failures: u64,
    pub transient_failures: u64,
    pub challenge_failures: u64,
    pub retries: u64,
    pub challenges: u64,
    pub identities_minted: u64,
    pub identities_retired: u64,
    pub elapsed_ms: u64,
}

#[derive(Default)]
struct Counters {
    succeeded: AtomicU64,
    content_failures: AtomicU64,
    transient_failures: AtomicU64,
    challenge_failures: AtomicU64,
    retries: AtomicU64,
    challenges: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct Pipeline {
    config: Arc<HarvestConfig>,
    gateway: Arc<dyn Gateway>,
    coordinator: Arc<ExtractionCoordinator>,
    pool: Arc<IdentityPool>,
    ledger: Arc<DedupLedger>,
}

impl Pipeline {
    /// Validates the configuration; nothing is extracted if it is rejected.
    pub fn new(
        config: HarvestConfig,
        gateway: Arc<dyn Gateway>,
        selectors: Arc<SelectorSet>,
    ) -> HarvestResult<Self> {
        config.validate()?;
        selectors.validate()?;
        let pool = IdentityPool::new(config.pool_limits(), config.proxies.clone(), config.locale.clone());
        Ok(Self {
            coordinator: Arc::new(
                ExtractionCoordinator::new(Arc::clone(&gateway), selectors)
                    .with_reviews_budget(Duration::from_millis(config.render_timeout_ms)),
            ),
            gateway,
            pool: Arc::new(pool),
            ledger: Arc::new(DedupLedger::new()),
            config: Arc::new(config),
        })
    }

    pub fn pool(&self) -> &IdentityPool {
        &self.pool
    }

    /// Extract every admitted listing from `discovered`, sending one entry
    /// per terminal outcome to `sink`. Returns once all work has drained.
    pub async fn run<S>(&self, discovered: S, sink: mpsc::Sender<DatasetEntry>) -> RunStats
    where
        S: Stream<Item = DiscoveredPlace> + Send + Unpin,
    {
        let started = Instant::now();
        let concurrency = self.config.concurrency.max(1);
        let (queue_tx, queue_rx) = mpsc::channel::<ExtractionRequest>(concurrency * 2);
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let counters = Arc::new(Counters::default());

        let workers: Vec<_> = (0..concurrency)
            .map(|n| {
                let worker = Worker {
                    config: Arc::clone(&self.config),
                    gateway: Arc::clone(&self.gateway),
                    coordinator: Arc::clone(&self.coordinator),
                    pool: Arc::clone(&self.pool),
                    sink: sink.clone(),
                    counters: Arc::clone(&counters),
                };
                let queue_rx = Arc::clone(&queue_rx);
                tokio::spawn(async move {
                    loop {
                        let next = queue_rx.lock().await.recv().await;
                        let Some(request) = next else { break };
                        worker.process(request).await;
                    }
                    tracing::trace!(worker = n, "worker finished");
                })
            })
            .collect();
        drop(sink);

        let mut stats = RunStats::default();
        let mut per_query: HashMap<String, usize> = HashMap::new();
        let mut discovered = discovered;
        while let Some(place) = discovered.next().await {
            stats.discovered += 1;
            if !self.ledger.admit(&place.identifier) {
                stats.duplicates += 1;
                continue;
            }
            let taken = per_query.entry(place.query.clone()).or_default();
            if self.config.max_results.is_some_and(|limit| *taken >= limit) {
                tracing::debug!(query = %place.query, identifier = %place.identifier, "result limit reached");
                stats.over_limit += 1;
                continue;
            }
            *taken += 1;

            let request = ExtractionRequest {
                identifier: place.identifier,
                query: place.query,
                locale: place.locale.or_else(|| self.config.locale.clone()),
                include_reviews: self.config.include_reviews,
                include_images: self.config.include_images,
            };
            if queue_tx.send(request).await.is_err() {
                tracing::warn!("all workers stopped, discarding remaining input");
                break;
            }
            stats.dispatched += 1;
        }
        drop(queue_tx);

        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!("worker task failed: {e}");
            }
        }

        let pool_stats = self.pool.stats();
        stats.succeeded = counters.succeeded.load(Ordering::Relaxed);
        stats.content_failures = counters.content_failures.load(Ordering::Relaxed);
        stats.transient_failures = counters.transient_failures.load(Ordering::Relaxed);
        stats.challenge_failures = counters.challenge_failures.load(Ordering::Relaxed);
        stats.retries = counters.retries.load(Ordering::Relaxed);
        stats.challenges = counters.challenges.load(Ordering::Relaxed);
        stats.identities_minted = pool_stats.minted;
        stats.identities_retired = pool_stats.retired;
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            discovered = stats.discovered,
            duplicates = stats.duplicates,
            dispatched = stats.dispatched,
            succeeded = stats.succeeded,
            content_failures = stats.content_failures,
            transient_failures = stats.transient_failures,
            challenge_failures = stats.challenge_failures,
            retries = stats.retries,
            elapsed_ms = stats.elapsed_ms,
            "run finished"
        );
        stats
    }
}

struct Worker {
    config: Arc<HarvestConfig>,
    gateway: Arc<dyn Gateway>,
    coordinator: Arc<ExtractionCoordinator>,
    pool: Arc<IdentityPool>,
    sink: mpsc::Sender<DatasetEntry>,
    counters: Arc<Counters>,
}

impl Worker {
    /// Attempt one request until it succeeds, fails permanently, or runs
    /// out of retries.
    async fn process(&self, request: ExtractionRequest) {
        let mut avoid: Vec<IdentityId> = Vec::new();
        let mut transient_retries = 0u32;
        let mut challenge_retries = 0u32;
        let retry = &self.config.retry;

        loop {
            let slot = match self.pool.acquire(&avoid).await {
                Ok(slot) => slot,
                Err(e) => {
                    self.emit_failure(&request, e.to_string()).await;
                    return;
                }
            };
            let identity = slot.identity().clone();

            let budget = Duration::from_millis(self.config.request_timeout_ms);
            let outcome = self
                .coordinator
                .extract_within(&request, &identity, budget)
                .await;

            let verdict = match &outcome {
                ExtractionOutcome::TransientFailure(f) if f.is_challenge() => Verdict::Challenged,
                ExtractionOutcome::TransientFailure(_) => Verdict::Transient,
                _ => Verdict::Ok,
            };
            if let Some(retired) = self.pool.release(slot, verdict) {
                self.gateway.retire(retired).await;
            }

            let failure = match outcome {
                ExtractionOutcome::Success(record) => {
                    bump(&self.counters.succeeded);
                    tracing::info!(
                        identifier = %request.identifier,
                        name = %record.name,
                        via = ?record.extracted_via,
                        "extracted"
                    );
                    self.emit(DatasetEntry::Record(record)).await;
                    return;
                }
                ExtractionOutcome::PartialFailure(reason) => {
                    bump(&self.counters.content_failures);
                    tracing::info!(identifier = %request.identifier, %reason, "dropped");
                    self.emit_failure(&request, reason).await;
                    return;
                }
                ExtractionOutcome::TransientFailure(failure) => failure,
            };

            let (used, ceiling) = if failure.is_challenge() {
                bump(&self.counters.challenges);
                (&mut challenge_retries, retry.max_challenge_retries)
            } else {
                (&mut transient_retries, retry.max_transient_retries)
            };
            if *used >= ceiling {
                if failure.is_challenge() {
                    bump(&self.counters.challenge_failures);
                } else {
                    bump(&self.counters.transient_failures);
                }
                tracing::info!(identifier = %request.identifier, reason = %failure, "giving up");
                self.emit_failure(&request, failure.to_string()).await;
                return;
            }
            *used += 1;
            let attempt = *used;
            bump(&self.counters.retries);
            avoid.push(identity.id);

            let delay = backoff(retry.backoff_ms, attempt);
            tracing::debug!(
                identifier = %request.identifier,
                reason = %failure,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying with a fresh identity"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn emit_failure(&self, request: &ExtractionRequest, reason: String) {
        self.emit(DatasetEntry::Failure(FailureRecord::new(request, reason)))
            .await;
    }

    async fn emit(&self, entry: DatasetEntry) {
        if self.sink.send(entry).await.is_err() {
            // Nobody is listening any more; fail the remaining work fast.
            tracing::warn!("output sink closed, entry lost; stopping workers");
            self.pool.close();
        }
    }
}

/// Exponential backoff with up to one base interval of jitter.
fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    Duration::from_millis(base_ms.saturating_mul(1 << exponent)) + stealth::jitter(0, base_ms)
}
