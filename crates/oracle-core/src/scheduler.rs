//! Settlement scheduler: the poll loop that turns pending requests into
//! settled prices.
//!
//! One task owns all mutable scheduling state (recently-settled window,
//! failure tracker, prepared-script cache), so none of it is locked. The only
//! shared resource is the [`SettlementQueue`], which operator-triggered
//! [`ManualSettlement`] also goes through.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::backoff::{FailureStage, FailureTracker};
use crate::chain::{RequestSource, SettlementCall, SettlementQueue, SettlementSink};
use crate::config::ResolverConfig;
use crate::domain::{Bytes32, Evidence, PendingRequest, RequestId, ResolverError, Result};
use crate::evidence_store::{EvidenceStore, FsEvidenceStore};
use crate::obs::{self, CycleSpan, SkipReason};
use crate::pipeline::{PreparedScript, ResolutionPipeline};
use crate::ttl::TtlSet;

/// One successful settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub request_id: RequestId,
    pub timestamp: u64,
    pub price: i64,
    pub evidence_hash: Bytes32,
    pub tx_hash: String,
}

/// Builder for [`SettlementScheduler`].
///
/// A request source and a settlement sink (or queue) are required. Without a
/// pipeline the scheduler can only settle through a price override.
#[derive(Default)]
pub struct SchedulerBuilder {
    config: ResolverConfig,
    source: Option<Arc<dyn RequestSource>>,
    queue: Option<SettlementQueue>,
    pipeline: Option<ResolutionPipeline>,
    evidence: Option<Arc<dyn EvidenceStore>>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source(mut self, source: Arc<dyn RequestSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn SettlementSink>) -> Self {
        self.queue = Some(SettlementQueue::new(sink));
        self
    }

    /// Use an existing queue, e.g. one shared with a [`ManualSettlement`].
    pub fn settlement_queue(mut self, queue: SettlementQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn pipeline(mut self, pipeline: ResolutionPipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Defaults to a [`FsEvidenceStore`] under `config.evidence_dir`.
    pub fn evidence_store(mut self, store: Arc<dyn EvidenceStore>) -> Self {
        self.evidence = Some(store);
        self
    }

    pub fn build(self) -> Result<SettlementScheduler> {
        self.config.validate()?;
        let source = self
            .source
            .ok_or_else(|| ResolverError::MissingConfig("pending-request source".into()))?;
        let queue = self
            .queue
            .ok_or_else(|| ResolverError::MissingConfig("settlement sink".into()))?;
        let evidence: Arc<dyn EvidenceStore> = match self.evidence {
            Some(store) => store,
            None => Arc::new(FsEvidenceStore::new(&self.config.evidence_dir)),
        };
        if self.pipeline.is_none() {
            warn!("no code generator configured; only price overrides will settle");
        }

        Ok(SettlementScheduler {
            source,
            queue,
            pipeline: self.pipeline,
            evidence,
            poll_interval: Duration::from_secs(self.config.poll_interval_secs),
            grace_secs: self.config.settlement_grace_secs,
            recently_settled: TtlSet::new(self.config.recently_settled_window_secs),
            failures: FailureTracker::new(self.config.max_failures, self.config.failure_backoff_secs),
            prepared: HashMap::new(),
        })
    }
}

pub struct SettlementScheduler {
    source: Arc<dyn RequestSource>,
    queue: SettlementQueue,
    pipeline: Option<ResolutionPipeline>,
    evidence: Arc<dyn EvidenceStore>,
    poll_interval: Duration,
    grace_secs: u64,
    recently_settled: TtlSet<RequestId>,
    failures: FailureTracker,
    prepared: HashMap<RequestId, PreparedScript>,
}

impl SettlementScheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::default()
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    pub fn is_prepared(&self, id: &RequestId) -> bool {
        self.prepared.contains_key(id)
    }

    pub fn is_recently_settled(&self, id: &RequestId) -> bool {
        self.recently_settled.contains(id)
    }

    /// Manual settlement sharing this scheduler's source, queue and store.
    pub fn manual_settlement(&self) -> ManualSettlement {
        ManualSettlement::new(
            self.source.clone(),
            self.queue.clone(),
            self.evidence.clone(),
        )
    }

    /// Poll until `shutdown` fires.
    ///
    /// Cancellation drops the in-flight cycle: a running script is killed and
    /// its evidence is never persisted.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            grace_secs = self.grace_secs,
            "settlement scheduler started"
        );
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.run_cycle(None) => {
                    if let Err(e) = result {
                        warn!(error = %e, "poll cycle failed");
                    }
                }
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("settlement scheduler stopped");
        Ok(())
    }

    /// One pass over every pending request, in source order.
    ///
    /// With `price_override`, due requests settle at that price with manual
    /// evidence instead of going through the pipeline. Errors for a single
    /// request are logged and do not stop the cycle; only failing to read the
    /// chain clock or the pending list fails the whole cycle.
    pub async fn run_cycle(&mut self, price_override: Option<i64>) -> Result<Vec<SettlementRecord>> {
        let cycle = CycleSpan::new();
        self.cycle(price_override)
            .instrument(cycle.span().clone())
            .await
    }

    async fn cycle(&mut self, price_override: Option<i64>) -> Result<Vec<SettlementRecord>> {
        let started = Instant::now();

        let now = self.source.current_timestamp().await?;
        let ids = self.source.pending_request_ids().await?;
        self.recently_settled.prune(now);
        self.forget_unlisted(&ids);
        obs::emit_cycle_started(now, ids.len());

        let mut records = Vec::new();
        let mut failed = 0usize;
        for id in &ids {
            let request = match self.source.fetch_request(id).await {
                Ok(request) => request,
                Err(e) => {
                    warn!(request_id = %id.short(), error = %e, "failed to fetch request");
                    failed += 1;
                    continue;
                }
            };
            match self.process(&request, now, price_override).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(_) => failed += 1,
            }
        }

        obs::emit_cycle_finished(started.elapsed().as_millis() as u64, records.len(), failed);
        Ok(records)
    }

    async fn process(
        &mut self,
        request: &PendingRequest,
        now: u64,
        price_override: Option<i64>,
    ) -> Result<Option<SettlementRecord>> {
        let id = request.request_id;

        if request.settled {
            self.prepared.remove(&id);
            obs::emit_request_skipped(&id, SkipReason::Settled);
            return Ok(None);
        }
        if self.recently_settled.contains(&id) {
            obs::emit_request_skipped(&id, SkipReason::RecentlySettled);
            return Ok(None);
        }
        if let Some(remaining_secs) = self.failures.remaining(&id, now) {
            obs::emit_request_skipped(&id, SkipReason::BackedOff { remaining_secs });
            return Ok(None);
        }

        if price_override.is_none() && !self.prepared.contains_key(&id) {
            let Some(pipeline) = &self.pipeline else {
                obs::emit_request_skipped(&id, SkipReason::GeneratorUnavailable);
                return Ok(None);
            };
            match pipeline.prepare(request, None).await {
                Ok(script) => {
                    self.failures.clear_stage(&id, FailureStage::Prepare);
                    self.prepared.insert(id, script);
                }
                Err(e) => {
                    self.record_failure(id, now, FailureStage::Prepare, &e);
                    return Err(e);
                }
            }
        }

        let due = request.settle_after(self.grace_secs);
        if now < due {
            obs::emit_request_skipped(
                &id,
                SkipReason::AwaitingDeadline {
                    remaining_secs: due - now,
                },
            );
            return Ok(None);
        }

        let mut evidence = match price_override {
            Some(price) => Evidence::manual(request, price, now),
            None => {
                let Some(pipeline) = &self.pipeline else {
                    obs::emit_request_skipped(&id, SkipReason::GeneratorUnavailable);
                    return Ok(None);
                };
                let cached = self.prepared.remove(&id);
                match pipeline.resolve(request, cached).await {
                    Ok(evidence) => evidence,
                    Err(e) => {
                        self.record_failure(id, now, FailureStage::Execution, &e);
                        return Err(e);
                    }
                }
            }
        };
        evidence.settled_at = Some(now);

        let record = settle_evidence(&self.queue, self.evidence.as_ref(), request, evidence).await?;
        self.recently_settled.insert(id, now);
        self.failures.clear(&id);
        self.prepared.remove(&id);
        Ok(Some(record))
    }

    /// Drop cached scripts and failure state for requests the source no
    /// longer lists (settled elsewhere or expired).
    fn forget_unlisted(&mut self, ids: &[RequestId]) {
        let listed: HashSet<&RequestId> = ids.iter().collect();
        self.prepared.retain(|id, _| listed.contains(id));
        self.failures.retain(|id| listed.contains(id));
    }

    fn record_failure(
        &mut self,
        id: RequestId,
        now: u64,
        stage: FailureStage,
        error: &ResolverError,
    ) {
        if error.counts_as_resolution_failure() {
            let state = self.failures.record_failure(id, now, stage);
            obs::emit_request_failed(&id, state.count, error);
        } else {
            obs::emit_request_failed(&id, 0, error);
        }
    }
}

/// Operator-triggered settlement of a single request at a fixed price.
///
/// Refuses requests already settled on-chain. Does not check the deadline:
/// the contract is the authority on whether settlement is allowed.
#[derive(Clone)]
pub struct ManualSettlement {
    source: Arc<dyn RequestSource>,
    queue: SettlementQueue,
    evidence: Arc<dyn EvidenceStore>,
}

impl ManualSettlement {
    pub fn new(
        source: Arc<dyn RequestSource>,
        queue: SettlementQueue,
        evidence: Arc<dyn EvidenceStore>,
    ) -> Self {
        Self {
            source,
            queue,
            evidence,
        }
    }

    pub async fn settle(&self, id: &RequestId, price: i64) -> Result<SettlementRecord> {
        let request = self.source.fetch_request(id).await?;
        if request.settled {
            return Err(ResolverError::AlreadySettled(*id));
        }
        let now = self.source.current_timestamp().await?;
        let evidence = Evidence::manual(&request, price, now);
        settle_evidence(&self.queue, self.evidence.as_ref(), &request, evidence).await
    }
}

/// Hash, submit, then persist. A persistence failure is logged, not returned:
/// the transaction is already on-chain.
async fn settle_evidence(
    queue: &SettlementQueue,
    store: &dyn EvidenceStore,
    request: &PendingRequest,
    evidence: Evidence,
) -> Result<SettlementRecord> {
    let id = request.request_id;
    let evidence_hash = evidence.content_hash()?;
    let call = SettlementCall::for_request(request, evidence.price, evidence_hash);

    let receipt = match queue.settle(&call).await {
        Ok(receipt) => receipt,
        Err(e) => {
            obs::emit_settlement_failed(&id, &e);
            return Err(e.into());
        }
    };
    obs::emit_settlement_submitted(&id, call.price, &receipt.tx_hash);

    let settled = evidence.into_settled(receipt.tx_hash.clone());
    match store.persist(&settled) {
        Ok(path) => info!(request_id = %id.short(), path = %path.display(), "evidence saved"),
        Err(e) => warn!(request_id = %id.short(), error = %e, "failed to persist evidence"),
    }

    Ok(SettlementRecord {
        request_id: id,
        timestamp: request.timestamp,
        price: call.price,
        evidence_hash,
        tx_hash: receipt.tx_hash,
    })
}
