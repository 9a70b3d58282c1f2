//! In-memory collaborators for tests.
//!
//! `MemoryOracle`, `ScriptedGenerator`, `CannedExecutor` and
//! `MemoryEvidenceStore` satisfy the crate's traits with no network, no
//! interpreter and no filesystem.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::chain::{
    ChainError, ChainResult, RequestSource, SettlementCall, SettlementReceipt, SettlementSink,
};
use crate::domain::{PendingRequest, RequestId, SettledEvidence};
use crate::evidence_store::{EvidenceResult, EvidenceStore};
use crate::generator::{CodeGenerator, GenerationContext, GenerationError};
use crate::sandbox::{ExecutionResult, SandboxResult, ScriptExecutor};

// ---------------------------------------------------------------------------
// MemoryOracle
// ---------------------------------------------------------------------------

/// Oracle contract double: request source, settlement sink and chain clock.
///
/// Settlements are logged but do not flip `settled` unless
/// [`MemoryOracle::settle_on_submit`] is enabled, mimicking a view that lags
/// behind a just-mined transaction.
#[derive(Debug)]
pub struct MemoryOracle {
    requests: Mutex<Vec<PendingRequest>>,
    now: AtomicU64,
    settlements: Mutex<Vec<SettlementCall>>,
    settle_on_submit: AtomicBool,
    revert: AtomicBool,
    unreachable: AtomicBool,
    tx_counter: AtomicU64,
}

impl MemoryOracle {
    pub fn new(now: u64) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            now: AtomicU64::new(now),
            settlements: Mutex::new(Vec::new()),
            settle_on_submit: AtomicBool::new(false),
            revert: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            tx_counter: AtomicU64::new(0),
        }
    }

    /// Add or replace a request (matched by id).
    pub fn insert(&self, request: PendingRequest) {
        let mut requests = self.requests.lock().unwrap();
        match requests.iter_mut().find(|r| r.request_id == request.request_id) {
            Some(existing) => *existing = request,
            None => requests.push(request),
        }
    }

    pub fn request(&self, id: &RequestId) -> Option<PendingRequest> {
        let requests = self.requests.lock().unwrap();
        requests.iter().find(|r| r.request_id == *id).cloned()
    }

    pub fn mark_settled(&self, id: &RequestId, price: i64) {
        let mut requests = self.requests.lock().unwrap();
        if let Some(r) = requests.iter_mut().find(|r| r.request_id == *id) {
            r.settled = true;
            r.settled_price = price;
        }
    }

    /// Stop listing a request, as when it expires or drops off the contract.
    pub fn remove(&self, id: &RequestId) -> Option<PendingRequest> {
        let mut requests = self.requests.lock().unwrap();
        let index = requests.iter().position(|r| r.request_id == *id)?;
        Some(requests.remove(index))
    }

    pub fn set_now(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn settle_on_submit(&self, enabled: bool) {
        self.settle_on_submit.store(enabled, Ordering::SeqCst);
    }

    /// Make receipts report failure.
    pub fn set_revert(&self, revert: bool) {
        self.revert.store(revert, Ordering::SeqCst);
    }

    /// Make every sink call fail at the transport level.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Every submitted call, including reverted ones.
    pub fn settlements(&self) -> Vec<SettlementCall> {
        self.settlements.lock().unwrap().clone()
    }
}

#[async_trait]
impl RequestSource for MemoryOracle {
    /// All known ids in insertion order, settled ones included.
    async fn pending_request_ids(&self) -> ChainResult<Vec<RequestId>> {
        let requests = self.requests.lock().unwrap();
        Ok(requests.iter().map(|r| r.request_id).collect())
    }

    async fn fetch_request(&self, id: &RequestId) -> ChainResult<PendingRequest> {
        self.request(id).ok_or(ChainError::NotFound(*id))
    }

    async fn current_timestamp(&self) -> ChainResult<u64> {
        Ok(self.now.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl SettlementSink for MemoryOracle {
    async fn submit_settlement(&self, call: &SettlementCall) -> ChainResult<SettlementReceipt> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("oracle unreachable".into()));
        }
        self.settlements.lock().unwrap().push(call.clone());
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let success = !self.revert.load(Ordering::SeqCst);

        if success && self.settle_on_submit.load(Ordering::SeqCst) {
            let mut requests = self.requests.lock().unwrap();
            for r in requests.iter_mut().filter(|r| {
                r.identifier == call.identifier
                    && r.timestamp == call.timestamp
                    && r.ancillary_data == call.ancillary_data
            }) {
                r.settled = true;
                r.settled_price = call.price;
                r.evidence_hash = call.evidence_hash;
            }
        }

        Ok(SettlementReceipt {
            tx_hash: format!("0x{n:064x}"),
            success,
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

/// Returns queued responses in order and records what it was asked.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, GenerationError>>>,
    tasks: Mutex<Vec<String>>,
    contexts: Mutex<Vec<GenerationContext>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn push(&self, response: Result<String, GenerationError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn tasks(&self) -> Vec<String> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn contexts(&self) -> Vec<GenerationContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        task: &str,
        context: &GenerationContext,
    ) -> Result<String, GenerationError> {
        self.tasks.lock().unwrap().push(task.to_string());
        self.contexts.lock().unwrap().push(context.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::InvalidResponse("no scripted response left".into())))
    }
}

// ---------------------------------------------------------------------------
// CannedExecutor
// ---------------------------------------------------------------------------

/// Returns queued results in order, then `fallback` (if any) forever.
#[derive(Debug, Default)]
pub struct CannedExecutor {
    results: Mutex<VecDeque<SandboxResult<ExecutionResult>>>,
    fallback: Option<ExecutionResult>,
    scripts: Mutex<Vec<String>>,
}

impl CannedExecutor {
    pub fn new(results: Vec<SandboxResult<ExecutionResult>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    pub fn repeating(result: ExecutionResult) -> Self {
        Self {
            fallback: Some(result),
            ..Self::default()
        }
    }

    /// Scripts executed so far, in order.
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptExecutor for CannedExecutor {
    async fn execute(&self, source: &str) -> SandboxResult<ExecutionResult> {
        self.scripts.lock().unwrap().push(source.to_string());
        if let Some(next) = self.results.lock().unwrap().pop_front() {
            return next;
        }
        Ok(self.fallback.clone().unwrap_or_else(|| {
            ExecutionResult::from_output(Some(1), String::new(), "no canned result left".into(), 0)
        }))
    }
}

// ---------------------------------------------------------------------------
// MemoryEvidenceStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryEvidenceStore {
    records: Mutex<HashMap<RequestId, SettledEvidence>>,
}

impl MemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EvidenceStore for MemoryEvidenceStore {
    fn persist(&self, evidence: &SettledEvidence) -> EvidenceResult<PathBuf> {
        let id = evidence.request_id();
        self.records.lock().unwrap().insert(id, evidence.clone());
        Ok(PathBuf::from(format!("memory://{}", id.to_hex())))
    }

    fn load(&self, request_id: &RequestId) -> EvidenceResult<Option<SettledEvidence>> {
        Ok(self.records.lock().unwrap().get(request_id).cloned())
    }
}
