//! Chain-facing collaborators: where requests come from and where prices go.
//!
//! - `RequestSource`: lists and fetches pending requests, and reports chain time
//! - `SettlementSink`: submits one settlement and waits for its receipt
//! - `SettlementQueue`: serializes every nonce-consuming submission
//!
//! Backends live outside this crate; in-memory fakes are in [`crate::fakes`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::request::hex_bytes;
use crate::domain::{Bytes32, PendingRequest, RequestId, SettlementError};

/// Errors raised by chain adapters.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("request not found: {0}")]
    NotFound(RequestId),

    #[error("chain transport error: {0}")]
    Transport(String),

    #[error("chain endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed chain response: {0}")]
    InvalidResponse(String),
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// Read side of the oracle contract.
#[async_trait]
pub trait RequestSource: Send + Sync {
    /// Ids of unsettled requests, in the order the contract reports them.
    async fn pending_request_ids(&self) -> ChainResult<Vec<RequestId>>;

    async fn fetch_request(&self, id: &RequestId) -> ChainResult<PendingRequest>;

    /// All pending requests, fetched one by one in id order.
    async fn pending_requests(&self) -> ChainResult<Vec<PendingRequest>> {
        let ids = self.pending_request_ids().await?;
        let mut requests = Vec::with_capacity(ids.len());
        for id in &ids {
            requests.push(self.fetch_request(id).await?);
        }
        Ok(requests)
    }

    /// Latest block timestamp. Defaults to wall-clock seconds.
    async fn current_timestamp(&self) -> ChainResult<u64> {
        Ok(chrono::Utc::now().timestamp().max(0) as u64)
    }
}

/// Arguments of the contract's `settlePrice` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementCall {
    pub identifier: Bytes32,
    pub timestamp: u64,
    #[serde(with = "hex_bytes")]
    pub ancillary_data: Vec<u8>,
    pub price: i64,
    pub evidence_hash: Bytes32,
}

impl SettlementCall {
    pub fn for_request(request: &PendingRequest, price: i64, evidence_hash: Bytes32) -> Self {
        Self {
            identifier: request.identifier,
            timestamp: request.timestamp,
            ancillary_data: request.ancillary_data.clone(),
            price,
            evidence_hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub tx_hash: String,
    pub success: bool,
}

/// Write side of the oracle contract.
#[async_trait]
pub trait SettlementSink: Send + Sync {
    /// Submit and wait for the transaction receipt.
    async fn submit_settlement(&self, call: &SettlementCall) -> ChainResult<SettlementReceipt>;
}

/// Single writer for the signing account.
///
/// The lock is held across submit-and-receipt so two callers can never race
/// on the account nonce. Clones share the same lock.
#[derive(Clone)]
pub struct SettlementQueue {
    sink: Arc<dyn SettlementSink>,
    lock: Arc<Mutex<()>>,
}

impl SettlementQueue {
    pub fn new(sink: Arc<dyn SettlementSink>) -> Self {
        Self {
            sink,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Submit `call`. A receipt reporting failure is an error.
    pub async fn settle(&self, call: &SettlementCall) -> Result<SettlementReceipt, SettlementError> {
        let _guard = self.lock.lock().await;
        let receipt = self.sink.submit_settlement(call).await?;
        if !receipt.success {
            return Err(SettlementError::Reverted {
                tx_hash: receipt.tx_hash,
            });
        }
        Ok(receipt)
    }
}

impl std::fmt::Debug for SettlementQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementQueue").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Sink that flags overlapping submissions.
    struct SlowSink {
        in_flight: AtomicUsize,
        overlapped: AtomicUsize,
        succeed: bool,
    }

    #[async_trait]
    impl SettlementSink for SlowSink {
        async fn submit_settlement(&self, _call: &SettlementCall) -> ChainResult<SettlementReceipt> {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(SettlementReceipt {
                tx_hash: "0xabc".into(),
                success: self.succeed,
            })
        }
    }

    fn call() -> SettlementCall {
        SettlementCall {
            identifier: Bytes32::ZERO,
            timestamp: 1,
            ancillary_data: b"q".to_vec(),
            price: 1,
            evidence_hash: Bytes32::ZERO,
        }
    }

    #[tokio::test]
    async fn test_queue_serializes_submissions() {
        let sink = Arc::new(SlowSink {
            in_flight: AtomicUsize::new(0),
            overlapped: AtomicUsize::new(0),
            succeed: true,
        });
        let queue = SettlementQueue::new(sink.clone());
        let a = queue.clone();
        let b = queue.clone();
        let (ra, rb) = tokio::join!(
            async move { a.settle(&call()).await },
            async move { b.settle(&call()).await }
        );
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(sink.overlapped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_receipt_is_error() {
        let sink = Arc::new(SlowSink {
            in_flight: AtomicUsize::new(0),
            overlapped: AtomicUsize::new(0),
            succeed: false,
        });
        let err = SettlementQueue::new(sink).settle(&call()).await.unwrap_err();
        assert!(matches!(err, SettlementError::Reverted { tx_hash } if tx_hash == "0xabc"));
    }

    #[test]
    fn test_settlement_call_wire_shape() {
        let json = serde_json::to_value(call()).unwrap();
        assert_eq!(json["ancillaryData"], "0x71");
        assert_eq!(json["price"], 1);
        assert!(json["evidenceHash"].as_str().unwrap().starts_with("0x"));
    }
}
