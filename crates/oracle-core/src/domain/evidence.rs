//! Evidence records: the auditable rationale pinned on-chain by its hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::digest::keccak_digest;
use super::error::ValidationError;
use super::request::{Bytes32, PendingRequest};
use crate::analysis::{Confidence, ScriptAnalysis};

/// Decision printed by a resolution script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Yes,
    No,
}

impl Decision {
    /// Case-insensitive parse of `YES` / `NO`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "YES" => Some(Decision::Yes),
            "NO" => Some(Decision::No),
            _ => None,
        }
    }

    /// Settlement price for a binary question.
    pub fn price(self) -> i64 {
        match self {
            Decision::Yes => 1,
            Decision::No => 0,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Yes => write!(f, "YES"),
            Decision::No => write!(f, "NO"),
        }
    }
}

/// Decision recorded in evidence: a script outcome or an operator override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvidenceDecision {
    Yes,
    No,
    Override,
}

impl From<Decision> for EvidenceDecision {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Yes => EvidenceDecision::Yes,
            Decision::No => EvidenceDecision::No,
        }
    }
}

/// Script-side provenance attached to AI-resolved evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTrace {
    pub script: String,
    pub script_digest: String,
    pub stdout: String,
    pub stderr: String,
    pub executed_at: DateTime<Utc>,
    pub analysis: ScriptAnalysis,
    pub analysis_confidence: Confidence,
    pub prepared_at: DateTime<Utc>,
}

/// Evidence as hashed for settlement. Carries no transaction hash by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub request_id: Bytes32,
    pub identifier: Bytes32,
    pub timestamp: u64,
    pub ancillary: String,
    pub decision: EvidenceDecision,
    pub reason: String,
    pub price: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(flatten)]
    pub execution: Option<ExecutionTrace>,
    /// Chain time at which settlement was submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<u64>,
}

impl Evidence {
    /// Reduced evidence for an operator-supplied price; no AI involved.
    pub fn manual(request: &PendingRequest, price: i64, settled_at: u64) -> Self {
        Self {
            request_id: request.request_id,
            identifier: request.identifier,
            timestamp: request.timestamp,
            ancillary: request.ancillary_text(),
            decision: EvidenceDecision::Override,
            reason: "Operator-supplied price override".to_string(),
            price,
            data: None,
            execution: None,
            settled_at: Some(settled_at),
        }
    }

    /// Hash submitted on-chain alongside the price.
    pub fn content_hash(&self) -> Result<Bytes32, ValidationError> {
        let value = serde_json::to_value(self)
            .map_err(|e| ValidationError::Canonicalization(e.to_string()))?;
        keccak_digest(&value)
    }

    /// Attach the settlement transaction hash, freezing the record.
    pub fn into_settled(self, tx_hash: impl Into<String>) -> SettledEvidence {
        SettledEvidence {
            evidence: self,
            tx_hash: tx_hash.into(),
        }
    }
}

/// Evidence after settlement; this is what gets persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledEvidence {
    #[serde(flatten)]
    evidence: Evidence,
    tx_hash: String,
}

impl SettledEvidence {
    pub fn evidence(&self) -> &Evidence {
        &self.evidence
    }

    pub fn tx_hash(&self) -> &str {
        &self.tx_hash
    }

    pub fn request_id(&self) -> Bytes32 {
        self.evidence.request_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PendingRequest {
        PendingRequest {
            request_id: Bytes32::new([7; 32]),
            requester: "0xaaaa".into(),
            reward_token: "0xbbbb".into(),
            reward: "0".into(),
            timestamp: 1_700_000_000,
            identifier: Bytes32::new([9; 32]),
            ancillary_data: b"Is BTC above 50000?".to_vec(),
            settled: false,
            settled_price: 0,
            evidence_hash: Bytes32::ZERO,
        }
    }

    #[test]
    fn test_decision_parse_is_case_insensitive() {
        assert_eq!(Decision::parse("yes"), Some(Decision::Yes));
        assert_eq!(Decision::parse(" No "), Some(Decision::No));
        assert_eq!(Decision::parse("maybe"), None);
        assert_eq!(Decision::parse(""), None);
        assert_eq!(Decision::Yes.price(), 1);
        assert_eq!(Decision::No.price(), 0);
    }

    #[test]
    fn test_manual_evidence_shape() {
        let ev = Evidence::manual(&request(), 42, 1_700_000_100);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["decision"], "OVERRIDE");
        assert_eq!(json["price"], 42);
        assert_eq!(json["settledAt"], 1_700_000_100u64);
        assert_eq!(json["ancillary"], "Is BTC above 50000?");
        assert!(json.get("script").is_none());
        assert!(json.get("txHash").is_none());
    }

    #[test]
    fn test_content_hash_ignores_tx_hash() {
        let ev = Evidence::manual(&request(), 1, 10);
        let hash = ev.content_hash().unwrap();
        let settled = ev.clone().into_settled("0xfeed");
        assert_eq!(settled.evidence().content_hash().unwrap(), hash);
        let json = serde_json::to_value(&settled).unwrap();
        assert_eq!(json["txHash"], "0xfeed");
        assert_eq!(json["decision"], "OVERRIDE");
    }

    #[test]
    fn test_settled_evidence_roundtrip() {
        let settled = Evidence::manual(&request(), 0, 5).into_settled("0x01");
        let json = serde_json::to_string_pretty(&settled).unwrap();
        let back: SettledEvidence = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settled);
        assert_eq!(back.request_id(), Bytes32::new([7; 32]));
    }
}
