//! Oracle request types as exposed by the on-chain contract.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::ValidationError;

/// A 32-byte word (`bytes32` on-chain), rendered as `0x`-prefixed lowercase hex.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bytes32([u8; 32]);

impl Bytes32 {
    pub const ZERO: Bytes32 = Bytes32([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without the `0x` prefix (used for file names).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Lowercase hex with the `0x` prefix.
    pub fn to_prefixed_hex(&self) -> String {
        format!("0x{}", self.to_hex())
    }

    /// First 10 hex chars, for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..10].to_string()
    }
}

impl From<[u8; 32]> for Bytes32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_prefixed_hex())
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes32(0x{})", self.short())
    }
}

impl FromStr for Bytes32 {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(trimmed).map_err(|_| ValidationError::InvalidBytes32(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(ValidationError::InvalidBytes32(s.to_string()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Serialize for Bytes32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_prefixed_hex())
    }
}

impl<'de> Deserialize<'de> for Bytes32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Key of an oracle request on the contract.
pub type RequestId = Bytes32;

/// `0x`-hex (de)serialization for raw byte payloads such as ancillary data.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}

/// A price question as stored by the oracle contract. Read-only to the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub requester: String,
    pub reward_token: String,
    /// Decimal `uint256`.
    pub reward: String,
    /// Resolution deadline in seconds since the epoch.
    pub timestamp: u64,
    pub identifier: Bytes32,
    #[serde(with = "hex_bytes")]
    pub ancillary_data: Vec<u8>,
    pub settled: bool,
    pub settled_price: i64,
    pub evidence_hash: Bytes32,
}

impl PendingRequest {
    /// Ancillary data as text; falls back to lowercase hex when it is not UTF-8.
    pub fn ancillary_text(&self) -> String {
        decode_ancillary(&self.ancillary_data)
    }

    /// Earliest chain time at which the request may be settled.
    pub fn settle_after(&self, grace_secs: u64) -> u64 {
        self.timestamp.saturating_add(grace_secs)
    }
}

pub fn decode_ancillary(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => hex::encode(data),
    }
}
