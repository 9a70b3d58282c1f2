//! REST client for the oracle relay.
//!
//! The relay fronts the contract and holds the signing key. It is the only
//! signer, so it assigns nonces and orders settlements from every resolver
//! process; `SettlementQueue` only serializes callers inside one process.
//!
//! | method | path                 | body / response                    |
//! |--------|----------------------|------------------------------------|
//! | GET    | `/requests/pending`  | `{"requestIds": ["0x..", ...]}`    |
//! | GET    | `/requests/{id}`     | `PendingRequest` (404 when absent) |
//! | GET    | `/chain/time`        | `{"timestamp": 1700000000}`        |
//! | POST   | `/settlements`       | `SettlementCall` -> receipt        |

use std::time::Duration;

use async_trait::async_trait;
use oracle_core::chain::{
    ChainError, ChainResult, RequestSource, SettlementCall, SettlementReceipt, SettlementSink,
};
use oracle_core::domain::{PendingRequest, RequestId};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{parse_setting, setting, HttpError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub base_url: String,
    pub token: Option<String>,
    /// Per-request timeout; settlement waits for the receipt.
    pub timeout_secs: u64,
}

impl RelayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout_secs: 120,
        }
    }

    /// Create config from `ORACLE_RELAY_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = setting(&lookup, "ORACLE_RELAY_URL")
            .ok_or(HttpError::MissingSetting("ORACLE_RELAY_URL"))?;
        let mut config = Self::new(base_url);
        config.token = setting(&lookup, "ORACLE_RELAY_TOKEN");
        if let Some(secs) = parse_setting(&lookup, "ORACLE_RELAY_TIMEOUT")? {
            config.timeout_secs = secs;
        }
        Ok(config)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingIds {
    request_ids: Vec<RequestId>,
}

#[derive(Debug, Deserialize)]
struct ChainTime {
    timestamp: u64,
}

/// [`RequestSource`] and [`SettlementSink`] over the relay API.
pub struct RelayClient {
    config: RelayConfig,
    http_client: reqwest::Client,
}

impl RelayClient {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("oracle-http/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(RelayConfig::from_env()?)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ChainResult<T> {
        let request = self.authorize(self.http_client.get(self.config.url(path)));
        let response = request.send().await.map_err(transport)?;
        decode(response).await
    }
}

fn transport(err: reqwest::Error) -> ChainError {
    ChainError::Transport(err.to_string())
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ChainResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ChainError::Http {
            status: status.as_u16(),
            body,
        });
    }
    response
        .json()
        .await
        .map_err(|e| ChainError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl RequestSource for RelayClient {
    async fn pending_request_ids(&self) -> ChainResult<Vec<RequestId>> {
        let ids: PendingIds = self.get_json("/requests/pending").await?;
        debug!(count = ids.request_ids.len(), "pending ids from relay");
        Ok(ids.request_ids)
    }

    async fn fetch_request(&self, id: &RequestId) -> ChainResult<PendingRequest> {
        let path = format!("/requests/{id}");
        let request = self.authorize(self.http_client.get(self.config.url(&path)));
        let response = request.send().await.map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ChainError::NotFound(*id));
        }
        let fetched: PendingRequest = decode(response).await?;
        if fetched.request_id != *id {
            return Err(ChainError::InvalidResponse(format!(
                "asked for {id}, relay returned {}",
                fetched.request_id
            )));
        }
        Ok(fetched)
    }

    async fn current_timestamp(&self) -> ChainResult<u64> {
        let time: ChainTime = self.get_json("/chain/time").await?;
        Ok(time.timestamp)
    }
}

#[async_trait]
impl SettlementSink for RelayClient {
    async fn submit_settlement(&self, call: &SettlementCall) -> ChainResult<SettlementReceipt> {
        let request = self.authorize(
            self.http_client
                .post(self.config.url("/settlements"))
                .json(call),
        );
        let response = request.send().await.map_err(transport)?;
        decode(response).await
    }
}
