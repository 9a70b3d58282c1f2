//! Oracle-HTTP: network adapters for the oracle resolver
//!
//! - `OpenAiGenerator`: `CodeGenerator` over any OpenAI-compatible
//!   `/chat/completions` endpoint (hosted APIs, Ollama, vLLM)
//! - `RelayClient`: `RequestSource` + `SettlementSink` over the oracle
//!   relay's REST API, which fronts the contract and the signing account

mod error;
pub mod generator;
pub mod relay;

pub use error::HttpError;
pub use generator::{GeneratorConfig, OpenAiGenerator};
pub use relay::{RelayClient, RelayConfig};

/// Result type for adapter construction
pub type Result<T> = std::result::Result<T, HttpError>;

/// Read `key` through `lookup`, treating blank values as unset.
pub(crate) fn setting(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn parse_setting<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>> {
    match setting(lookup, key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| HttpError::InvalidSetting { key, value }),
    }
}
