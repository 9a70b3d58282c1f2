//! Log output for resolver binaries.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Line format of the global subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, fields flattened to the top level.
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// `RUST_LOG` when set and valid, `level` otherwise.
fn filter_for(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the process-wide subscriber.
///
/// Returns `false` when a subscriber was already installed; the earlier one
/// stays in effect.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let (text, json) = match LogFormat::from_json_flag(json) {
        LogFormat::Text => (Some(fmt::layer().with_target(false)), None),
        LogFormat::Json => (
            None,
            Some(fmt::layer().with_target(false).json().flatten_event(true)),
        ),
    };
    tracing_subscriber::registry()
        .with(filter_for(level))
        .with(text)
        .with(json)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_rejected() {
        init_tracing(false, Level::INFO);
        assert!(!init_tracing(true, Level::DEBUG));
    }

    #[test]
    fn test_format_from_flag() {
        assert_eq!(LogFormat::from_json_flag(true), LogFormat::Json);
        assert_eq!(LogFormat::from_json_flag(false), LogFormat::default());
    }
}
