//! Placeholder sanitization of ancillary text.
//!
//! Long hexadecimal literals (`0x` followed by 32 or more hex digits) are
//! swapped for opaque tokens before the text reaches the code generator, and
//! swapped back into whatever source the generator returns.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

const LONG_HEX_PATTERN: &str = r"0x[0-9a-fA-F]{32,}";

fn long_hex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(LONG_HEX_PATTERN).expect("static pattern compiles"))
}

/// One masked literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placeholder {
    /// Marker inserted into the sanitized text, e.g. `__PLACEHOLDER_HEX_1__`.
    pub token: String,
    /// The original literal.
    pub value: String,
    pub description: String,
    /// Module-level constant the generated script should bind the token to.
    pub const_name: String,
}

impl Placeholder {
    fn new(index: usize, literal: &str) -> Self {
        // Matches are pure ASCII, so byte slicing is safe.
        let description = if literal.len() > 20 {
            format!(
                "{}…{} (length {})",
                &literal[..10],
                &literal[literal.len() - 6..],
                literal.len()
            )
        } else {
            literal.to_string()
        };
        Self {
            token: format!("__PLACEHOLDER_HEX_{index}__"),
            value: literal.to_string(),
            description,
            const_name: format!("PLACEHOLDER_HEX_{index}"),
        }
    }
}

/// Result of [`sanitize_ancillary`]; valid for a single prepare attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedText {
    pub text: String,
    pub placeholders: Vec<Placeholder>,
}

impl SanitizedText {
    pub fn is_masked(&self) -> bool {
        !self.placeholders.is_empty()
    }

    pub fn placeholder(&self, token: &str) -> Option<&Placeholder> {
        self.placeholders.iter().find(|p| p.token == token)
    }

    /// Replace every token occurrence in `source` with its original literal.
    pub fn restore(&self, source: &str) -> String {
        restore_placeholders(source, &self.placeholders)
    }
}

/// Mask every long hex literal in `text`.
pub fn sanitize_ancillary(text: &str) -> SanitizedText {
    let mut placeholders = Vec::new();
    let sanitized = long_hex().replace_all(text, |caps: &regex::Captures<'_>| {
        let placeholder = Placeholder::new(placeholders.len() + 1, &caps[0]);
        let token = placeholder.token.clone();
        placeholders.push(placeholder);
        token
    });
    SanitizedText {
        text: sanitized.into_owned(),
        placeholders,
    }
}

/// Inverse of [`sanitize_ancillary`] for any text that carries its tokens.
pub fn restore_placeholders(source: &str, placeholders: &[Placeholder]) -> String {
    placeholders
        .iter()
        .fold(source.to_string(), |acc, p| acc.replace(&p.token, &p.value))
}
