//! Decision extraction from script stdout.

use serde_json::Value;

use crate::domain::Decision;

/// Parsed `{decision, reason, data}` payload of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptVerdict {
    pub decision: Decision,
    pub reason: String,
    pub data: Option<Value>,
}

/// Why a payload could not be turned into a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    /// No stdout line parsed as JSON.
    Missing,
    /// The payload is not an object or lacks a `decision` field.
    NoDecision,
    /// `decision` was present but not YES/NO.
    InvalidDecision(String),
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadError::Missing => write!(f, "no JSON result line in stdout"),
            PayloadError::NoDecision => write!(f, "result payload has no decision field"),
            PayloadError::InvalidDecision(raw) => {
                write!(f, "decision must be YES or NO, got {raw:?}")
            }
        }
    }
}

/// Scan stdout from the last line to the first; the first line that parses
/// as JSON is the result payload.
pub fn extract_json_payload(stdout: &str) -> Option<Value> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .rev()
        .find_map(|line| serde_json::from_str::<Value>(line).ok())
}

/// Extract and validate the verdict printed by a script.
pub fn parse_verdict(stdout: &str) -> Result<ScriptVerdict, PayloadError> {
    let payload = extract_json_payload(stdout).ok_or(PayloadError::Missing)?;
    let object = payload.as_object().ok_or(PayloadError::NoDecision)?;
    let raw = object.get("decision").ok_or(PayloadError::NoDecision)?;

    let raw_text = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let decision =
        Decision::parse(&raw_text).ok_or_else(|| PayloadError::InvalidDecision(raw_text.clone()))?;

    let reason = match object.get("reason") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let data = object.get("data").filter(|v| !v.is_null()).cloned();

    Ok(ScriptVerdict {
        decision,
        reason,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_json_line_wins_after_noise() {
        let stdout = "fetching...\nstatus 200\nnot json {\n{\"decision\":\"yes\",\"reason\":\"ok\"}\n";
        let verdict = parse_verdict(stdout).unwrap();
        assert_eq!(verdict.decision, Decision::Yes);
        assert_eq!(verdict.reason, "ok");
        assert!(verdict.data.is_none());
    }

    #[test]
    fn test_scan_is_bottom_up() {
        let stdout = "{\"decision\":\"NO\",\"reason\":\"first\"}\n{\"decision\":\"YES\",\"reason\":\"last\"}\ntrailing text";
        let verdict = parse_verdict(stdout).unwrap();
        assert_eq!(verdict.decision, Decision::Yes);
        assert_eq!(verdict.reason, "last");
    }

    #[test]
    fn test_data_is_carried() {
        let stdout = r#"{"decision":"No","reason":"below","data":{"price":49000.5}}"#;
        let verdict = parse_verdict(stdout).unwrap();
        assert_eq!(verdict.decision, Decision::No);
        assert_eq!(verdict.data.unwrap()["price"], 49000.5);
    }

    #[test]
    fn test_invalid_payloads() {
        assert_eq!(parse_verdict("hello\nworld"), Err(PayloadError::Missing));
        assert_eq!(parse_verdict(""), Err(PayloadError::Missing));
        assert_eq!(parse_verdict("[1,2]"), Err(PayloadError::NoDecision));
        assert_eq!(
            parse_verdict(r#"{"reason":"no decision"}"#),
            Err(PayloadError::NoDecision)
        );
        assert_eq!(
            parse_verdict(r#"{"decision":"MAYBE"}"#),
            Err(PayloadError::InvalidDecision("MAYBE".into()))
        );
    }

    #[test]
    fn test_bare_number_line_is_json() {
        // A trailing numeric line is valid JSON and shadows the real payload.
        let stdout = "{\"decision\":\"YES\",\"reason\":\"x\"}\n42";
        assert_eq!(parse_verdict(stdout), Err(PayloadError::NoDecision));
    }
}
