//! Code generation contract and response hygiene.
//!
//! [`CodeGenerator`] is the seam to whichever model produces resolution
//! scripts. The helpers here are shared by every backend: prompt assembly,
//! fence stripping and the minimal shape check applied before a response is
//! handed to static analysis.

use async_trait::async_trait;
use serde::Serialize;

use crate::analysis::ENTRY_FUNCTION;
use crate::domain::PendingRequest;
use crate::sanitize::SanitizedText;

/// System message sent with every generation request.
pub const SYSTEM_PROMPT: &str = "You are a senior Python developer. Reply with one complete, \
runnable Python script that follows the user's instructions exactly. Return raw code only: no \
markdown, prose or JSON around it. The script must define resolve_oracle() returning a dict \
with the keys 'decision', 'reason' and 'data', and must end with the __main__ guard the user \
describes.";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("model returned empty code block")]
    EmptyResponse,

    #[error("generated code missing {ENTRY_FUNCTION}() definition")]
    MissingEntryPoint,

    #[error("generated code missing execution guard")]
    MissingGuard,

    #[error("generator transport error: {0}")]
    Transport(String),

    #[error("generator returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed generator response: {0}")]
    InvalidResponse(String),
}

/// Request fields the model may use; never carries raw long hex literals.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub request_id: String,
    pub identifier: String,
    pub timestamp: u64,
    /// Sanitized ancillary text.
    pub ancillary: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlaceholderHint {
    pub token: String,
    pub description: String,
    #[serde(rename = "const")]
    pub const_name: String,
}

/// Feedback from a failed attempt, fed into the next generation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PreviousAttempt {
    pub previous_code: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GenerationContext {
    pub request: RequestContext,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub placeholders: Vec<PlaceholderHint>,
    #[serde(skip)]
    pub previous_attempt: Option<PreviousAttempt>,
}

impl GenerationContext {
    pub fn new(request: &PendingRequest, sanitized: &SanitizedText) -> Self {
        Self {
            request: RequestContext {
                request_id: request.request_id.to_prefixed_hex(),
                identifier: request.identifier.to_prefixed_hex(),
                timestamp: request.timestamp,
                ancillary: sanitized.text.clone(),
            },
            placeholders: sanitized
                .placeholders
                .iter()
                .map(|p| PlaceholderHint {
                    token: p.token.clone(),
                    description: p.description.clone(),
                    const_name: p.const_name.clone(),
                })
                .collect(),
            previous_attempt: None,
        }
    }

    pub fn with_previous_attempt(mut self, previous: Option<PreviousAttempt>) -> Self {
        self.previous_attempt = previous;
        self
    }
}

/// Produces Python source for a resolution task.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Return cleaned script source. Implementations apply
    /// [`extract_code`] and [`validate_generated_code`] before returning.
    async fn generate(
        &self,
        task: &str,
        context: &GenerationContext,
    ) -> Result<String, GenerationError>;
}

/// User message for one generation call.
///
/// A retry embeds the failed code and its error; a first attempt embeds the
/// request context as JSON instead.
pub fn build_generation_prompt(task: &str, context: &GenerationContext) -> String {
    if let Some(previous) = &context.previous_attempt {
        return format!(
            "The previous code failed. Generate a corrected version.\n\n\
             Previous code:\n```python\n{}\n```\n\n\
             Error:\n{}\n\n\
             Task: {task}\n\n\
             Generate corrected code that fixes the error. Return only the code, no explanations.",
            previous.previous_code, previous.error
        );
    }

    let context_json = serde_json::to_string_pretty(context).unwrap_or_default();
    format!(
        "Generate a self-contained Python script for the following task.\n\n\
         Task: {task}\n\n\
         Requirements:\n\
         - Handle network and parsing errors\n\
         - Keep comments brief\n\
         - Return only the code, without markdown fences or explanations\n\n\
         Output format: pure Python code only\n\n\
         Context:\n{context_json}"
    )
}

/// Strip markdown fences and surrounding whitespace from a model reply.
pub fn extract_code(response: &str) -> String {
    let mut code = response.trim();

    if let Some(start) = code.find("```") {
        let inner = &code[start + 3..];
        if let Some(end) = inner.find("```") {
            let fenced = &inner[..end];
            code = fenced.strip_prefix("python\n").unwrap_or(fenced);
        }
    }

    for prefix in ["```python", "```py", "```"] {
        if let Some(rest) = code.strip_prefix(prefix) {
            code = rest;
            break;
        }
    }
    code = code.strip_suffix("```").unwrap_or(code);

    code.trim().to_string()
}

/// Reject replies that cannot possibly be a resolution script.
pub fn validate_generated_code(code: &str) -> Result<(), GenerationError> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    if !trimmed.contains(&format!("def {ENTRY_FUNCTION}")) {
        return Err(GenerationError::MissingEntryPoint);
    }
    if !trimmed.contains("__name__") {
        return Err(GenerationError::MissingGuard);
    }
    Ok(())
}
