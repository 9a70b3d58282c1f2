//! Task text handed to the code generator for one oracle question.

use crate::sanitize::SanitizedText;

const BASE_RULES: &[&str] = &[
    "You are writing a Python script that answers an oracle question.",
    "Follow these rules exactly:",
    "1. Decide whether the answer is YES or NO.",
    "2. If the question names a data source (URL, API or dataset), fetch it with the 'requests' library and parse the value you need (JSON or CSV as appropriate).",
    "3. Handle HTTP and network failures: retry a failed request once, and return a NO decision with a clear reason if the data cannot be fetched or parsed.",
    "4. Define a function `resolve_oracle()` taking no arguments that returns a dict with the keys:",
    "   - decision: 'YES' or 'NO'",
    "   - reason: a short human-readable explanation",
    "   - data: optional supporting values such as the observed price",
    "5. KEEP EVERY STRING LITERAL, ESPECIALLY URLS, ON ONE LINE AND IN DOUBLE QUOTES.",
    "6. Never split a URL across lines.",
    "7. When the question gives a numeric threshold (for example 'above 110570'), convert it to float and compare it with the observed value. Equality meets the threshold for 'above' and 'at or above'.",
    "8. Read JSON keys case-insensitively (for example `price` or `Price`). If a `timestamp` field is missing but an ISO 8601 `Time` field exists, parse it with `datetime.fromisoformat(value.replace('Z', '+00:00'))` and convert it to an integer UNIX epoch via `.timestamp()`.",
    "9. Put all imports at the top of the file, including `from datetime import datetime`. Do not use any module you have not imported.",
    "10. Only answer NO when the evidence requires it or the data source is unavailable.",
    "11. End the script with:",
    "   if __name__ == \"__main__\":",
    "       import json",
    "       result = resolve_oracle()",
    "       print(json.dumps(result))",
    "12. Use only the standard library plus 'requests', 'json', 'datetime' and 'time'.",
    "13. Output raw Python only: no markdown fences, explanations or JSON wrappers.",
    "14. Do not claim you lack network access; the script will be executed.",
    "15. Return complete runnable code with every string and function closed.",
];

/// Assemble the generation task for a sanitized question.
///
/// When literals were masked, extra rules instruct the model to bind each
/// token to a module-level constant so the restored script carries the
/// original value in exactly one place.
pub fn build_resolution_task(sanitized: &SanitizedText) -> String {
    let mut lines: Vec<String> = BASE_RULES.iter().map(|s| s.to_string()).collect();

    if sanitized.is_masked() {
        lines.push(
            "16. Use the placeholder tokens below exactly as written. Never try to guess or rebuild the value behind a token.".to_string(),
        );
        lines.push(
            "17. Start the script by declaring these module-level constants verbatim, then refer to the constants in your code:".to_string(),
        );
        for p in &sanitized.placeholders {
            lines.push(format!(
                "   {} = \"{}\"  # {}",
                p.const_name, p.token, p.description
            ));
        }
        lines.push(
            "18. Wherever a token's value is needed, use its constant instead of inlining the token.".to_string(),
        );
    }

    lines.push("Oracle question:".to_string());
    lines.push(sanitized.text.clone());

    let mut task = lines.join("\n");
    task.push('\n');
    task
}
