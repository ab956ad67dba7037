//! Best-effort structured extraction from free-text answers.
//!
//! The synthesis service has no native clustering primitive, so the bridge
//! asks a natural-language question whose answer should contain a JSON
//! array. This module pulls the first bracketed array substring out of the
//! surrounding prose and parses it. It is deliberately NOT a general parser:
//! when extraction fails, callers fall back to a single catch-all cluster.

use serde_json::Value;

/// Extract and parse the first balanced `[...]` substring in `text`.
///
/// Bracket balancing is string-aware so `["a ] b"]` extracts correctly.
/// Returns `None` when no balanced array exists or the substring is not
/// valid JSON.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    let bytes = text.as_bytes();
    let start = text.find('[')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'[' if !in_string => depth += 1,
            b']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + offset + 1];
                    return match serde_json::from_str::<Value>(candidate) {
                        Ok(Value::Array(items)) => Some(items),
                        _ => None,
                    };
                }
            }
            _ => {}
        }
    }
    None
}

// ─── Tests ────────────────────────────────────────────────────────
