//! PII/content filter applied to every candidate item before it is counted
//! or propagated.
//!
//! The patterns target credential-adjacent mail (password resets, one-time
//! codes, sign-in alerts) that must never reach the downstream synthesis
//! service. Filtered items are counted, never logged with content.

use once_cell::sync::Lazy;
use regex::RegexSet;

static SENSITIVE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)password\s+reset",
        r"(?i)reset\s+your\s+password",
        r"(?i)verification\s+code",
        r"(?i)\b(2FA|MFA|OTP)\b",
        r"(?i)one[\s-]?time\s+(code|passcode|password)",
        r"(?i)security\s+alert",
        r"(?i)sign[\s-]?in\s+attempt",
        r"(?i)new\s+sign[\s-]?in\b",
        r"(?i)confirm\s+your\s+(identity|account)",
        r"(?i)\bssn\b|social\s+security\s+number",
        r"(?i)bank\s+(account|statement)",
        r"(?i)credit\s+card\s+(number|statement)",
    ])
    .expect("sensitive patterns are valid regexes")
});

/// True when the subject or snippet matches a sensitive-content pattern.
pub fn is_sensitive(subject: &str, snippet: &str) -> bool {
    SENSITIVE_PATTERNS.is_match(subject) || SENSITIVE_PATTERNS.is_match(snippet)
}

// ─── Tests ────────────────────────────────────────────────────────
