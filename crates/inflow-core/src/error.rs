//! Error taxonomy for source clients.
//!
//! Failures stay local to the component that detects them and surface upward
//! as data (stat counters, error events), never as cross-component panics.

use thiserror::Error;

/// Errors raised by a source client call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Credentials are missing or invalid. Fatal to the `start()` attempt
    /// that observed it; the caller may retry after re-authenticating.
    #[error("source is not authenticated{}", fmt_detail(.0))]
    NotAuthenticated(Option<String>),

    /// The incremental sync cursor was rejected by the service. Recovered
    /// internally: the watcher clears its checkpoint and retries once.
    #[error("sync token invalid, full resync required")]
    SyncTokenInvalid,

    /// Transport-level failure (connection refused, DNS, timeout in the
    /// underlying client). Never fatal to the watcher.
    #[error("network error: {0}")]
    Network(String),

    /// Service-level failure with a status code. Never fatal to the watcher.
    #[error("api error {code}: {message}")]
    Api { code: u32, message: String },
}

impl ClientError {
    /// True when the watcher should clear its checkpoint and resync.
    pub fn is_sync_token_invalid(&self) -> bool {
        matches!(self, Self::SyncTokenInvalid)
    }
}

fn fmt_detail(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(": {d}"),
        None => String::new(),
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_auth_detail() {
        let err = ClientError::NotAuthenticated(Some("token expired".into()));
        assert_eq!(err.to_string(), "source is not authenticated: token expired");
        let bare = ClientError::NotAuthenticated(None);
        assert_eq!(bare.to_string(), "source is not authenticated");
    }

    #[test]
    fn sync_token_invalid_is_detected() {
        assert!(ClientError::SyncTokenInvalid.is_sync_token_invalid());
        assert!(!ClientError::Network("reset".into()).is_sync_token_invalid());
    }

    #[test]
    fn api_error_display() {
        let err = ClientError::Api {
            code: 429,
            message: "rate limit exceeded".into(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("rate limit"));
    }
}
