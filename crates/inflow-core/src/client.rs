//! Async traits at the external-service seam.
//!
//! Concrete OAuth/API semantics live behind these traits; the watchers and
//! the triage categorizer only ever see `check_auth` / `list_changed` /
//! `fetch_summary`. Network timeouts belong to the implementation.

use async_trait::async_trait;

use crate::error::ClientError;
use crate::types::{AuthStatus, ChangeBatch, TriageSummary};

/// Authenticated client exposing "list changed items since checkpoint".
///
/// A `None` checkpoint requests a full (initial) listing. Implementations
/// raise [`ClientError::SyncTokenInvalid`] when the service rejects the
/// cursor, which makes the watcher reset and resync once.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn check_auth(&self) -> Result<AuthStatus, ClientError>;

    async fn list_changed(
        &self,
        checkpoint: Option<&str>,
        max_results: u32,
    ) -> Result<ChangeBatch, ClientError>;
}

/// Client for the issue-tracker notification feed consumed by triage.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Fetch one structured summary (counts per category).
    async fn fetch_summary(&self) -> Result<TriageSummary, ClientError>;

    /// Execute a triage action command (e.g. `mark_read subscribed`).
    async fn execute(&self, command: &str) -> Result<(), ClientError>;
}
