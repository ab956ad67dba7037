//! Mailbox watcher: folder allow-list scoping and message normalization.
//!
//! The mail service reports messages with a folder label and an epoch-millis
//! internal date. The `watched_folders` allow-list (an aggregator-level
//! config) is applied here by wrapping the source client, so the generic
//! watcher never learns about folders.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use inflow_core::client::SourceClient;
use inflow_core::error::ClientError;
use inflow_core::types::{
    AuthStatus, ChangeBatch, Item, ItemKind, SourceKind, WatcherConfig, WatcherEvent,
};

use crate::watcher::{Watcher, WatcherHandle};

pub const SOURCE: SourceKind = SourceKind::Mail;

pub fn default_config() -> WatcherConfig {
    WatcherConfig {
        poll_interval_ms: 60_000,
        idle_poll_interval_ms: 300_000,
        idle_threshold_ms: 300_000,
        max_results: 20,
    }
}

/// Normalize a raw mailbox message payload into an [`Item`].
///
/// Expected shape (service-specific, unknown fields ignored):
/// `{ "id", "subject", "snippet", "folder", "labels", "internal_date" }`.
/// Returns `None` for payloads without an id.
pub fn translate_message(raw: &serde_json::Value) -> Option<Item> {
    let id = raw["id"].as_str()?;
    let subject = raw["subject"].as_str().unwrap_or("(no subject)");
    let snippet = raw["snippet"].as_str().unwrap_or("");
    let folder = raw["folder"].as_str().unwrap_or("INBOX");

    let source_ts = raw["internal_date"]
        .as_i64()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Some(Item {
        id: format!("mail-{id}"),
        kind: ItemKind::Email,
        source: SOURCE,
        subject: subject.to_string(),
        content: snippet.to_string(),
        metadata: serde_json::json!({
            "folder": folder,
            "labels": raw.get("labels").cloned().unwrap_or(serde_json::Value::Null),
        }),
        source_ts,
    })
}

/// Client decorator restricting results to an allow-list of folders.
/// An empty allow-list admits everything.
pub struct FolderScopedClient {
    inner: Arc<dyn SourceClient>,
    watched_folders: Vec<String>,
}

impl FolderScopedClient {
    pub fn new(inner: Arc<dyn SourceClient>, watched_folders: Vec<String>) -> Self {
        Self {
            inner,
            watched_folders,
        }
    }

    fn admits(&self, item: &Item) -> bool {
        if self.watched_folders.is_empty() {
            return true;
        }
        let folder = item.metadata["folder"].as_str().unwrap_or("");
        self.watched_folders
            .iter()
            .any(|f| f.eq_ignore_ascii_case(folder))
    }
}

#[async_trait]
impl SourceClient for FolderScopedClient {
    async fn check_auth(&self) -> Result<AuthStatus, ClientError> {
        self.inner.check_auth().await
    }

    async fn list_changed(
        &self,
        checkpoint: Option<&str>,
        max_results: u32,
    ) -> Result<ChangeBatch, ClientError> {
        let mut batch = self.inner.list_changed(checkpoint, max_results).await?;
        batch.items.retain(|item| self.admits(item));
        Ok(batch)
    }
}

/// Start the mail watcher, applying the folder allow-list when present.
pub async fn start(
    client: Arc<dyn SourceClient>,
    config: WatcherConfig,
    watched_folders: Vec<String>,
    initial_checkpoint: Option<String>,
    events: mpsc::Sender<WatcherEvent>,
) -> Result<WatcherHandle, ClientError> {
    let client: Arc<dyn SourceClient> = if watched_folders.is_empty() {
        client
    } else {
        Arc::new(FolderScopedClient::new(client, watched_folders))
    };
    Watcher::start(SOURCE, client, config, initial_checkpoint, events).await
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn translate_full_message() {
        let raw = json!({
            "id": "18f2a",
            "subject": "Standup notes",
            "snippet": "yesterday we shipped",
            "folder": "INBOX",
            "labels": ["INBOX", "IMPORTANT"],
            "internal_date": 1714000000000i64,
        });
        let item = translate_message(&raw).expect("translate");
        assert_eq!(item.id, "mail-18f2a");
        assert_eq!(item.kind, ItemKind::Email);
        assert_eq!(item.subject, "Standup notes");
        assert_eq!(item.content, "yesterday we shipped");
        assert_eq!(item.metadata["folder"], "INBOX");
        assert_eq!(item.source_ts.timestamp_millis(), 1714000000000);
    }

    #[test]
    fn translate_defaults_missing_fields() {
        let raw = json!({"id": "abc"});
        let item = translate_message(&raw).expect("translate");
        assert_eq!(item.subject, "(no subject)");
        assert_eq!(item.content, "");
        assert_eq!(item.metadata["folder"], "INBOX");
    }

    #[test]
    fn translate_rejects_missing_id() {
        assert!(translate_message(&json!({"subject": "no id"})).is_none());
    }

    #[tokio::test]
    async fn folder_scoping_filters_batch() {
        use async_trait::async_trait;

        struct Fixed;

        #[async_trait]
        impl SourceClient for Fixed {
            async fn check_auth(&self) -> Result<AuthStatus, ClientError> {
                Ok(AuthStatus {
                    authenticated: true,
                    error: None,
                })
            }

            async fn list_changed(
                &self,
                _checkpoint: Option<&str>,
                _max_results: u32,
            ) -> Result<ChangeBatch, ClientError> {
                let items = ["INBOX", "Promotions", "Work"]
                    .iter()
                    .enumerate()
                    .map(|(i, folder)| {
                        translate_message(&json!({
                            "id": format!("m{i}"),
                            "subject": "hi",
                            "folder": folder,
                        }))
                        .expect("translate")
                    })
                    .collect();
                Ok(ChangeBatch {
                    items,
                    new_checkpoint: Some("c".into()),
                })
            }
        }

        let scoped = FolderScopedClient::new(
            Arc::new(Fixed),
            vec!["inbox".to_string(), "Work".to_string()],
        );
        let batch = scoped.list_changed(None, 10).await.expect("list");
        let folders: Vec<&str> = batch
            .items
            .iter()
            .map(|i| i.metadata["folder"].as_str().unwrap_or(""))
            .collect();
        assert_eq!(folders, vec!["INBOX", "Work"]);
    }

    #[tokio::test]
    async fn empty_allow_list_admits_everything() {
        let item = translate_message(&json!({"id": "x", "folder": "Anything"})).expect("translate");
        let scoped = FolderScopedClient::new(Arc::new(NoopClient), Vec::new());
        assert!(scoped.admits(&item));
    }

    struct NoopClient;

    #[async_trait]
    impl SourceClient for NoopClient {
        async fn check_auth(&self) -> Result<AuthStatus, ClientError> {
            Ok(AuthStatus {
                authenticated: true,
                error: None,
            })
        }

        async fn list_changed(
            &self,
            _checkpoint: Option<&str>,
            _max_results: u32,
        ) -> Result<ChangeBatch, ClientError> {
            Ok(ChangeBatch {
                items: Vec::new(),
                new_checkpoint: None,
            })
        }
    }
}
