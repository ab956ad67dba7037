//! Cloud-file-store watcher: change normalization for the drive source.
//!
//! Drive changes use an opaque page-token checkpoint supplied by the service;
//! trashed files are dropped during translation (a removal is not a
//! dashboard item).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use inflow_core::client::SourceClient;
use inflow_core::error::ClientError;
use inflow_core::types::{Item, ItemKind, SourceKind, WatcherConfig, WatcherEvent};

use crate::watcher::{Watcher, WatcherHandle};

pub const SOURCE: SourceKind = SourceKind::Drive;

pub fn default_config() -> WatcherConfig {
    WatcherConfig {
        poll_interval_ms: 120_000,
        idle_poll_interval_ms: 600_000,
        idle_threshold_ms: 300_000,
        max_results: 20,
    }
}

/// Normalize a raw file-change payload into an [`Item`].
///
/// Expected shape: `{ "id", "name", "mimeType", "modifiedTime", "trashed",
/// "webViewLink", "description" }`. Returns `None` for payloads without an
/// id and for trashed files.
pub fn translate_change(raw: &serde_json::Value) -> Option<Item> {
    let id = raw["id"].as_str()?;
    if raw["trashed"].as_bool().unwrap_or(false) {
        return None;
    }
    let name = raw["name"].as_str().unwrap_or("(untitled file)");
    let description = raw["description"].as_str().unwrap_or("");

    let source_ts = raw["modifiedTime"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Some(Item {
        id: format!("drive-{id}"),
        kind: ItemKind::File,
        source: SOURCE,
        subject: name.to_string(),
        content: description.to_string(),
        metadata: serde_json::json!({
            "mime_type": raw["mimeType"].as_str().unwrap_or("application/octet-stream"),
            "link": raw.get("webViewLink").cloned().unwrap_or(serde_json::Value::Null),
        }),
        source_ts,
    })
}

pub async fn start(
    client: Arc<dyn SourceClient>,
    config: WatcherConfig,
    initial_checkpoint: Option<String>,
    events: mpsc::Sender<WatcherEvent>,
) -> Result<WatcherHandle, ClientError> {
    Watcher::start(SOURCE, client, config, initial_checkpoint, events).await
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn translate_full_change() {
        let raw = json!({
            "id": "1x9",
            "name": "Roadmap.docx",
            "mimeType": "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            "modifiedTime": "2026-08-01T10:30:00Z",
            "webViewLink": "https://files.example.com/1x9",
        });
        let item = translate_change(&raw).expect("translate");
        assert_eq!(item.id, "drive-1x9");
        assert_eq!(item.kind, ItemKind::File);
        assert_eq!(item.subject, "Roadmap.docx");
        assert_eq!(
            item.metadata["link"],
            "https://files.example.com/1x9"
        );
        assert_eq!(item.source_ts.to_rfc3339(), "2026-08-01T10:30:00+00:00");
    }

    #[test]
    fn trashed_files_are_dropped() {
        let raw = json!({"id": "t1", "name": "old", "trashed": true});
        assert!(translate_change(&raw).is_none());
    }

    #[test]
    fn translate_defaults_missing_fields() {
        let item = translate_change(&json!({"id": "f"})).expect("translate");
        assert_eq!(item.subject, "(untitled file)");
        assert_eq!(item.metadata["mime_type"], "application/octet-stream");
    }

    #[test]
    fn translate_rejects_missing_id() {
        assert!(translate_change(&json!({"name": "nope"})).is_none());
    }
}
