//! Higher-level synthesis calls built on the sync channel.
//!
//! Method names follow the wrapped notebook service: `ask_question`,
//! `add_source`, `remove_source`, `list_notebooks`, `select_notebook`,
//! `cleanup_expired`. Clustering has no native primitive and is emulated
//! with one natural-language query plus best-effort array extraction.

use serde::{Deserialize, Serialize};

use inflow_core::types::{CleanupReport, Item};

use crate::channel::{BridgeError, SyncChannel};
use crate::extract::extract_json_array;

/// Label used for the catch-all cluster when extraction fails.
const FALLBACK_CLUSTER_LABEL: &str = "uncategorized";

// ─── Result Types ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextAnswer {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCluster {
    pub label: String,
    pub item_ids: Vec<String>,
}

// ─── Synthesizer ──────────────────────────────────────────────────

/// Typed facade over the sync channel for the synthesis service.
#[derive(Clone)]
pub struct Synthesizer {
    channel: SyncChannel,
}

impl Synthesizer {
    pub fn new(channel: SyncChannel) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &SyncChannel {
        &self.channel
    }

    /// Ask the service a question over the synced corpus.
    pub async fn query_context(&self, question: &str) -> Result<ContextAnswer, BridgeError> {
        let result = self
            .channel
            .send_request("ask_question", serde_json::json!({ "question": question }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Push one item into the service's source corpus.
    pub async fn add_source(&self, item: &Item) -> Result<(), BridgeError> {
        self.channel
            .send_request(
                "add_source",
                serde_json::json!({
                    "id": item.id,
                    "title": item.subject,
                    "content": item.content,
                    "kind": item.kind,
                    "metadata": item.metadata,
                    "timestamp": item.source_ts.to_rfc3339(),
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn remove_source(&self, source_id: &str) -> Result<(), BridgeError> {
        self.channel
            .send_request("remove_source", serde_json::json!({ "id": source_id }))
            .await?;
        Ok(())
    }

    pub async fn list_notebooks(&self) -> Result<Vec<Notebook>, BridgeError> {
        let result = self
            .channel
            .send_request("list_notebooks", serde_json::json!({}))
            .await?;
        let notebooks = result
            .get("notebooks")
            .cloned()
            .unwrap_or(serde_json::Value::Array(Vec::new()));
        Ok(serde_json::from_value(notebooks)?)
    }

    pub async fn select_notebook(&self, notebook_id: &str) -> Result<(), BridgeError> {
        self.channel
            .send_request("select_notebook", serde_json::json!({ "id": notebook_id }))
            .await?;
        Ok(())
    }

    /// Group items by theme using one natural-language query.
    ///
    /// Transport errors propagate; a malformed answer falls back to a single
    /// catch-all cluster holding every item (documented best-effort).
    pub async fn cluster_items(&self, items: &[Item]) -> Result<Vec<ItemCluster>, BridgeError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let listing: Vec<String> = items
            .iter()
            .map(|i| format!("{}: {}", i.id, i.subject))
            .collect();
        let question = format!(
            "Group the following items into thematic clusters. Respond with a JSON \
             array of objects with \"label\" and \"item_ids\" fields only.\n{}",
            listing.join("\n")
        );
        let answer = self.query_context(&question).await?;
        Ok(parse_clusters(&answer.answer, items))
    }

    /// Delegate age-based retention to the service and report counts rather
    /// than erroring.
    pub async fn cleanup_expired_sources(
        &self,
        max_age_hours: u32,
    ) -> Result<CleanupReport, BridgeError> {
        let result = self
            .channel
            .send_request(
                "cleanup_expired",
                serde_json::json!({ "max_age_hours": max_age_hours }),
            )
            .await?;
        Ok(CleanupReport {
            deleted: result["deleted"].as_u64().unwrap_or(0),
            failed: result["failed"].as_u64().unwrap_or(0),
            verified: result["verified"].as_u64().unwrap_or(0),
        })
    }
}

/// Parse clusters out of a free-text answer, falling back to one catch-all
/// cluster when no usable array can be extracted.
fn parse_clusters(answer: &str, items: &[Item]) -> Vec<ItemCluster> {
    if let Some(raw) = extract_json_array(answer) {
        let clusters: Vec<ItemCluster> = raw
            .iter()
            .filter_map(|entry| {
                let label = entry
                    .get("label")
                    .or_else(|| entry.get("name"))
                    .and_then(|v| v.as_str())?
                    .to_string();
                let item_ids = entry
                    .get("item_ids")
                    .or_else(|| entry.get("items"))
                    .and_then(|v| v.as_array())
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|id| id.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                Some(ItemCluster { label, item_ids })
            })
            .collect();
        if !clusters.is_empty() {
            return clusters;
        }
    }

    tracing::debug!("cluster extraction failed, using catch-all cluster");
    vec![ItemCluster {
        label: FALLBACK_CLUSTER_LABEL.to_string(),
        item_ids: items.iter().map(|i| i.id.clone()).collect(),
    }]
}

// ─── Tests ────────────────────────────────────────────────────────
