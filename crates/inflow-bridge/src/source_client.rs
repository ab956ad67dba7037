//! Source clients backed by the bridge subprocess.
//!
//! The external services are reached through the same helper process that
//! hosts the synthesis service, via per-source methods (`mail_check_auth`,
//! `mail_list_changed`, ...). Raw item payloads come back service-shaped;
//! each client carries a normalizer that maps one raw payload to an [`Item`]
//! so this crate stays ignorant of per-source field layouts.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use inflow_core::client::{SourceClient, TrackerClient};
use inflow_core::error::ClientError;
use inflow_core::types::{AuthStatus, ChangeBatch, Item, SourceKind, TriageSummary};

use crate::channel::{BridgeError, SyncChannel};

/// Maps one service-shaped payload to an [`Item`]. Returns `None` to drop
/// the payload (trashed files, cancelled events, unparseable rows).
pub type Normalizer = fn(&Value) -> Option<Item>;

// ─── Source Client ────────────────────────────────────────────────

/// [`SourceClient`] that proxies `check_auth` / `list_changed` through the
/// bridge subprocess.
#[derive(Clone)]
pub struct BridgeSourceClient {
    channel: SyncChannel,
    source: SourceKind,
    normalize: Normalizer,
}

impl BridgeSourceClient {
    pub fn new(channel: SyncChannel, source: SourceKind, normalize: Normalizer) -> Self {
        Self {
            channel,
            source,
            normalize,
        }
    }

    fn method(&self, suffix: &str) -> String {
        format!("{}_{suffix}", self.source.as_str())
    }
}

#[async_trait]
impl SourceClient for BridgeSourceClient {
    async fn check_auth(&self) -> Result<AuthStatus, ClientError> {
        let result = self
            .channel
            .send_request(&self.method("check_auth"), serde_json::json!({}))
            .await
            .map_err(map_bridge_error)?;
        Ok(AuthStatus {
            authenticated: result["authenticated"].as_bool().unwrap_or(false),
            error: result["error"].as_str().map(String::from),
        })
    }

    async fn list_changed(
        &self,
        checkpoint: Option<&str>,
        max_results: u32,
    ) -> Result<ChangeBatch, ClientError> {
        let result = self
            .channel
            .send_request(
                &self.method("list_changed"),
                serde_json::json!({
                    "checkpoint": checkpoint,
                    "max_results": max_results,
                }),
            )
            .await
            .map_err(map_bridge_error)?;

        let items: Vec<Item> = result["items"]
            .as_array()
            .map(|raw| raw.iter().filter_map(self.normalize).collect())
            .unwrap_or_default();
        let new_checkpoint = result["new_checkpoint"].as_str().map(String::from);
        Ok(ChangeBatch {
            items,
            new_checkpoint,
        })
    }
}

// ─── Tracker Client ───────────────────────────────────────────────

/// [`TrackerClient`] over the bridge (`tracker_fetch_summary`,
/// `tracker_execute`).
#[derive(Clone)]
pub struct BridgeTrackerClient {
    channel: SyncChannel,
}

impl BridgeTrackerClient {
    pub fn new(channel: SyncChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl TrackerClient for BridgeTrackerClient {
    async fn fetch_summary(&self) -> Result<TriageSummary, ClientError> {
        let result = self
            .channel
            .send_request("tracker_fetch_summary", serde_json::json!({}))
            .await
            .map_err(map_bridge_error)?;
        let counts = serde_json::from_value(result["counts"].clone())
            .map_err(|e| ClientError::Network(format!("malformed summary: {e}")))?;
        Ok(TriageSummary {
            counts,
            fetched_at: Some(Utc::now()),
        })
    }

    async fn execute(&self, command: &str) -> Result<(), ClientError> {
        self.channel
            .send_request("tracker_execute", serde_json::json!({ "command": command }))
            .await
            .map_err(map_bridge_error)?;
        Ok(())
    }
}

// ─── Error Mapping ────────────────────────────────────────────────

/// Translate transport failures into the client taxonomy the watchers react
/// to. 410 is the service's "cursor expired" signal and must surface as
/// [`ClientError::SyncTokenInvalid`] so the watcher resyncs.
fn map_bridge_error(err: BridgeError) -> ClientError {
    match err {
        BridgeError::Service { code: 410, .. } => ClientError::SyncTokenInvalid,
        BridgeError::Service {
            code: code @ (401 | 403),
            message,
        } => ClientError::NotAuthenticated(Some(format!("{code}: {message}"))),
        BridgeError::Service { code, message } => ClientError::Api {
            code: u32::try_from(code).unwrap_or(0),
            message,
        },
        other => ClientError::Network(other.to_string()),
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use inflow_core::types::ItemKind;

    fn subject_normalizer(raw: &Value) -> Option<Item> {
        Some(Item {
            id: raw["id"].as_str()?.to_string(),
            kind: ItemKind::Email,
            source: SourceKind::Mail,
            subject: raw["subject"].as_str().unwrap_or_default().to_string(),
            content: String::new(),
            metadata: raw.clone(),
            source_ts: Utc::now(),
        })
    }

    fn channel_with_script(script: &str) -> SyncChannel {
        SyncChannel::new(crate::channel::BridgeConfig::new(
            "sh",
            vec!["-c".into(), script.into()],
        ))
    }

    #[test]
    fn error_mapping_follows_taxonomy() {
        assert_eq!(
            map_bridge_error(BridgeError::Service {
                code: 410,
                message: "sync token expired".into()
            }),
            ClientError::SyncTokenInvalid
        );
        assert!(matches!(
            map_bridge_error(BridgeError::Service {
                code: 401,
                message: "bad token".into()
            }),
            ClientError::NotAuthenticated(Some(_))
        ));
        assert_eq!(
            map_bridge_error(BridgeError::Service {
                code: 429,
                message: "slow down".into()
            }),
            ClientError::Api {
                code: 429,
                message: "slow down".into()
            }
        );
        assert!(matches!(
            map_bridge_error(BridgeError::ChannelClosed),
            ClientError::Network(_)
        ));
        assert!(matches!(
            map_bridge_error(BridgeError::Timeout {
                method: "mail_list_changed".into()
            }),
            ClientError::Network(_)
        ));
    }

    #[tokio::test]
    async fn check_auth_round_trip() {
        let script = r#"read line; printf '{"id":1,"result":{"authenticated":true}}\n'; cat >/dev/null"#;
        let client = BridgeSourceClient::new(
            channel_with_script(script),
            SourceKind::Mail,
            subject_normalizer,
        );
        let status = client.check_auth().await.expect("check_auth");
        assert!(status.authenticated);
        assert!(status.error.is_none());
        client.channel.stop().await;
    }

    #[tokio::test]
    async fn list_changed_normalizes_and_advances_checkpoint() {
        let script = r#"read line; printf '{"id":1,"result":{"items":[{"id":"m1","subject":"hello"},{"broken":true}],"new_checkpoint":"cp-2"}}\n'; cat >/dev/null"#;
        let client = BridgeSourceClient::new(
            channel_with_script(script),
            SourceKind::Mail,
            subject_normalizer,
        );
        let batch = client.list_changed(Some("cp-1"), 20).await.expect("list");
        assert_eq!(batch.items.len(), 1);
        assert_eq!(batch.items[0].id, "m1");
        assert_eq!(batch.items[0].subject, "hello");
        assert_eq!(batch.new_checkpoint.as_deref(), Some("cp-2"));
        client.channel.stop().await;
    }

    #[tokio::test]
    async fn expired_cursor_surfaces_as_sync_token_invalid() {
        let script = r#"read line; printf '{"id":1,"error":{"code":410,"message":"sync token expired"}}\n'; cat >/dev/null"#;
        let client = BridgeSourceClient::new(
            channel_with_script(script),
            SourceKind::Calendar,
            subject_normalizer,
        );
        let err = client.list_changed(Some("stale"), 10).await.unwrap_err();
        assert!(err.is_sync_token_invalid());
        client.channel.stop().await;
    }

    #[tokio::test]
    async fn tracker_summary_parses_counts() {
        let script = r#"read line; printf '{"id":1,"result":{"counts":{"ci_failures":2,"subscribed":7}}}\n'; cat >/dev/null"#;
        let client = BridgeTrackerClient::new(channel_with_script(script));
        let summary = client.fetch_summary().await.expect("summary");
        assert_eq!(summary.count("ci_failures"), 2);
        assert_eq!(summary.count("subscribed"), 7);
        assert_eq!(summary.count("mentions"), 0);
        assert!(summary.fetched_at.is_some());
        client.channel.stop().await;
    }
}
