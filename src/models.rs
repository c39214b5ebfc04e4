// Canonical in-memory shapes for change events, client requests and
// server messages, plus their wire encoding.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The kind of mutation a `ChangeEvent` describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    Drop,
    Rename,
}

/// Logical timestamp from the store: `(epoch-seconds, ordinal)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTimestamp {
    pub t: u32,
    pub i: u32,
}

/// One observed mutation, immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: String,
    #[serde(rename = "operationType")]
    pub operation: OperationType,
    pub database: String,
    pub collection: String,
    #[serde(rename = "documentKey", skip_serializing_if = "Option::is_none")]
    pub document_key: Option<HashMap<String, serde_json::Value>>,
    #[serde(rename = "fullDocument", skip_serializing_if = "Option::is_none")]
    pub full_document: Option<serde_json::Value>,
    #[serde(rename = "updatedFields", skip_serializing_if = "Option::is_none")]
    pub updated_fields: Option<serde_json::Value>,
    #[serde(rename = "removedFields", skip_serializing_if = "Option::is_none")]
    pub removed_fields: Option<Vec<String>>,
    pub timestamp: SourceTimestamp,
    #[serde(rename = "clientTimestamp")]
    pub ingest_timestamp: DateTime<Utc>,
}

/// Options controlling an initial snapshot delivered before live events.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotOptions {
    #[serde(default)]
    pub include_snapshot: bool,
    #[serde(default = "SnapshotOptions::default_limit")]
    pub snapshot_limit: u64,
    #[serde(default = "SnapshotOptions::default_batch_size")]
    pub batch_size: u64,
    #[serde(default)]
    pub snapshot_filter: Option<serde_json::Value>,
    #[serde(default)]
    pub snapshot_sort: Option<serde_json::Value>,
}

impl SnapshotOptions {
    fn default_limit() -> u64 {
        10_000
    }

    fn default_batch_size() -> u64 {
        100
    }
}

/// One active subscriber interest. `collection == ""` means "any
/// collection in that database".
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub client_id: String,
    pub database: String,
    pub collection: String,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn matches(&self, database: &str, collection: &str) -> bool {
        self.database == database && (self.collection.is_empty() || self.collection == collection)
    }
}

/// `{ name, collections }` — one configured database whitelist entry. An
/// empty `collections` list allows any collection in that database.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
    #[serde(default)]
    pub collections: Vec<String>,
}

/// A message received from a connected client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        database: String,
        collection: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(default)]
        snapshot_options: Option<SnapshotOptions>,
    },
    Unsubscribe {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "subscriptionId", default)]
        subscription_id: Option<String>,
    },
    Ping {
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    Health {
        #[serde(rename = "requestId")]
        request_id: String,
    },
}

/// A message sent to a connected client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename = "subscribe")]
    SubscribeAck {
        success: bool,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<SubscribeAckData>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
        error_code: Option<u32>,
    },
    #[serde(rename = "unsubscribe")]
    UnsubscribeAck {
        success: bool,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Change {
        change: ChangeEvent,
    },
    SnapshotStart,
    #[serde(rename = "snapshot")]
    SnapshotBatch {
        #[serde(rename = "snapshot_data")]
        data: Vec<serde_json::Value>,
        #[serde(rename = "snapshot_batch")]
        batch_number: u64,
        #[serde(rename = "snapshot_remaining")]
        remaining: u64,
    },
    SnapshotEnd,
    Error {
        error: String,
        #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
        error_code: Option<u32>,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Pong {
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "health")]
    HealthOk {
        success: bool,
        #[serde(rename = "requestId")]
        request_id: String,
        data: HealthData,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeAckData {
    pub subscription_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthData {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_decodes() {
        let raw = r#"{"type":"subscribe","database":"A","collection":"x","requestId":"r1"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Subscribe {
                database,
                collection,
                request_id,
                snapshot_options,
            } => {
                assert_eq!(database, "A");
                assert_eq!(collection, "x");
                assert_eq!(request_id, "r1");
                assert!(snapshot_options.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unsubscribe_without_id_decodes() {
        let raw = r#"{"type":"unsubscribe","requestId":"r2"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Unsubscribe {
                request_id,
                subscription_id,
            } => {
                assert_eq!(request_id, "r2");
                assert!(subscription_id.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn snapshot_options_defaults() {
        let raw = r#"{"include_snapshot":true}"#;
        let opts: SnapshotOptions = serde_json::from_str(raw).unwrap();
        assert_eq!(opts.snapshot_limit, 10_000);
        assert_eq!(opts.batch_size, 100);
    }

    #[test]
    fn pong_encodes_requestid() {
        let msg = ServerMessage::Pong {
            request_id: Some("r1".into()),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "pong");
        assert_eq!(v["requestId"], "r1");
    }

    #[test]
    fn subscription_matches_any_collection_on_empty_string() {
        let sub = Subscription {
            id: "s1".into(),
            client_id: "c1".into(),
            database: "A".into(),
            collection: "".into(),
            created_at: Utc::now(),
        };
        assert!(sub.matches("A", "x"));
        assert!(sub.matches("A", "y"));
        assert!(!sub.matches("B", "x"));
    }
}
