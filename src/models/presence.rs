//! Presence heartbeat models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key under which the presence document is stored.
pub const PRESENCE_KEY: &str = "presence";

/// Last heartbeat of one user plus the profile snapshot they sent with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    /// Server wall-clock time of the last heartbeat, in epoch milliseconds
    pub last_seen: i64,
    #[serde(default = "empty_profile")]
    pub profile: serde_json::Value,
}

pub fn empty_profile() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// The whole presence document: user identifier to entry.
pub type PresenceDocument = BTreeMap<String, PresenceEntry>;

/// Request body for `POST /api/presence`.
///
/// Fields are kept loose so that a missing or mistyped `userId` is reported
/// as a validation error rather than a body rejection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
    #[serde(default)]
    pub profile: Option<serde_json::Value>,
}

/// Response body for a successful heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ok: bool,
    /// Entries left in the document after pruning
    pub active: usize,
}

/// Response body for `GET /api/presence`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveUsersResponse {
    pub users: PresenceDocument,
}
