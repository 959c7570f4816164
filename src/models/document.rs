//! Stored documents and the shared dashboard state wrapper.

use serde::{Deserialize, Serialize};

/// Key under which the shared dashboard state is stored.
pub const DASHBOARD_KEY: &str = "dashboard";

/// A whole JSON document as held by the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub key: String,
    pub body: serde_json::Value,
    /// Starts at 1 and increments on every successful write
    pub version: i64,
    pub updated_at: String,
}

/// Request body for replacing the dashboard state.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStateRequest {
    /// Opaque dashboard state, stored verbatim
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Expected version for optimistic concurrency control
    #[serde(default)]
    pub expected_version: Option<i64>,
}
