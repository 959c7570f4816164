//! Presence tracking over a single shared document.
//!
//! Clients send heartbeats; a user counts as active while their last
//! heartbeat is at most [`STALE_THRESHOLD_MS`] old. Reads filter stale
//! entries without writing. Heartbeats prune stale entries and save the
//! document with a version-checked write, re-reading and re-applying on
//! conflict so that concurrent heartbeats never drop each other.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::db::DocumentStore;
use crate::errors::AppError;
use crate::models::{empty_profile, PresenceDocument, PresenceEntry, PRESENCE_KEY};

/// Silence, in milliseconds, after which a user is no longer active.
pub const STALE_THRESHOLD_MS: i64 = 90_000;

/// Source of server wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Whether an entry last seen at `entry.last_seen` is still active at `now`.
pub fn is_active(entry: &PresenceEntry, now: i64) -> bool {
    now.saturating_sub(entry.last_seen) <= STALE_THRESHOLD_MS
}

/// Copy of the active entries of `document` as observed at `now`.
pub fn active_entries(document: &PresenceDocument, now: i64) -> PresenceDocument {
    document
        .iter()
        .filter(|(_, entry)| is_active(entry, now))
        .map(|(user, entry)| (user.clone(), entry.clone()))
        .collect()
}

/// Interpret a stored body as a presence document.
///
/// Anything that is not an object reads as empty, and entries that do not
/// parse are dropped, so a damaged document heals on the next heartbeat.
pub fn parse_document(body: &Value) -> PresenceDocument {
    let Some(map) = body.as_object() else {
        tracing::warn!("Presence document is not an object, treating it as empty");
        return PresenceDocument::new();
    };

    map.iter()
        .filter_map(
            |(user, raw)| match serde_json::from_value::<PresenceEntry>(raw.clone()) {
                Ok(entry) => Some((user.clone(), entry)),
                Err(e) => {
                    tracing::warn!(user = %user, "Dropping unreadable presence entry: {}", e);
                    None
                }
            },
        )
        .collect()
}

/// Heartbeat writer and active-user reader over the presence document.
#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, max_attempts: u32) -> Self {
        Self {
            store,
            clock,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Record a heartbeat for `user_id` and prune stale entries.
    ///
    /// Returns the number of entries left in the document. A `None` (or
    /// JSON `null`) profile keeps the one stored by the previous heartbeat.
    pub async fn heartbeat(
        &self,
        user_id: &str,
        profile: Option<Value>,
    ) -> Result<usize, AppError> {
        if user_id.trim().is_empty() {
            return Err(AppError::Validation("userId is required".to_string()));
        }
        let profile = profile.filter(|p| !p.is_null());
        if let Some(p) = &profile {
            if !p.is_object() {
                return Err(AppError::Validation(
                    "profile must be a JSON object".to_string(),
                ));
            }
        }

        let mut current_version = 0;
        for attempt in 1..=self.max_attempts {
            let stored = self.store.get(PRESENCE_KEY).await?;
            let (mut document, expected_version) = match &stored {
                Some(doc) => (parse_document(&doc.body), Some(doc.version)),
                None => (PresenceDocument::new(), None),
            };

            let now = self.clock.now_ms();
            let entry_profile = profile
                .clone()
                .or_else(|| document.get(user_id).map(|e| e.profile.clone()))
                .unwrap_or_else(empty_profile);
            document.insert(
                user_id.to_string(),
                PresenceEntry {
                    last_seen: now,
                    profile: entry_profile,
                },
            );
            document.retain(|_, entry| is_active(entry, now));

            let body = serde_json::to_value(&document).map_err(|e| {
                AppError::Internal(format!("Failed to encode presence document: {}", e))
            })?;

            match self
                .store
                .compare_and_swap(PRESENCE_KEY, &body, expected_version)
                .await
            {
                Ok(saved) => {
                    tracing::debug!(
                        user_id,
                        attempt,
                        version = saved.version,
                        active = document.len(),
                        "Heartbeat recorded"
                    );
                    return Ok(document.len());
                }
                Err(AppError::Conflict {
                    current_version: version,
                    ..
                }) => {
                    tracing::debug!(
                        user_id,
                        attempt,
                        version,
                        "Presence write conflicted, retrying"
                    );
                    current_version = version;
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Conflict {
            message: format!(
                "Presence document kept changing; gave up after {} attempts",
                self.max_attempts
            ),
            current_version,
        })
    }

    /// Users whose last heartbeat is within the staleness threshold.
    ///
    /// Best effort: a failed read yields an empty mapping.
    pub async fn get_active(&self) -> PresenceDocument {
        match self.store.get(PRESENCE_KEY).await {
            Ok(Some(doc)) => active_entries(&parse_document(&doc.body), self.clock.now_ms()),
            Ok(None) => PresenceDocument::new(),
            Err(e) => {
                tracing::warn!("Presence read failed, reporting nobody active: {}", e);
                PresenceDocument::new()
            }
        }
    }
}

/// Manually driven clock for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock(std::sync::atomic::AtomicI64);

#[cfg(test)]
impl ManualClock {
    pub fn at(now_ms: i64) -> Self {
        Self(std::sync::atomic::AtomicI64::new(now_ms))
    }

    pub fn set(&self, now_ms: i64) {
        self.0.store(now_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
