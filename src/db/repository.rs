//! SQLite-backed document repository.
//!
//! Every write is a single statement, so a document is never half written.
//! Conditional writes compare the stored version inside that statement.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::DocumentStore;
use crate::errors::AppError;
use crate::models::StoredDocument;

const DOCUMENT_COLUMNS: &str = "doc_key, body, version, updated_at";

/// Document repository over the `documents` table.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
    timeout: Duration,
}

impl Repository {
    pub fn new(pool: SqlitePool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Run one store round trip under the configured timeout.
    async fn bounded<T, F>(&self, op: &str, key: &str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>> + Send,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    key,
                    op,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Store call timed out"
                );
                Err(AppError::StoreTimeout(format!(
                    "Store {} for '{}' timed out after {} ms",
                    op,
                    key,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    async fn fetch(&self, key: &str) -> Result<Option<StoredDocument>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE doc_key = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(document_from_row).transpose()
    }

    /// Build the conflict error for a conditional write that matched no row.
    ///
    /// A failed re-read is returned as the outer error so callers never see
    /// a made-up version.
    async fn conflict(&self, key: &str, expected: Option<i64>) -> Result<AppError, AppError> {
        let current_version = self.fetch(key).await?.map(|d| d.version).unwrap_or(0);
        let message = match expected {
            Some(expected) => format!(
                "Version mismatch on '{}': expected {}, current {}",
                key, expected, current_version
            ),
            None => format!("Document '{}' was created concurrently", key),
        };
        Ok(AppError::Conflict {
            message,
            current_version,
        })
    }
}

#[async_trait]
impl DocumentStore for Repository {
    async fn get(&self, key: &str) -> Result<Option<StoredDocument>, AppError> {
        self.bounded("read", key, self.fetch(key)).await
    }

    async fn upsert(
        &self,
        key: &str,
        body: &serde_json::Value,
    ) -> Result<StoredDocument, AppError> {
        let body_json = serde_json::to_string(body)
            .map_err(|e| AppError::Internal(format!("Failed to encode document: {}", e)))?;
        let now = Utc::now().to_rfc3339();

        self.bounded("write", key, async {
            let row = sqlx::query(&format!(
                r#"INSERT INTO documents (doc_key, body, version, updated_at) VALUES (?, ?, 1, ?)
                   ON CONFLICT(doc_key) DO UPDATE SET
                       body = excluded.body,
                       version = documents.version + 1,
                       updated_at = excluded.updated_at
                   RETURNING {}"#,
                DOCUMENT_COLUMNS
            ))
            .bind(key)
            .bind(&body_json)
            .bind(&now)
            .fetch_one(&self.pool)
            .await?;

            document_from_row(&row)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        body: &serde_json::Value,
        expected_version: Option<i64>,
    ) -> Result<StoredDocument, AppError> {
        let body_json = serde_json::to_string(body)
            .map_err(|e| AppError::Internal(format!("Failed to encode document: {}", e)))?;
        let now = Utc::now().to_rfc3339();

        self.bounded("conditional write", key, async {
            let row = match expected_version {
                None => {
                    sqlx::query(&format!(
                        r#"INSERT INTO documents (doc_key, body, version, updated_at) VALUES (?, ?, 1, ?)
                           ON CONFLICT(doc_key) DO NOTHING
                           RETURNING {}"#,
                        DOCUMENT_COLUMNS
                    ))
                    .bind(key)
                    .bind(&body_json)
                    .bind(&now)
                    .fetch_optional(&self.pool)
                    .await?
                }
                Some(expected) => {
                    sqlx::query(&format!(
                        r#"UPDATE documents SET body = ?, version = version + 1, updated_at = ?
                           WHERE doc_key = ? AND version = ?
                           RETURNING {}"#,
                        DOCUMENT_COLUMNS
                    ))
                    .bind(&body_json)
                    .bind(&now)
                    .bind(key)
                    .bind(expected)
                    .fetch_optional(&self.pool)
                    .await?
                }
            };

            match row {
                Some(row) => document_from_row(&row),
                None => Err(self.conflict(key, expected_version).await?),
            }
        })
        .await
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredDocument, AppError> {
    let key: String = row.get("doc_key");
    let body_str: String = row.get("body");
    let body = serde_json::from_str(&body_str).map_err(|e| {
        tracing::error!(key = %key, "Stored document is not valid JSON: {}", e);
        AppError::Store(format!("Document '{}' is not valid JSON", key))
    })?;

    Ok(StoredDocument {
        key,
        body,
        version: row.get("version"),
        updated_at: row.get("updated_at"),
    })
}
