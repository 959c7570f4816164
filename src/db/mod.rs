//! Document store module.
//!
//! The store holds whole JSON documents under string keys, each with a
//! monotonically increasing version used for conditional writes.

mod repository;

pub use repository::*;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::errors::AppError;
use crate::models::StoredDocument;

/// Key-value interface over whole JSON documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the document stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<StoredDocument>, AppError>;

    /// Write `body` under `key` regardless of what is currently stored.
    async fn upsert(&self, key: &str, body: &serde_json::Value)
        -> Result<StoredDocument, AppError>;

    /// Write `body` under `key` only if the stored version still matches.
    ///
    /// `None` creates the document and fails if it already exists. A lost
    /// race returns `AppError::Conflict` and leaves the stored document as is.
    async fn compare_and_swap(
        &self,
        key: &str,
        body: &serde_json::Value,
        expected_version: Option<i64>,
    ) -> Result<StoredDocument, AppError>;
}

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            doc_key TEXT PRIMARY KEY,
            body TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Store whose every call fails, for exercising error paths.
#[cfg(test)]
pub struct UnavailableStore;

#[cfg(test)]
#[async_trait]
impl DocumentStore for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<StoredDocument>, AppError> {
        Err(AppError::Store("store unreachable".to_string()))
    }

    async fn upsert(
        &self,
        _key: &str,
        _body: &serde_json::Value,
    ) -> Result<StoredDocument, AppError> {
        Err(AppError::Store("store unreachable".to_string()))
    }

    async fn compare_and_swap(
        &self,
        _key: &str,
        _body: &serde_json::Value,
        _expected_version: Option<i64>,
    ) -> Result<StoredDocument, AppError> {
        Err(AppError::Store("store unreachable".to_string()))
    }
}
