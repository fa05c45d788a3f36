//! # Local Store
//!
//! Durable on-device persistence of the entire application document, backed
//! by SQLite. Pure read/write with no merge logic: the document is written
//! wholesale on every save, never partially patched.
//!
//! ## Write Paths
//!
//! - [`LocalStore::save`] is the normal path for local edits: it stamps
//!   `last_saved_at` with the current time and increments `revision`,
//!   overriding whatever the caller supplied for those two fields.
//! - [`LocalStore::adopt_remote`] is the special-cased path for a winning
//!   remote payload: it preserves the remote `updated_at` as the local
//!   `last_saved_at` so the next sync cycle compares equal instead of
//!   immediately re-uploading.
//!
//! ## Failure Behavior
//!
//! Corrupt or missing stored data is never fatal; [`LocalStore::load`]
//! falls back to a default document and treats the situation as a first run.
//! Write failures are reported as [`SyncError::StorageFailure`] and the
//! caller decides whether to retry, drop, or alert.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;

use crate::document::{Document, Payload, SCHEMA_VERSION};
use crate::error::{Result, SyncError};

/// Row key for the single persisted document
const DOC_KEY: &str = "matrix";

/// Local SQLite-backed document store
#[derive(Debug)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open or create the store at the platform data directory
    pub async fn open() -> Result<Self> {
        let path = Self::default_db_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::storage(format!("create data dir: {}", e)))?;
        }
        Self::open_at(&path.to_string_lossy()).await
    }

    /// Open or create the store at an explicit path
    pub async fn open_at(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))
            .map_err(|e| SyncError::storage(format!("invalid database path: {}", e)))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    /// Open an in-memory store (used by tests)
    pub async fn open_in_memory() -> Result<Self> {
        // A single connection, or every pool checkout would see a fresh database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Platform-specific path for the local database file
    fn default_db_path() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
        path.push("taskmatrix");
        path.push("local.db");
        path
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                saved_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load the persisted document.
    ///
    /// Returns a fresh default document if nothing is stored, the stored
    /// blob fails to parse, or the database cannot be read. None of those
    /// are fatal.
    pub async fn load(&self) -> Document {
        let row = match sqlx::query("SELECT body FROM documents WHERE key = ?")
            .bind(DOC_KEY)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!("local store read failed, falling back to defaults: {}", e);
                return Document::default();
            }
        };

        let Some(row) = row else {
            return Document::default();
        };

        let body: String = match row.try_get("body") {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("local store row unreadable, falling back to defaults: {}", e);
                return Document::default();
            }
        };

        match Document::from_json(&body) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("stored document is corrupt, treating as first run: {}", e);
                Document::default()
            }
        }
    }

    /// Persist a document, stamping `last_saved_at` with the current time
    /// and incrementing `revision`. Returns the stamped document.
    pub async fn save(&self, doc: &Document) -> Result<Document> {
        let mut stamped = doc.clone();
        stamped.last_saved_at = Utc::now();
        stamped.revision = doc.revision + 1;
        self.write(&stamped).await?;
        Ok(stamped)
    }

    /// Replace the local document with a winning remote payload, preserving
    /// the remote `updated_at` as the local save timestamp.
    pub async fn adopt_remote(
        &self,
        payload: Payload,
        updated_at: DateTime<Utc>,
    ) -> Result<Document> {
        let current = self.load().await;
        let adopted = Document {
            schema_version: SCHEMA_VERSION.to_string(),
            revision: current.revision + 1,
            last_saved_at: updated_at,
            payload,
        };
        self.write(&adopted).await?;
        Ok(adopted)
    }

    /// Rewrite the stored save timestamp without touching the payload.
    ///
    /// Used after a successful upload so the local timestamp matches the
    /// server-assigned `updated_at` and the next cycle compares equal.
    pub async fn align_saved_at(&self, updated_at: DateTime<Utc>) -> Result<Document> {
        let mut doc = self.load().await;
        doc.last_saved_at = updated_at;
        self.write(&doc).await?;
        Ok(doc)
    }

    /// Explicit user reset: drop the stored document and return defaults
    pub async fn reset(&self) -> Result<Document> {
        sqlx::query("DELETE FROM documents WHERE key = ?")
            .bind(DOC_KEY)
            .execute(&self.pool)
            .await?;
        Ok(Document::default())
    }

    /// Export the document as a pretty-printed self-describing blob
    pub async fn export_json(&self) -> Result<String> {
        self.load().await.to_json_pretty()
    }

    /// Import a previously exported blob, validating `schema_version`
    /// before persisting. The stored copy is stamped like any local save.
    pub async fn import_json(&self, blob: &str) -> Result<Document> {
        let value: serde_json::Value = serde_json::from_str(blob)?;
        let Some(version) = value.get("schema_version").and_then(|v| v.as_str()) else {
            return Err(SyncError::malformed("import blob has no schema_version"));
        };
        if version != SCHEMA_VERSION {
            return Err(SyncError::malformed(format!(
                "unsupported schema version {} (expected {})",
                version, SCHEMA_VERSION
            )));
        }
        let doc = Document::from_json(blob)?;
        self.save(&doc).await
    }

    async fn write(&self, doc: &Document) -> Result<()> {
        let body = doc.to_json()?;
        sqlx::query(
            "INSERT OR REPLACE INTO documents (key, body, saved_at)
             VALUES (?, ?, ?)",
        )
        .bind(DOC_KEY)
        .bind(&body)
        .bind(doc.last_saved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Corrupt-injection helper for tests: write raw bytes into the row
    #[cfg(test)]
    async fn write_raw(&self, body: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO documents (key, body, saved_at)
             VALUES (?, ?, ?)",
        )
        .bind(DOC_KEY)
        .bind(body)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
