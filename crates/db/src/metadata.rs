//! Image metadata lookups against the sidecar database.
//!
//! Schema (owned and written by the workers):
//!
//! ```sql
//! CREATE TABLE images (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     filename TEXT UNIQUE NOT NULL,
//!     created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
//!     metadata TEXT
//! )
//! ```
//!
//! Every failure mode here (file missing, schema missing, bad JSON)
//! degrades to "no metadata" -- the history listing must never abort
//! because of the sidecar.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sqlx::Row;
use tokio::sync::Mutex;

use crate::DbPool;

/// Lazy handle over the sidecar database.
///
/// The sidecar may not exist until the first image is generated, so the
/// pool is opened on first use and reopened on later calls if opening
/// failed.
pub struct MetadataStore {
    path: PathBuf,
    pool: Mutex<Option<DbPool>>,
}

impl MetadataStore {
    /// Point the store at `outputs/metadata.db` (or wherever the sidecar
    /// lives). No I/O happens until the first lookup.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: Mutex::new(None),
        }
    }

    /// Path of the sidecar file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up metadata for a set of filenames.
    ///
    /// Returns a map containing only the filenames that had a parseable
    /// metadata row. Any error yields an empty map.
    pub async fn find_by_filenames(
        &self,
        filenames: &[String],
    ) -> HashMap<String, serde_json::Value> {
        let mut found = HashMap::new();
        if filenames.is_empty() {
            return found;
        }

        let pool = match self.pool().await {
            Some(pool) => pool,
            None => return found,
        };

        for filename in filenames {
            let row = sqlx::query("SELECT metadata FROM images WHERE filename = ?")
                .bind(filename)
                .fetch_optional(&pool)
                .await;

            match row {
                Ok(Some(row)) => {
                    let raw: Option<String> = row.get("metadata");
                    if let Some(value) = raw.and_then(|s| serde_json::from_str(&s).ok()) {
                        found.insert(filename.clone(), value);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Metadata sidecar query failed");
                    // The pool may be stale (file replaced); drop it so the
                    // next call reopens.
                    *self.pool.lock().await = None;
                    return found;
                }
            }
        }

        found
    }

    async fn pool(&self) -> Option<DbPool> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Some(pool.clone());
        }

        match crate::open_sidecar(&self.path).await {
            Ok(pool) => {
                *guard = Some(pool.clone());
                Some(pool)
            }
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Metadata sidecar not available");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::SqlitePool;

    async fn seed_sidecar(path: &Path) {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        sqlx::query(
            "CREATE TABLE images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT UNIQUE NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                metadata TEXT
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO images (filename, metadata) VALUES (?, ?)")
            .bind("a.png")
            .bind(r#"{"prompt": "a cat", "seed": 42}"#)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO images (filename, metadata) VALUES (?, ?)")
            .bind("broken.png")
            .bind("{not json")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn lookup_joins_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.db");
        seed_sidecar(&path).await;

        let store = MetadataStore::new(&path);
        let found = store
            .find_by_filenames(&["a.png".to_string(), "missing.png".to_string()])
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found["a.png"]["prompt"], serde_json::json!("a cat"));
    }

    #[tokio::test]
    async fn unparseable_metadata_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.db");
        seed_sidecar(&path).await;

        let store = MetadataStore::new(&path);
        let found = store.find_by_filenames(&["broken.png".to_string()]).await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn missing_sidecar_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::new(dir.path().join("metadata.db"));
        let found = store.find_by_filenames(&["a.png".to_string()]).await;
        assert!(found.is_empty());
    }
}
