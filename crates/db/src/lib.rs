//! Read-side access to the `metadata.db` sidecar the workers write next
//! to the generated images.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub mod metadata;

pub use metadata::MetadataStore;

pub type DbPool = sqlx::SqlitePool;

/// Open a read-only pool over an existing SQLite sidecar file.
pub async fn open_sidecar(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .create_if_missing(false);

    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
}
