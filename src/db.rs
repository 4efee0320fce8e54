use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

use crate::constants::{generate_db_unique_id, EXPECTED_DB_VERSION};
use crate::error::StorageError;
use crate::queries::{ddl, metadata};

/// Open a file-based database pool for production use
/// Creates the file (and its parent directory) if needed, enables WAL mode and foreign keys
pub async fn open_database(db_path: &Path) -> Result<SqlitePool, StorageError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    info!("SQLite database: {}", db_path.display());
    Ok(pool)
}

/// Open a database and bring its schema up to date
pub async fn open_and_init_database(db_path: &Path) -> Result<SqlitePool, StorageError> {
    let pool = open_database(db_path).await?;
    init_database_schema(&pool).await?;
    Ok(pool)
}

/// Create a database in a fresh temporary directory for testing
/// Returns (pool, guard) - keep the guard alive to prevent temp file deletion
pub async fn create_test_connection_in_temporary_file(
) -> Result<(SqlitePool, tempfile::TempDir), StorageError> {
    let dir = tempfile::tempdir()?;
    let pool = open_database(&dir.path().join("test.sqlite")).await?;
    Ok((pool, dir))
}

/// Initialize or upgrade the database schema
///
/// Fresh databases get every table plus `version` and `unique_id` metadata.
/// Version 1 databases are upgraded in place. Newer versions are rejected.
pub async fn init_database_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(&ddl::create_metadata_table())
        .execute(pool)
        .await?;

    match query_metadata(pool, "version").await?.as_deref() {
        None => {
            create_tables(pool).await?;
            upsert_metadata(pool, "version", EXPECTED_DB_VERSION).await?;
            info!("Initialized database schema version {}", EXPECTED_DB_VERSION);
        }
        Some("1") => {
            upgrade_from_v1(pool).await?;
            info!("Upgraded database schema from version 1 to {}", EXPECTED_DB_VERSION);
        }
        Some(EXPECTED_DB_VERSION) => {
            create_tables(pool).await?;
        }
        Some(other) => {
            return Err(StorageError::SchemaVersion {
                found: other.to_string(),
                expected: EXPECTED_DB_VERSION.to_string(),
            });
        }
    }

    if ensure_metadata(pool, "unique_id", &generate_db_unique_id()).await? {
        info!("Assigned database unique_id");
    }

    Ok(())
}

async fn create_tables(pool: &SqlitePool) -> Result<(), StorageError> {
    let statements = [
        ddl::create_recordings_table(),
        ddl::create_staged_chunks_table(),
        ddl::create_recordings_created_at_index(),
        ddl::create_staged_chunks_session_index(),
        ddl::create_staged_chunks_arrival_index(),
    ];
    for sql in statements.iter() {
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}

/// Version 1 stored recordings without mime type or custom-title flag
async fn upgrade_from_v1(pool: &SqlitePool) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;

    let columns: Vec<String> = sqlx::query_scalar(&ddl::select_recordings_columns())
        .fetch_all(&mut *tx)
        .await?;

    if columns.is_empty() {
        sqlx::query(&ddl::create_recordings_table())
            .execute(&mut *tx)
            .await?;
    } else {
        if !columns.iter().any(|c| c == "mime_type") {
            sqlx::query(&ddl::add_recordings_mime_type_column())
                .execute(&mut *tx)
                .await?;
        }
        if !columns.iter().any(|c| c == "custom_title") {
            sqlx::query(&ddl::add_recordings_custom_title_column())
                .execute(&mut *tx)
                .await?;
        }
    }

    for sql in [
        ddl::create_staged_chunks_table(),
        ddl::create_recordings_created_at_index(),
        ddl::create_staged_chunks_session_index(),
        ddl::create_staged_chunks_arrival_index(),
        metadata::set("version", EXPECTED_DB_VERSION),
    ] {
        sqlx::query(&sql).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Query a metadata value by key
pub async fn query_metadata(pool: &SqlitePool, key: &str) -> Result<Option<String>, StorageError> {
    let sql = metadata::select_value(key);
    let value: Option<String> = sqlx::query_scalar(&sql).fetch_optional(pool).await?;
    Ok(value)
}

/// Write a metadata value unless the key already exists
/// Returns whether the value was written
pub async fn ensure_metadata(pool: &SqlitePool, key: &str, value: &str) -> Result<bool, StorageError> {
    let sql = metadata::insert_if_missing(key, value);
    let result = sqlx::query(&sql).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Insert or replace a metadata key/value pair
pub async fn upsert_metadata(pool: &SqlitePool, key: &str, value: &str) -> Result<(), StorageError> {
    let sql = metadata::set(key, value);
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}
