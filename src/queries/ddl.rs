use sea_query::{ColumnDef, Index, SqliteQueryBuilder, Table};

use crate::schema::{Metadata, Recordings, StagedChunks};

/// CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)
pub fn create_metadata_table() -> String {
    Table::create()
        .table(Metadata::Table)
        .if_not_exists()
        .col(ColumnDef::new(Metadata::Key).string().primary_key())
        .col(ColumnDef::new(Metadata::Value).string().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS recordings (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     created_at_ms INTEGER NOT NULL,
///     duration_secs REAL NOT NULL,
///     size_bytes INTEGER NOT NULL,
///     mime_type TEXT NOT NULL DEFAULT 'video/webm',
///     title TEXT NOT NULL,
///     custom_title INTEGER NOT NULL DEFAULT 0,
///     payload BLOB NOT NULL
/// )
pub fn create_recordings_table() -> String {
    Table::create()
        .table(Recordings::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Recordings::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(
            ColumnDef::new(Recordings::CreatedAtMs)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(Recordings::DurationSecs).double().not_null())
        .col(ColumnDef::new(Recordings::SizeBytes).big_integer().not_null())
        .col(
            ColumnDef::new(Recordings::MimeType)
                .string()
                .not_null()
                .default("video/webm"),
        )
        .col(ColumnDef::new(Recordings::Title).string().not_null())
        .col(
            ColumnDef::new(Recordings::CustomTitle)
                .integer()
                .not_null()
                .default(0),
        )
        .col(ColumnDef::new(Recordings::Payload).blob().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE TABLE IF NOT EXISTS staged_chunks (
///     id INTEGER PRIMARY KEY AUTOINCREMENT,
///     session_id INTEGER NOT NULL,
///     seq INTEGER NOT NULL,
///     arrival_ms INTEGER NOT NULL,
///     size_bytes INTEGER NOT NULL,
///     payload BLOB NOT NULL
/// )
///
/// No foreign key to recordings: staged chunks exist before their recording does.
pub fn create_staged_chunks_table() -> String {
    Table::create()
        .table(StagedChunks::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(StagedChunks::Id)
                .integer()
                .primary_key()
                .auto_increment(),
        )
        .col(
            ColumnDef::new(StagedChunks::SessionId)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(StagedChunks::Seq).big_integer().not_null())
        .col(
            ColumnDef::new(StagedChunks::ArrivalMs)
                .big_integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(StagedChunks::SizeBytes)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(StagedChunks::Payload).blob().not_null())
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_recordings_created_at ON recordings(created_at_ms)
pub fn create_recordings_created_at_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_recordings_created_at")
        .table(Recordings::Table)
        .col(Recordings::CreatedAtMs)
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_staged_chunks_session_id ON staged_chunks(session_id)
pub fn create_staged_chunks_session_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_staged_chunks_session_id")
        .table(StagedChunks::Table)
        .col(StagedChunks::SessionId)
        .to_string(SqliteQueryBuilder)
}

/// CREATE INDEX IF NOT EXISTS idx_staged_chunks_arrival ON staged_chunks(arrival_ms)
///
/// Added in schema version 2 for the stale-chunk sweep.
pub fn create_staged_chunks_arrival_index() -> String {
    Index::create()
        .if_not_exists()
        .name("idx_staged_chunks_arrival")
        .table(StagedChunks::Table)
        .col(StagedChunks::ArrivalMs)
        .to_string(SqliteQueryBuilder)
}

// ============================================================================
// Version 1 -> 2 upgrade
// ============================================================================

/// ALTER TABLE recordings ADD COLUMN mime_type TEXT NOT NULL DEFAULT 'video/webm'
pub fn add_recordings_mime_type_column() -> String {
    Table::alter()
        .table(Recordings::Table)
        .add_column(
            ColumnDef::new(Recordings::MimeType)
                .string()
                .not_null()
                .default("video/webm"),
        )
        .to_string(SqliteQueryBuilder)
}

/// ALTER TABLE recordings ADD COLUMN custom_title INTEGER NOT NULL DEFAULT 0
pub fn add_recordings_custom_title_column() -> String {
    Table::alter()
        .table(Recordings::Table)
        .add_column(
            ColumnDef::new(Recordings::CustomTitle)
                .integer()
                .not_null()
                .default(0),
        )
        .to_string(SqliteQueryBuilder)
}

/// SELECT name FROM pragma_table_info('recordings')
///
/// Table-valued pragma functions can't be expressed through sea-query.
pub fn select_recordings_columns() -> String {
    "SELECT name FROM pragma_table_info('recordings')".to_string()
}
