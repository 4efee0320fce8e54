use sea_query::{Expr, Func, Order, Query, SqliteQueryBuilder};

use crate::schema::Recordings;

/// INSERT INTO recordings (created_at_ms, duration_secs, size_bytes, mime_type, title, custom_title, payload)
/// VALUES (..., ?)
///
/// The payload is left as a `?` placeholder; bind it with `.bind(payload)`.
pub fn insert(
    created_at_ms: i64,
    duration_secs: f64,
    size_bytes: i64,
    mime_type: &str,
    title: &str,
    custom_title: bool,
) -> String {
    Query::insert()
        .into_table(Recordings::Table)
        .columns([
            Recordings::CreatedAtMs,
            Recordings::DurationSecs,
            Recordings::SizeBytes,
            Recordings::MimeType,
            Recordings::Title,
            Recordings::CustomTitle,
            Recordings::Payload,
        ])
        .values_panic([
            created_at_ms.into(),
            duration_secs.into(),
            size_bytes.into(),
            mime_type.into(),
            title.into(),
            (custom_title as i32).into(),
            Expr::cust("?"),
        ])
        .to_string(SqliteQueryBuilder)
}

/// SELECT id, created_at_ms, duration_secs, size_bytes, mime_type, title, custom_title
/// FROM recordings ORDER BY created_at_ms DESC, id DESC
pub fn select_all_summaries() -> String {
    Query::select()
        .columns([
            Recordings::Id,
            Recordings::CreatedAtMs,
            Recordings::DurationSecs,
            Recordings::SizeBytes,
            Recordings::MimeType,
            Recordings::Title,
            Recordings::CustomTitle,
        ])
        .from(Recordings::Table)
        .order_by(Recordings::CreatedAtMs, Order::Desc)
        .order_by(Recordings::Id, Order::Desc)
        .to_string(SqliteQueryBuilder)
}

/// SELECT id, created_at_ms, duration_secs, size_bytes, mime_type, title, custom_title
/// FROM recordings WHERE id = ?
pub fn select_summary_by_id(id: i64) -> String {
    Query::select()
        .columns([
            Recordings::Id,
            Recordings::CreatedAtMs,
            Recordings::DurationSecs,
            Recordings::SizeBytes,
            Recordings::MimeType,
            Recordings::Title,
            Recordings::CustomTitle,
        ])
        .from(Recordings::Table)
        .and_where(Expr::col(Recordings::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT payload FROM recordings WHERE id = ?
pub fn select_payload_by_id(id: i64) -> String {
    Query::select()
        .column(Recordings::Payload)
        .from(Recordings::Table)
        .and_where(Expr::col(Recordings::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// UPDATE recordings SET title = ?, custom_title = 1 WHERE id = ?
pub fn update_title(id: i64, title: &str) -> String {
    Query::update()
        .table(Recordings::Table)
        .value(Recordings::Title, title)
        .value(Recordings::CustomTitle, 1)
        .and_where(Expr::col(Recordings::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// DELETE FROM recordings WHERE id = ?
pub fn delete_by_id(id: i64) -> String {
    Query::delete()
        .from_table(Recordings::Table)
        .and_where(Expr::col(Recordings::Id).eq(id))
        .to_string(SqliteQueryBuilder)
}

/// SELECT COUNT(*) FROM recordings
pub fn count() -> String {
    Query::select()
        .expr(Func::count(Expr::col(Recordings::Id)))
        .from(Recordings::Table)
        .to_string(SqliteQueryBuilder)
}
