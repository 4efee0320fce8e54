use sea_query::{Expr, Func, Order, Query, SqliteQueryBuilder};

use crate::schema::StagedChunks;

/// INSERT INTO staged_chunks (session_id, seq, arrival_ms, size_bytes, payload)
/// VALUES (?, ?, ?, ?, ?)
///
/// The payload is left as a `?` placeholder; bind it with `.bind(payload)`.
pub fn insert(session_id: i64, seq: i64, arrival_ms: i64, size_bytes: i64) -> String {
    Query::insert()
        .into_table(StagedChunks::Table)
        .columns([
            StagedChunks::SessionId,
            StagedChunks::Seq,
            StagedChunks::ArrivalMs,
            StagedChunks::SizeBytes,
            StagedChunks::Payload,
        ])
        .values_panic([
            session_id.into(),
            seq.into(),
            arrival_ms.into(),
            size_bytes.into(),
            Expr::cust("?"),
        ])
        .to_string(SqliteQueryBuilder)
}

/// SELECT seq, arrival_ms, payload FROM staged_chunks
/// WHERE session_id = ? ORDER BY arrival_ms, seq
pub fn select_by_session(session_id: i64) -> String {
    Query::select()
        .columns([
            StagedChunks::Seq,
            StagedChunks::ArrivalMs,
            StagedChunks::Payload,
        ])
        .from(StagedChunks::Table)
        .and_where(Expr::col(StagedChunks::SessionId).eq(session_id))
        .order_by(StagedChunks::ArrivalMs, Order::Asc)
        .order_by(StagedChunks::Seq, Order::Asc)
        .to_string(SqliteQueryBuilder)
}

/// DELETE FROM staged_chunks WHERE session_id = ?
pub fn delete_by_session(session_id: i64) -> String {
    Query::delete()
        .from_table(StagedChunks::Table)
        .and_where(Expr::col(StagedChunks::SessionId).eq(session_id))
        .to_string(SqliteQueryBuilder)
}

/// DELETE FROM staged_chunks
pub fn delete_all() -> String {
    Query::delete()
        .from_table(StagedChunks::Table)
        .to_string(SqliteQueryBuilder)
}

/// DELETE FROM staged_chunks WHERE arrival_ms < ? AND session_id != ?
///
/// Pass `None` for `exclude_session` to sweep every session.
pub fn delete_older_than(cutoff_ms: i64, exclude_session: Option<i64>) -> String {
    let mut query = Query::delete();
    query
        .from_table(StagedChunks::Table)
        .and_where(Expr::col(StagedChunks::ArrivalMs).lt(cutoff_ms));
    if let Some(session_id) = exclude_session {
        query.and_where(Expr::col(StagedChunks::SessionId).ne(session_id));
    }
    query.to_string(SqliteQueryBuilder)
}

/// SELECT session_id, COUNT(id), SUM(size_bytes), MIN(arrival_ms), MAX(arrival_ms)
/// FROM staged_chunks GROUP BY session_id ORDER BY session_id
pub fn select_session_summaries() -> String {
    Query::select()
        .column(StagedChunks::SessionId)
        .expr(Func::count(Expr::col(StagedChunks::Id)))
        .expr(Func::sum(Expr::col(StagedChunks::SizeBytes)))
        .expr(Func::min(Expr::col(StagedChunks::ArrivalMs)))
        .expr(Func::max(Expr::col(StagedChunks::ArrivalMs)))
        .from(StagedChunks::Table)
        .group_by_col(StagedChunks::SessionId)
        .order_by(StagedChunks::SessionId, Order::Asc)
        .to_string(SqliteQueryBuilder)
}
