use sea_query::Iden;

/// Metadata table - key-value store for database configuration
#[derive(Iden)]
pub enum Metadata {
    Table,
    Key,
    Value,
}

/// Recordings table - finished, user-visible artifacts
#[derive(Iden)]
pub enum Recordings {
    Table,
    Id,
    CreatedAtMs,
    DurationSecs,
    SizeBytes,
    MimeType,
    Title,
    CustomTitle,
    Payload,
}

/// Staged chunks table - in-progress fragments keyed by session
#[derive(Iden)]
pub enum StagedChunks {
    Table,
    Id,
    SessionId,
    Seq,
    ArrivalMs,
    SizeBytes,
    Payload,
}
