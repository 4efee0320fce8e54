use rand::Rng;
use std::time::Duration;

/// Expected database schema version
/// Version 1 databases are upgraded in place, anything newer is rejected
pub const EXPECTED_DB_VERSION: &str = "2";

/// Default SQLite database path, relative to the working directory
pub const DEFAULT_DATABASE_PATH: &str = "tmp/recordings.sqlite";

/// Capacity of the bounded channel between a capture source and the stager
pub const CHUNK_CHANNEL_CAPACITY: usize = 100;

/// Interval at which a capture source cuts its pending bytes into a chunk
pub const CAPTURE_TIMESLICE: Duration = Duration::from_secs(1);

/// Size of a single read from an encoder's stdout
pub const PIPE_READ_SIZE: usize = 8 * 1024;

/// How often the elapsed time is refreshed and the duration limit checked
pub const STATUS_TICK: Duration = Duration::from_secs(1);

pub const DEFAULT_FRAME_RATE: u32 = 30;
pub const DEFAULT_DURATION_LIMIT_MINUTES: u64 = 60;
pub const DEFAULT_AUTO_SAVE_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_BUFFERED_MIB: u64 = 50;
pub const DEFAULT_RETENTION_HOURS: u64 = 24;
pub const DEFAULT_SWEEP_INTERVAL_MINUTES: u64 = 60;
pub const DEFAULT_API_PORT: u16 = 3000;

/// Upper bound on payload bytes held by the playback cache
pub const PLAYBACK_CACHE_BYTES: usize = 64 * 1024 * 1024;

/// The buffered-memory gauge never reports more than this
pub const MEMORY_PERCENT_CAP: f64 = 95.0;

/// Container preference when negotiating with the capture source
pub const MIME_PREFERENCE: [&str; 4] = [
    "video/mp4",
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,vorbis",
    "video/webm",
];

/// Used when the source supports none of the preferred containers
pub const FALLBACK_MIME_TYPE: &str = "video/webm";

/// Generate a unique database ID
pub fn generate_db_unique_id() -> String {
    format!(
        "db_{}",
        rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(12)
            .map(char::from)
            .collect::<String>()
    )
}
