// Library interface for the CLI and integration tests

pub mod assembler;
pub mod capture;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod janitor;
pub mod pipe_capture;
pub mod recorder;
pub mod schema;
pub mod serve;
pub mod session;
pub mod stager;
pub mod store;

pub mod queries {
    pub mod chunks;
    pub mod ddl;
    pub mod metadata;
    pub mod recordings;
}

// Re-export the expected database version for convenience
pub use constants::EXPECTED_DB_VERSION;
