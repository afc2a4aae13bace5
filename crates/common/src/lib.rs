//! locheal Common Library
//!
//! Shared types, the error type, and the record stores behind the
//! healing engine.

pub mod db;
pub mod error;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use db::SqliteStore;
pub use error::{Error, Result};
pub use store::{MemoryStore, RecordStore, StoredRecord};
pub use types::*;

/// locheal version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".locheal")
}

/// Default database path
pub fn default_db_path() -> std::path::PathBuf {
    default_store_path().join("state.db")
}

/// Default configuration path
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
