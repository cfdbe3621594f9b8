// ⚠️ Error types
// Typed errors for the ledger, document and config layers.
// The binary wraps these in anyhow; the library never panics on I/O.

use std::path::PathBuf;

/// Errors raised by a ledger backing store
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("ledger SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("ledger row encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store changed between snapshot and rewrite
    #[error("ledger was modified concurrently (expected revision {expected}, found {found})")]
    Conflict { expected: String, found: String },
}

/// Errors raised while rendering a document
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    #[error("document I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
