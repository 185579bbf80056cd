//! Typed errors for the replication engine.
//!
//! Adapter drivers surface their own error types; adapters map them into
//! these kinds at the boundary so the engine never sees driver internals.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    /// Invalid or incomplete configuration. Fatal before any job runs.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Could not reach a source, target or log database.
    #[error("could not connect to '{connection}': {detail}")]
    Connect { connection: String, detail: String },

    /// Table or column not found, or a strategy key missing from the
    /// resolved columns.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// A mutating operation was attempted against a read-only connection.
    /// Fatal to the project: no further jobs are scheduled.
    #[error("connection '{0}' is read only; refusing to modify it")]
    ReadOnly(String),

    /// Source export failed or was cut short.
    #[error("export failed: {0}")]
    Export(String),

    /// Target bulk load failed or was cut short.
    #[error("import failed: {0}")]
    Import(String),

    /// Switch, insert-from or merge-from against the live table failed.
    #[error("promotion failed: {0}")]
    Promote(String),

    /// Staging-area I/O failure.
    #[error("staging error: {0}")]
    Stage(#[from] std::io::Error),
}

impl LoadError {
    /// True when the error must stop the whole project, not just this job.
    pub fn is_fatal_to_project(&self) -> bool {
        matches!(self, LoadError::ReadOnly(_))
    }
}

pub type Result<T> = std::result::Result<T, LoadError>;
