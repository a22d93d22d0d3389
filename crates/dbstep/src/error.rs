//! Error types for the migration engine
//!
//! Every unrecoverable condition surfaces as a single [`MigrationError`]
//! carrying a human-readable message and, where available, the underlying
//! cause. The only failures the engine swallows are commit and close
//! failures during cleanup, which are logged instead.

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Error type for migration operations
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// A required setting is missing or invalid
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A connection could not be obtained or constructed
    #[error("{message}")]
    Connectivity {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    /// The version table does not hold exactly one row where it must
    #[error("version table '{table}' is corrupt: {message}")]
    VersionTableCorrupt { table: String, message: String },

    /// The resolution chain was exhausted outside auto-advance mode
    #[error("no migration found for version {version}")]
    NoMigrationFound { version: i64 },

    /// A script statement failed; carries the statement text and its
    /// 1-based position within the script
    #[error("{script}: failed to execute statement #{index}: {sql}")]
    StatementFailed {
        script: String,
        index: usize,
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    /// A migration routine or script engine reported a failure
    #[error(transparent)]
    Unit(#[from] anyhow::Error),

    /// The post-execution check shows the version failed to increase
    #[error("migration failed to increase database version: {current} <= {previous}")]
    VersionDidNotAdvance { previous: i64, current: i64 },

    /// The requested target version is older than the database
    #[error("client version older than database version: {target} < {current}")]
    ClientBehindDatabase { target: i64, current: i64 },

    /// Any other database round trip failure (locking, transaction control)
    #[error("{message}")]
    Database {
        message: String,
        #[source]
        source: sqlx::Error,
    },
}

impl MigrationError {
    /// Wrap a sqlx error with context about the round trip that failed
    pub(crate) fn database(message: impl Into<String>, source: sqlx::Error) -> Self {
        MigrationError::Database {
            message: message.into(),
            source,
        }
    }

    /// Wrap a connection failure with the URL or pool it came from
    pub(crate) fn connectivity(message: impl Into<String>, source: sqlx::Error) -> Self {
        MigrationError::Connectivity {
            message: message.into(),
            source,
        }
    }
}
