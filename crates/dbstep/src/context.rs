//! Migration execution context
//!
//! Immutable per-attempt bundle handed to routines and script engines:
//! the migrating connection, the database tag, the version the attempt
//! started from, and the version-table name. Not persisted anywhere.

use sqlx::AnyConnection;
use tracing::debug;

use crate::error::MigrationResult;
use crate::script::{self, ScriptStore};

/// Context a migration unit executes against.
///
/// The connection is the one the whole migration transaction runs on; a
/// unit that opens its own connection forfeits the transactional and
/// locking guarantees.
pub struct MigrationContext<'a> {
    conn: &'a mut AnyConnection,
    database: &'a str,
    version: i64,
    table: &'a str,
    scripts: &'a ScriptStore,
}

impl<'a> MigrationContext<'a> {
    pub(crate) fn new(
        conn: &'a mut AnyConnection,
        database: &'a str,
        version: i64,
        table: &'a str,
        scripts: &'a ScriptStore,
    ) -> Self {
        Self {
            conn,
            database,
            version,
            table,
            scripts,
        }
    }

    /// The connection the migration transaction runs on
    pub fn connection(&mut self) -> &mut AnyConnection {
        self.conn
    }

    /// Normalized tag of the connected database product
    pub fn database(&self) -> &str {
        self.database
    }

    /// The schema version this attempt started from
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Name of the table holding the schema version row
    pub fn table(&self) -> &str {
        self.table
    }

    /// Execute a named script on the migration connection, so a routine can
    /// delegate part of its work to script files. Returns whether the
    /// script was found.
    pub async fn run_script(&mut self, name: &str) -> MigrationResult<bool> {
        match self.scripts.lookup(name)? {
            Some(text) => {
                debug!(script = name, "running script from migration routine");
                let statements = script::statements_from(&text);
                script::run_statements(self.conn, name, &statements).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
