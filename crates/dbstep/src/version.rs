//! Version store
//!
//! Reads and writes the single current-version row kept in a dedicated
//! table inside the target database. The engine never creates or drops the
//! table itself; the deployment's earliest bootstrap migration does. The
//! store self-heals where it can: an unreadable table reads as version 0,
//! and a readable-but-empty table is bootstrapped to version 1.

use sqlx::AnyConnection;
use sqlx::Row;
use tracing::{debug, info};

use crate::error::{MigrationError, MigrationResult};
use crate::lock::LockCoordinator;

/// Accessor for the schema version row
pub struct VersionStore<'a> {
    table: &'a str,
}

impl<'a> VersionStore<'a> {
    /// Create a store over the given version table name
    pub fn new(table: &'a str) -> Self {
        Self { table }
    }

    /// Read the current schema version.
    ///
    /// A failed select means the table is missing or unreadable: the
    /// version is taken to be 0 and the connection's transaction state is
    /// reset (roll back, reopen) so subsequent statements run cleanly. An
    /// empty table is bootstrapped by inserting version 1. More than one
    /// row is fatal.
    pub async fn current(&self, conn: &mut AnyConnection) -> MigrationResult<i64> {
        let select = format!("SELECT version FROM {}", self.table);
        let rows = match sqlx::query(&select).fetch_all(&mut *conn).await {
            Ok(rows) => rows,
            Err(e) => {
                debug!(
                    table = self.table,
                    error = %e,
                    "could not read version table, assuming version 0"
                );
                self.reset_transaction_state(conn).await?;
                return Ok(0);
            }
        };

        match rows.len() {
            1 => rows[0]
                .try_get::<i64, _>(0)
                .map_err(|e| MigrationError::VersionTableCorrupt {
                    table: self.table.to_string(),
                    message: format!("version column is not an integer: {}", e),
                }),
            0 => {
                let insert = format!("INSERT INTO {} (version) VALUES (1)", self.table);
                sqlx::query(&insert)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| MigrationError::database("could not bootstrap version table", e))?;
                info!(table = self.table, "bootstrapped empty version table at version 1");
                Ok(1)
            }
            found => Err(MigrationError::VersionTableCorrupt {
                table: self.table.to_string(),
                message: format!("expected exactly one row, found {}", found),
            }),
        }
    }

    /// Record that a migration unit executed from `from_version`.
    ///
    /// If the unit left the version untouched, it is assumed to have
    /// advanced the schema by exactly one version and the row is
    /// incremented accordingly; a unit that updates the row itself is
    /// trusted. Returns the resulting version. The first-ever migration
    /// (`from_version == 0`) additionally acquires the lock here, since a
    /// version table only came into existence during that step.
    pub async fn advance(
        &self,
        conn: &mut AnyConnection,
        locks: &LockCoordinator<'_>,
        tag: &str,
        from_version: i64,
    ) -> MigrationResult<i64> {
        if from_version == 0 {
            locks.lock(conn, tag, self.table).await?;
        }

        let current = self.current(conn).await?;
        if current != from_version {
            info!(
                from = from_version,
                to = current,
                "migration updated the version itself"
            );
            return Ok(current);
        }

        let next = from_version + 1;
        let update = format!("UPDATE {} SET version = {}", self.table, next);
        let result = sqlx::query(&update)
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrationError::database("could not update version table", e))?;
        if result.rows_affected() != 1 {
            return Err(MigrationError::VersionTableCorrupt {
                table: self.table.to_string(),
                message: format!(
                    "version update affected {} rows, expected exactly one",
                    result.rows_affected()
                ),
            });
        }
        debug!(table = self.table, version = next, "advanced schema version");
        Ok(next)
    }

    /// Roll back whatever is open and reopen the migration transaction
    async fn reset_transaction_state(&self, conn: &mut AnyConnection) -> MigrationResult<()> {
        sqlx::query("ROLLBACK")
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrationError::database("could not reset transaction state", e))?;
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrationError::database("could not reopen migration transaction", e))?;
        Ok(())
    }
}
