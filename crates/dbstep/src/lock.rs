//! Lock coordination
//!
//! Serializes concurrent migration attempts by executing a
//! database-specific lock statement on the migrating connection before the
//! version table is mutated, and the matching unlock statement during
//! cleanup. Databases with no registered template skip locking entirely:
//! the engine offers no portable locking guarantee there, and a fresh
//! (version 0) database is unprotected until its first successful migration
//! regardless, since no row exists yet to race over.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use sqlx::AnyConnection;
use tracing::{debug, warn};

use crate::error::{MigrationError, MigrationResult};

/// Placeholder replaced with the version table name in lock templates
const TABLE_PLACEHOLDER: &str = ":table";

/// The bundled template table, parsed once at first use
static BUNDLED: Lazy<LockTemplates> = Lazy::new(|| {
    LockTemplates::from_json(include_str!("locks.json"))
        .expect("bundled locks.json must be valid")
});

/// Registry of database-specific lock and unlock statement templates.
///
/// Keys follow the `lock_<tag>` / `unlock_<tag>` convention, where `<tag>`
/// is the normalized database tag (see [`database_tag`]); values are SQL
/// templates containing a `:table` placeholder.
///
/// [`database_tag`]: crate::resolver::database_tag
#[derive(Debug, Clone)]
pub struct LockTemplates {
    templates: HashMap<String, String>,
}

impl LockTemplates {
    /// The template table bundled with the crate
    pub fn bundled() -> &'static LockTemplates {
        &BUNDLED
    }

    /// Build a registry from an explicit template table
    pub fn new(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    /// Parse a registry from a JSON object of template strings
    pub fn from_json(json: &str) -> MigrationResult<Self> {
        let templates: HashMap<String, String> = serde_json::from_str(json)
            .map_err(|e| MigrationError::Configuration(format!("invalid lock templates: {}", e)))?;
        Ok(Self::new(templates))
    }

    /// The lock statement for a database tag, with the table substituted
    pub fn lock_statement(&self, tag: &str, table: &str) -> Option<String> {
        self.statement("lock_", tag, table)
    }

    /// The unlock statement for a database tag, with the table substituted
    pub fn unlock_statement(&self, tag: &str, table: &str) -> Option<String> {
        self.statement("unlock_", tag, table)
    }

    fn statement(&self, prefix: &str, tag: &str, table: &str) -> Option<String> {
        self.templates
            .get(&format!("{}{}", prefix, tag))
            .map(|template| template.replace(TABLE_PLACEHOLDER, table))
    }
}

/// Executes lock and unlock statements for one migration attempt
pub struct LockCoordinator<'a> {
    templates: &'a LockTemplates,
}

impl<'a> LockCoordinator<'a> {
    /// Create a coordinator over the given template registry
    pub fn new(templates: &'a LockTemplates) -> Self {
        Self { templates }
    }

    /// Acquire the migration lock on the given connection.
    ///
    /// No-op when the database tag has no registered lock template.
    pub async fn lock(
        &self,
        conn: &mut AnyConnection,
        tag: &str,
        table: &str,
    ) -> MigrationResult<()> {
        match self.templates.lock_statement(tag, table) {
            Some(sql) => {
                debug!(tag, %sql, "acquiring migration lock");
                sqlx::query(&sql)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| MigrationError::database("could not lock database", e))?;
                Ok(())
            }
            None => {
                warn!(
                    tag,
                    "no lock template registered, concurrent migrations are not serialized"
                );
                Ok(())
            }
        }
    }

    /// Release the migration lock on the given connection.
    ///
    /// Mirrors [`lock`](LockCoordinator::lock); invoked unconditionally
    /// during cleanup.
    pub async fn unlock(
        &self,
        conn: &mut AnyConnection,
        tag: &str,
        table: &str,
    ) -> MigrationResult<()> {
        if let Some(sql) = self.templates.unlock_statement(tag, table) {
            debug!(tag, %sql, "releasing migration lock");
            sqlx::query(&sql)
                .execute(&mut *conn)
                .await
                .map_err(|e| MigrationError::database("could not unlock database", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_templates_cover_mysql() {
        let templates = LockTemplates::bundled();
        assert_eq!(
            templates.lock_statement("mysql", "db_version").as_deref(),
            Some("LOCK TABLES db_version WRITE")
        );
        assert_eq!(
            templates.unlock_statement("mysql", "db_version").as_deref(),
            Some("UNLOCK TABLES")
        );
    }

    #[test]
    fn postgresql_lock_is_released_by_commit() {
        let templates = LockTemplates::bundled();
        assert_eq!(
            templates.lock_statement("postgresql", "schema_rev").as_deref(),
            Some("LOCK TABLE schema_rev IN ACCESS EXCLUSIVE MODE")
        );
        assert!(templates.unlock_statement("postgresql", "schema_rev").is_none());
    }

    #[test]
    fn unknown_tags_have_no_templates() {
        let templates = LockTemplates::bundled();
        assert!(templates.lock_statement("sqlite", "db_version").is_none());
        assert!(templates.unlock_statement("sqlite", "db_version").is_none());
    }

    #[test]
    fn custom_table_substitutes_placeholder() {
        let templates = LockTemplates::new(HashMap::from([(
            "lock_sqlite".to_string(),
            "-- pretend lock on :table".to_string(),
        )]));
        assert_eq!(
            templates.lock_statement("sqlite", "versions").as_deref(),
            Some("-- pretend lock on versions")
        );
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            LockTemplates::from_json("not json"),
            Err(MigrationError::Configuration(_))
        ));
    }
}
