//! Migration configuration
//!
//! Plain configuration struct for the migration driver. The backend is
//! selected from the URL scheme, so there is no separate driver setting.

use serde::Deserialize;

use crate::error::{MigrationError, MigrationResult};

/// Default name of the table holding the single schema version row
pub const DEFAULT_VERSION_TABLE: &str = "db_version";

/// Configuration for a migration run
///
/// Either `version` must be set or `auto` enabled. When both are set, auto
/// mode wins and the target version is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// Database URL; unused when an external pool is supplied
    pub url: String,
    /// Database user, applied to the URL when set
    pub user: Option<String>,
    /// Database password, applied to the URL when set
    pub password: Option<String>,
    /// Target version the client code expects
    pub version: Option<i64>,
    /// Run every resolvable migration instead of stopping at a target
    pub auto: bool,
    /// Name of the table holding the schema version row
    pub table: String,
    /// Resolution root: directory for scripts, dotted prefix for routines
    pub root: String,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: None,
            password: None,
            version: None,
            auto: false,
            table: DEFAULT_VERSION_TABLE.to_string(),
            root: String::new(),
        }
    }
}

impl MigrateConfig {
    /// Create a configuration with the required settings filled in
    pub fn new(root: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Check the required settings before a run
    pub(crate) fn validate(&self, has_pool: bool) -> MigrationResult<()> {
        if self.root.is_empty() {
            return Err(MigrationError::Configuration(
                "a resolution root is required".to_string(),
            ));
        }
        if !has_pool && self.url.is_empty() {
            return Err(MigrationError::Configuration(
                "a database URL is required when no pool is supplied".to_string(),
            ));
        }
        if !self.auto && self.version.is_none() {
            return Err(MigrationError::Configuration(
                "you must either set a target version or enable auto migration".to_string(),
            ));
        }
        if let Some(version) = self.version {
            if version < 0 {
                return Err(MigrationError::Configuration(format!(
                    "target version must be non-negative, got {}",
                    version
                )));
            }
        }
        Ok(())
    }
}
