//! Migration driver
//!
//! Orchestrates one migration attempt: open a connection, turn autocommit
//! off, lock the version table, then loop resolve → execute → verify the
//! version advanced until the target is reached or nothing further
//! resolves. Cleanup (unlock, commit, close) always runs, whatever path
//! exits the loop.
//!
//! Multiple callers may run `migrate()` concurrently against the same
//! database; on database products with a registered lock template the lock
//! plus the single transaction guarantee at most one of them performs
//! schema-mutating work at a time, and latecomers observe the migrated
//! version and take the no-op path.

use std::sync::Arc;

use once_cell::sync::Lazy;
use sqlx::any::Any;
use sqlx::{AnyConnection, AnyPool};
use sqlx::pool::PoolConnection;
use sqlx::Connection;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::MigrateConfig;
use crate::context::MigrationContext;
use crate::error::{MigrationError, MigrationResult};
use crate::lock::{LockCoordinator, LockTemplates};
use crate::resolver::{database_tag, MigrationUnit, Resolver};
use crate::routine::{MigrationRoutine, ScriptEngine, ScriptEngineRegistry, RoutineRegistry};
use crate::script::{self, ScriptStore};
use crate::version::VersionStore;

/// sqlx requires the Any drivers to be installed once per process
static DRIVERS: Lazy<()> = Lazy::new(sqlx::any::install_default_drivers);

/// Install sqlx's default `Any` drivers, once per process.
///
/// [`Migrate::migrate`] calls this automatically before connecting; call it
/// yourself only when you construct an [`AnyPool`] to hand to
/// [`Migrate::with_pool`] before the first migration runs.
pub fn install_drivers() {
    Lazy::force(&DRIVERS);
}

/// The migration driver.
///
/// Holds the configuration and the registries migration units resolve
/// from. Nothing is cached across calls: every [`migrate`](Migrate::migrate)
/// re-reads the version and re-resolves each step.
pub struct Migrate {
    config: MigrateConfig,
    routines: RoutineRegistry,
    engines: ScriptEngineRegistry,
    scripts: ScriptStore,
    lock_templates: LockTemplates,
    pool: Option<AnyPool>,
}

impl Migrate {
    /// Create a driver that opens its own connection from the configured URL
    pub fn new(config: MigrateConfig) -> Self {
        Self {
            config,
            routines: RoutineRegistry::new(),
            engines: ScriptEngineRegistry::new(),
            scripts: ScriptStore::new(),
            lock_templates: LockTemplates::bundled().clone(),
            pool: None,
        }
    }

    /// Create a driver that acquires its connection from an external pool
    pub fn with_pool(config: MigrateConfig, pool: AnyPool) -> Self {
        Self {
            pool: Some(pool),
            ..Self::new(config)
        }
    }

    /// The driver's configuration
    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    /// Register a migration routine factory under a resolvable name,
    /// e.g. `com.acme.db.MigrateTo4`
    pub fn register_routine<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn MigrationRoutine> + Send + Sync + 'static,
    {
        self.routines.register(name, factory);
    }

    /// Register a script engine for alternate-language migration scripts
    pub fn register_engine(&mut self, engine: Arc<dyn ScriptEngine>) {
        self.engines.register(engine);
    }

    /// Register embedded script text under a resolution path
    pub fn embed_script(&mut self, path: impl Into<String>, text: impl Into<String>) {
        self.scripts.insert(path, text);
    }

    /// Replace the bundled lock templates with a custom registry
    pub fn set_lock_templates(&mut self, templates: LockTemplates) {
        self.lock_templates = templates;
    }

    /// Migrate the database up to the configured target version, or as far
    /// as migrations resolve in auto-advance mode.
    ///
    /// Returns whether at least one migration step executed.
    pub async fn migrate(&self) -> MigrationResult<bool> {
        self.config.validate(self.pool.is_some())?;

        let mut conn = self.connect().await?;
        let tag = database_tag(conn.as_conn().backend_name());
        let locks = LockCoordinator::new(&self.lock_templates);
        let store = VersionStore::new(&self.config.table);

        let outcome = self.run(conn.as_conn(), &tag, &locks, &store).await;
        let outcome = self.cleanup(conn.as_conn(), &tag, &locks, outcome).await;
        conn.close().await;
        outcome
    }

    /// Whether [`migrate`](Migrate::migrate) would do any work.
    ///
    /// Use this to interact with a user or fail fast when the database is
    /// behind; for automated migration call `migrate()` directly.
    pub async fn needs_migrate(&self) -> MigrationResult<bool> {
        self.config.validate(self.pool.is_some())?;

        let mut conn = self.connect().await?;
        let outcome = self.check(conn.as_conn()).await;
        if let Err(e) = sqlx::query("COMMIT").execute(conn.as_conn()).await {
            error!(error = %e, "failed to commit after version check");
        }
        conn.close().await;
        outcome
    }

    async fn check(&self, conn: &mut AnyConnection) -> MigrationResult<bool> {
        self.begin(conn).await?;
        let version = VersionStore::new(&self.config.table).current(conn).await?;
        self.needs_migrate_at(version)
    }

    /// The migration loop proper, run inside the single transaction
    async fn run(
        &self,
        conn: &mut AnyConnection,
        tag: &str,
        locks: &LockCoordinator<'_>,
        store: &VersionStore<'_>,
    ) -> MigrationResult<bool> {
        // All DDL runs in one transaction so a failed migration can be
        // rolled back. Not every database transacts DDL; on those a failed
        // script can leave partial work behind, which is why scripts should
        // be written to be safe to re-run.
        self.begin(conn).await?;

        // A version 0 database has no row to race over, so locking starts
        // only once a version table exists
        let version = store.current(conn).await?;
        if version > 0 {
            locks.lock(conn, tag, &self.config.table).await?;
        }

        let resolver = Resolver::new(
            &self.config.root,
            tag,
            &self.routines,
            &self.engines,
            &self.scripts,
        );

        let mut migrated = false;
        loop {
            let version = store.current(conn).await?;
            if !self.needs_migrate_at(version)? {
                break;
            }

            let Some(unit) = resolver.resolve_step(version)? else {
                if self.config.auto {
                    debug!(version, "no further migration found, auto-advance complete");
                    break;
                }
                return Err(MigrationError::NoMigrationFound { version });
            };

            self.execute_unit(conn, tag, version, unit).await?;

            let new_version = store.advance(conn, locks, tag, version).await?;
            if new_version <= version {
                return Err(MigrationError::VersionDidNotAdvance {
                    previous: version,
                    current: new_version,
                });
            }
            info!(from = version, to = new_version, "migrated database");
            migrated = true;
        }

        Ok(migrated)
    }

    /// Unlock and commit; failures here are logged rather than raised
    /// because the connection is being discarded regardless, except that a
    /// failed unlock surfaces when the migration itself succeeded.
    async fn cleanup(
        &self,
        conn: &mut AnyConnection,
        tag: &str,
        locks: &LockCoordinator<'_>,
        outcome: MigrationResult<bool>,
    ) -> MigrationResult<bool> {
        let unlocked = locks.unlock(conn, tag, &self.config.table).await;

        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            error!(error = %e, "failed to commit migration transaction");
        }

        match (outcome, unlocked) {
            (Ok(migrated), Ok(())) => Ok(migrated),
            (Ok(_), Err(unlock_err)) => Err(unlock_err),
            (Err(migrate_err), unlocked) => {
                if let Err(e) = unlocked {
                    warn!(error = %e, "failed to release migration lock during cleanup");
                }
                Err(migrate_err)
            }
        }
    }

    async fn execute_unit(
        &self,
        conn: &mut AnyConnection,
        tag: &str,
        version: i64,
        unit: MigrationUnit,
    ) -> MigrationResult<()> {
        match unit {
            MigrationUnit::Routine { name, routine } => {
                info!(routine = %name, version, "running migration routine");
                let mut ctx =
                    MigrationContext::new(conn, tag, version, &self.config.table, &self.scripts);
                routine.migrate(&mut ctx).await
            }
            MigrationUnit::Script { name, source } => {
                info!(script = %name, version, "running migration script");
                let statements = script::statements_from(&source);
                script::run_statements(conn, &name, &statements).await
            }
            MigrationUnit::External {
                name,
                engine,
                source,
            } => {
                info!(script = %name, version, "running external migration script");
                let mut ctx =
                    MigrationContext::new(conn, tag, version, &self.config.table, &self.scripts);
                engine.run(&mut ctx, &source).await
            }
        }
    }

    /// Does the database need migrating from `current`?
    fn needs_migrate_at(&self, current: i64) -> MigrationResult<bool> {
        if self.config.auto {
            return Ok(true);
        }
        // validate() guarantees a target when auto mode is off
        let target = self.config.version.unwrap_or(current);
        if current == target {
            Ok(false)
        } else if current > target {
            Err(MigrationError::ClientBehindDatabase { target, current })
        } else {
            Ok(true)
        }
    }

    /// Turn autocommit off by opening the migration transaction
    async fn begin(&self, conn: &mut AnyConnection) -> MigrationResult<()> {
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrationError::database("could not open the migration transaction", e))?;
        Ok(())
    }

    async fn connect(&self) -> MigrationResult<EngineConnection> {
        Lazy::force(&DRIVERS);

        if let Some(pool) = &self.pool {
            let conn = pool.acquire().await.map_err(|e| {
                MigrationError::connectivity("could not acquire a connection from the supplied pool", e)
            })?;
            return Ok(EngineConnection::Pooled(conn));
        }

        let url = self.connect_url()?;
        let conn = AnyConnection::connect(url.as_str()).await.map_err(|e| {
            MigrationError::connectivity(
                format!("could not connect to database: {}", self.config.url),
                e,
            )
        })?;
        Ok(EngineConnection::Owned(conn))
    }

    /// The configured URL with credentials applied, when given separately
    fn connect_url(&self) -> MigrationResult<Url> {
        let mut url = Url::parse(&self.config.url).map_err(|e| {
            MigrationError::Configuration(format!(
                "invalid database URL '{}': {}",
                self.config.url, e
            ))
        })?;
        if let Some(user) = &self.config.user {
            url.set_username(user).map_err(|_| {
                MigrationError::Configuration(format!(
                    "database URL '{}' cannot carry credentials",
                    self.config.url
                ))
            })?;
        }
        if let Some(password) = &self.config.password {
            url.set_password(Some(password)).map_err(|_| {
                MigrationError::Configuration(format!(
                    "database URL '{}' cannot carry credentials",
                    self.config.url
                ))
            })?;
        }
        Ok(url)
    }
}

/// The connection a migration attempt exclusively owns for its lifetime
enum EngineConnection {
    Owned(AnyConnection),
    Pooled(PoolConnection<Any>),
}

impl EngineConnection {
    fn as_conn(&mut self) -> &mut AnyConnection {
        match self {
            EngineConnection::Owned(conn) => conn,
            EngineConnection::Pooled(conn) => &mut **conn,
        }
    }

    /// Close failures are a logged leak warning, never fatal
    async fn close(self) {
        match self {
            EngineConnection::Owned(conn) => {
                if let Err(e) = conn.close().await {
                    warn!(error = %e, "could not close the database connection, it may be leaked");
                }
            }
            // Dropping returns the connection to its pool
            EngineConnection::Pooled(conn) => drop(conn),
        }
    }
}
