//! Resource resolution
//!
//! Finds the migration unit to run for a version step. Each step tries two
//! directions: `from(V)`, a unit that starts exactly at the current version,
//! then `to(V+1)`, a unit defined by the version it produces. Within a
//! direction, database-specific resources beat generic ones and routines
//! beat scripts, giving the fixed priority order:
//!
//! 1. `<root>.<db>.MigrateFrom<V>` (routine)
//! 2. `<root>/<db>/migratefrom<V>.sql`
//! 3. `<root>/<db>/migratefrom<V>.<ext>` per registered script engine
//! 4. `<root>.MigrateFrom<V>` (routine)
//! 5. `<root>/migratefrom<V>.sql`
//! 6. `<root>/migratefrom<V>.<ext>`
//!
//! then the same six with `MigrateTo<V+1>` / `migrateto<V+1>`. The first
//! hit wins; resolution happens on demand every loop iteration and nothing
//! is cached.

use std::sync::Arc;

use tracing::debug;

use crate::error::MigrationResult;
use crate::routine::{MigrationRoutine, RoutineRegistry, ScriptEngine, ScriptEngineRegistry};
use crate::script::ScriptStore;

/// Direction of a migration unit's identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A unit assumed to start exactly at this version
    From(i64),
    /// A unit whose job is to bring the database up to this version
    To(i64),
}

impl Direction {
    /// Routine name suffix, e.g. `MigrateFrom3` or `MigrateTo4`
    fn routine_suffix(&self) -> String {
        match self {
            Direction::From(version) => format!("MigrateFrom{}", version),
            Direction::To(version) => format!("MigrateTo{}", version),
        }
    }

    /// Script file stem, e.g. `migratefrom3` or `migrateto4`
    fn script_stem(&self) -> String {
        match self {
            Direction::From(version) => format!("migratefrom{}", version),
            Direction::To(version) => format!("migrateto{}", version),
        }
    }
}

/// Normalize a connection-reported database product name into the tag used
/// for database-specific resources: lower-cased, non-alphanumeric stripped
pub fn database_tag(product_name: &str) -> String {
    product_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// A resolved migration unit, discarded after one execution
pub(crate) enum MigrationUnit {
    Routine {
        name: String,
        routine: Box<dyn MigrationRoutine>,
    },
    Script {
        name: String,
        source: String,
    },
    External {
        name: String,
        engine: Arc<dyn ScriptEngine>,
        source: String,
    },
}

impl MigrationUnit {
    pub(crate) fn name(&self) -> &str {
        match self {
            MigrationUnit::Routine { name, .. } => name,
            MigrationUnit::Script { name, .. } => name,
            MigrationUnit::External { name, .. } => name,
        }
    }
}

/// One-shot resolver over the registries for a single migration attempt
pub(crate) struct Resolver<'a> {
    root: &'a str,
    tag: &'a str,
    routines: &'a RoutineRegistry,
    engines: &'a ScriptEngineRegistry,
    scripts: &'a ScriptStore,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        root: &'a str,
        tag: &'a str,
        routines: &'a RoutineRegistry,
        engines: &'a ScriptEngineRegistry,
        scripts: &'a ScriptStore,
    ) -> Self {
        Self {
            root,
            tag,
            routines,
            engines,
            scripts,
        }
    }

    /// Resolve the unit for one version step: all `from(V)` strategies,
    /// then all `to(V+1)` strategies, first hit wins
    pub(crate) fn resolve_step(&self, version: i64) -> MigrationResult<Option<MigrationUnit>> {
        for direction in [Direction::From(version), Direction::To(version + 1)] {
            if let Some(unit) = self.resolve(direction)? {
                debug!(version, unit = unit.name(), "resolved migration unit");
                return Ok(Some(unit));
            }
        }
        Ok(None)
    }

    fn resolve(&self, direction: Direction) -> MigrationResult<Option<MigrationUnit>> {
        for scope in [Some(self.tag), None] {
            let name = routine_name(self.root, scope, direction);
            if let Some(routine) = self.routines.instantiate(&name) {
                return Ok(Some(MigrationUnit::Routine { name, routine }));
            }

            let path = script_path(self.root, scope, direction, "sql");
            if let Some(source) = self.scripts.lookup(&path)? {
                return Ok(Some(MigrationUnit::Script { name: path, source }));
            }

            for engine in self.engines.iter() {
                let path = script_path(self.root, scope, direction, engine.extension());
                if let Some(source) = self.scripts.lookup(&path)? {
                    return Ok(Some(MigrationUnit::External {
                        name: path,
                        engine: engine.clone(),
                        source,
                    }));
                }
            }
        }
        Ok(None)
    }
}

/// Routine name for a direction: `<root>.<db>.MigrateFrom<V>` when scoped
/// to a database, `<root>.MigrateFrom<V>` otherwise
fn routine_name(root: &str, scope: Option<&str>, direction: Direction) -> String {
    match scope {
        Some(db) => format!("{}.{}.{}", root, db, direction.routine_suffix()),
        None => format!("{}.{}", root, direction.routine_suffix()),
    }
}

/// Script path for a direction: `<root>/<db>/migratefrom<V>.<ext>` when
/// scoped to a database, `<root>/migratefrom<V>.<ext>` otherwise
fn script_path(root: &str, scope: Option<&str>, direction: Direction, extension: &str) -> String {
    match scope {
        Some(db) => format!("{}/{}/{}.{}", root, db, direction.script_stem(), extension),
        None => format!("{}/{}.{}", root, direction.script_stem(), extension),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::context::MigrationContext;

    #[test]
    fn normalizes_product_names() {
        assert_eq!(database_tag("PostgreSQL"), "postgresql");
        assert_eq!(database_tag("MySQL"), "mysql");
        assert_eq!(database_tag("SQLite"), "sqlite");
        assert_eq!(database_tag("Microsoft SQL Server"), "microsoftsqlserver");
        assert_eq!(database_tag("DB2/LINUXX8664"), "db2linuxx8664");
    }

    #[test]
    fn routine_names_are_bit_exact() {
        assert_eq!(
            routine_name("com.acme.db", Some("mysql"), Direction::From(3)),
            "com.acme.db.mysql.MigrateFrom3"
        );
        assert_eq!(
            routine_name("com.acme.db", None, Direction::To(4)),
            "com.acme.db.MigrateTo4"
        );
    }

    #[test]
    fn script_paths_are_bit_exact() {
        assert_eq!(
            script_path("db/migrations", Some("postgresql"), Direction::From(0), "sql"),
            "db/migrations/postgresql/migratefrom0.sql"
        );
        assert_eq!(
            script_path("db/migrations", None, Direction::To(1), "sql"),
            "db/migrations/migrateto1.sql"
        );
    }

    struct NoopRoutine;

    #[async_trait]
    impl crate::routine::MigrationRoutine for NoopRoutine {
        async fn migrate(&self, _ctx: &mut MigrationContext<'_>) -> MigrationResult<()> {
            Ok(())
        }
    }

    #[test]
    fn database_specific_script_beats_generic_routine() {
        let mut routines = RoutineRegistry::new();
        routines.register("pkg.MigrateFrom1", || Box::new(NoopRoutine));

        let mut scripts = ScriptStore::new();
        scripts.insert("pkg/mysql/migratefrom1.sql", "SELECT 1;");

        let engines = ScriptEngineRegistry::new();
        let resolver = Resolver::new("pkg", "mysql", &routines, &engines, &scripts);

        let unit = resolver.resolve_step(1).unwrap().unwrap();
        assert_eq!(unit.name(), "pkg/mysql/migratefrom1.sql");
    }

    #[test]
    fn generic_routine_beats_generic_script() {
        let mut routines = RoutineRegistry::new();
        routines.register("pkg.MigrateFrom1", || Box::new(NoopRoutine));

        let mut scripts = ScriptStore::new();
        scripts.insert("pkg/migratefrom1.sql", "SELECT 1;");

        let engines = ScriptEngineRegistry::new();
        let resolver = Resolver::new("pkg", "mysql", &routines, &engines, &scripts);

        let unit = resolver.resolve_step(1).unwrap().unwrap();
        assert_eq!(unit.name(), "pkg.MigrateFrom1");
    }

    #[test]
    fn from_direction_beats_to_direction() {
        let mut scripts = ScriptStore::new();
        scripts.insert("pkg/migratefrom2.sql", "SELECT 1;");
        scripts.insert("pkg/migrateto3.sql", "SELECT 2;");

        let routines = RoutineRegistry::new();
        let engines = ScriptEngineRegistry::new();
        let resolver = Resolver::new("pkg", "sqlite", &routines, &engines, &scripts);

        let unit = resolver.resolve_step(2).unwrap().unwrap();
        assert_eq!(unit.name(), "pkg/migratefrom2.sql");
    }

    #[test]
    fn falls_through_to_destination_version() {
        let mut scripts = ScriptStore::new();
        scripts.insert("pkg/migrateto3.sql", "SELECT 2;");

        let routines = RoutineRegistry::new();
        let engines = ScriptEngineRegistry::new();
        let resolver = Resolver::new("pkg", "sqlite", &routines, &engines, &scripts);

        let unit = resolver.resolve_step(2).unwrap().unwrap();
        assert_eq!(unit.name(), "pkg/migrateto3.sql");
    }

    #[test]
    fn unresolvable_step_is_none() {
        let routines = RoutineRegistry::new();
        let engines = ScriptEngineRegistry::new();
        let scripts = ScriptStore::new();
        let resolver = Resolver::new("pkg", "sqlite", &routines, &engines, &scripts);

        assert!(resolver.resolve_step(9).unwrap().is_none());
    }
}
