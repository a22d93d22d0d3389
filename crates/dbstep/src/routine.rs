//! Migration routines and script engines
//!
//! A routine is a named executable piece of schema-change logic registered
//! under the same naming convention the resolver searches
//! (`<root>.<db>.MigrateFrom<V>`, `<root>.MigrateTo<V>`, ...). Routines are
//! registered as zero-argument factories and instantiated fresh for every
//! invocation, never cached across loop iterations.
//!
//! A script engine executes migration scripts authored in something other
//! than plain SQL. The engine itself is an external collaborator; the only
//! contract here is "given the context and the source text, succeed or
//! fail".

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::MigrationContext;
use crate::error::MigrationResult;

/// One executable piece of schema-change logic.
///
/// Implementations run arbitrary statements on the context's connection.
/// A routine that updates the version row itself must move it past the
/// value the auto-increment would have produced; otherwise the engine
/// assumes the routine advanced the schema by exactly one version.
#[async_trait]
pub trait MigrationRoutine: Send + Sync {
    /// Apply this migration against the context's connection
    async fn migrate(&self, ctx: &mut MigrationContext<'_>) -> MigrationResult<()>;
}

type RoutineFactory = Box<dyn Fn() -> Box<dyn MigrationRoutine> + Send + Sync>;

/// Registry mapping routine names to factories.
///
/// Replaces runtime class loading with an explicit registration table: a
/// routine resolves only if client code registered it under the exact name
/// the resolver derives for the version step.
#[derive(Default)]
pub struct RoutineRegistry {
    factories: HashMap<String, RoutineFactory>,
}

impl RoutineRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a routine factory under a resolvable name
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn MigrationRoutine> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Instantiate a fresh routine for the given name, if registered
    pub fn instantiate(&self, name: &str) -> Option<Box<dyn MigrationRoutine>> {
        self.factories.get(name).map(|factory| factory())
    }
}

impl std::fmt::Debug for RoutineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutineRegistry")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Executes migration scripts authored in an alternate language
#[async_trait]
pub trait ScriptEngine: Send + Sync {
    /// File extension (without the dot) this engine's scripts use
    fn extension(&self) -> &str;

    /// Execute the script source against the context's connection
    async fn run(&self, ctx: &mut MigrationContext<'_>, source: &str) -> MigrationResult<()>;
}

/// Registered script engines, tried in registration order
#[derive(Default)]
pub struct ScriptEngineRegistry {
    engines: Vec<Arc<dyn ScriptEngine>>,
}

impl ScriptEngineRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a script engine
    pub fn register(&mut self, engine: Arc<dyn ScriptEngine>) {
        self.engines.push(engine);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<dyn ScriptEngine>> {
        self.engines.iter()
    }
}

impl std::fmt::Debug for ScriptEngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngineRegistry")
            .field(
                "extensions",
                &self.engines.iter().map(|e| e.extension()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
