//! Script migration units
//!
//! A script is an ordered sequence of SQL statements executed on the
//! migrating connection. Script text is found on the filesystem first (the
//! resolution root treated as a directory path), falling back to scripts
//! embedded in the binary through [`ScriptStore::insert`]. Lines beginning
//! with `#` or `--` are comments and are stripped before the text is
//! buffered; the whole script is buffered before statements are extracted,
//! so each statement executes exactly once. A trailing statement without a
//! terminator is not executed.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use sqlx::AnyConnection;
use tracing::{debug, warn};

use crate::error::{MigrationError, MigrationResult};
use crate::parser::SqlStatementParser;

/// Embedded script registry with filesystem passthrough.
///
/// Deployments that ship migrations inside the binary register them here
/// (typically with `include_str!`); paths present on the filesystem always
/// win.
#[derive(Debug, Default)]
pub struct ScriptStore {
    embedded: HashMap<String, String>,
}

impl ScriptStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register embedded script text under a resolution path
    pub fn insert(&mut self, path: impl Into<String>, text: impl Into<String>) {
        self.embedded.insert(path.into(), text.into());
    }

    /// Look up script text by resolution path: filesystem first, then the
    /// embedded registry. `Ok(None)` means the script does not exist; a
    /// script that exists but cannot be read is an error.
    pub fn lookup(&self, path: &str) -> MigrationResult<Option<String>> {
        let fs_path = Path::new(path);
        if fs_path.is_file() {
            let text = fs::read_to_string(fs_path)
                .with_context(|| format!("script {} exists but is unreadable", path))?;
            return Ok(Some(text));
        }
        Ok(self.embedded.get(path).cloned())
    }
}

/// Strip comment lines and split the script text into complete statements
pub(crate) fn statements_from(text: &str) -> Vec<String> {
    let mut parser = SqlStatementParser::new();
    for line in text.lines() {
        if line.starts_with('#') || line.starts_with("--") {
            continue;
        }
        parser.append(line);
        if !line.ends_with(';') {
            parser.append(" ");
        }
    }
    let statements = parser.pull_statements();
    if !parser.buffer().trim().is_empty() {
        warn!(
            fragment = parser.buffer().trim(),
            "script ends with an unterminated statement, it will not be executed"
        );
    }
    statements
}

/// Execute each statement in order on the given connection.
///
/// A failing statement aborts the script; already-executed statements are
/// not rolled back here, the enclosing migration transaction is the only
/// undo mechanism.
pub(crate) async fn run_statements(
    conn: &mut AnyConnection,
    script: &str,
    statements: &[String],
) -> MigrationResult<()> {
    for (position, sql) in statements.iter().enumerate() {
        if sql.is_empty() {
            continue;
        }
        debug!(script, position = position + 1, %sql, "executing statement");
        sqlx::query(sql)
            .execute(&mut *conn)
            .await
            .map_err(|e| MigrationError::StatementFailed {
                script: script.to_string(),
                index: position + 1,
                sql: sql.clone(),
                source: e,
            })?;
    }
    Ok(())
}
