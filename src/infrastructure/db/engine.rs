//! Uniform execution interface over the supported relational engines.
//!
//! Statements arrive already validated and portable; nothing here rewrites
//! them. The read-only guard is the last line before the engine.

use crate::domain::error::{AppError, Result};
use crate::domain::query_result::QueryResult;
use crate::domain::schema::SchemaCatalog;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static WRITE_KEYWORD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|drop|alter|create|truncate|grant|revoke|attach|detach|vacuum|reindex)\b",
    )
    .unwrap()
});

static READ_PRAGMA_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^pragma\s+(table_info|foreign_key_list|index_list)\s*\(\s*[A-Za-z_][A-Za-z0-9_]*\s*\)\s*;?$")
        .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Sqlite,
    Mysql,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Sqlite => write!(f, "sqlite"),
            EngineKind::Mysql => write!(f, "mysql"),
        }
    }
}

#[async_trait]
pub trait SqlEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Run one statement and collect every row.
    async fn execute(&self, statement: &str) -> Result<QueryResult>;

    /// Introspect tables, columns and foreign keys.
    async fn load_catalog(&self) -> Result<SchemaCatalog>;

    /// First `limit` rows of `table`, used to build the row corpus.
    async fn sample_rows(&self, table: &str, limit: u32) -> Result<QueryResult>;
}

/// Blank out quoted text so keyword and `;` checks only see SQL.
fn mask_quoted(sql: &str) -> String {
    let mut masked = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    for ch in sql.chars() {
        match quote {
            Some(q) if ch == q => {
                quote = None;
                masked.push(ch);
            }
            Some(_) => masked.push(' '),
            None => {
                if ch == '\'' || ch == '"' || ch == '`' {
                    quote = Some(ch);
                }
                masked.push(ch);
            }
        }
    }
    masked
}

/// Only single `SELECT`/`WITH` statements and the schema-inspection pragmas
/// may reach the engine when the connection is read-only.
pub fn ensure_read_only(statement: &str) -> Result<()> {
    let masked = mask_quoted(statement.trim());
    let body = masked.trim_end().trim_end_matches(';');
    if body.contains(';') {
        return Err(AppError::ExecutionError(
            "Only a single statement may be executed".to_string(),
        ));
    }

    let lowered = body.trim_start_matches('(').trim_start().to_lowercase();
    if READ_PRAGMA_PATTERN.is_match(&lowered) {
        return Ok(());
    }
    if !(lowered.starts_with("select") || lowered.starts_with("with")) {
        return Err(AppError::ExecutionError(
            "Only SELECT queries are allowed".to_string(),
        ));
    }
    if let Some(found) = WRITE_KEYWORD_PATTERN.find(body) {
        return Err(AppError::ExecutionError(format!(
            "Query contains forbidden keyword: {}",
            found.as_str().to_uppercase()
        )));
    }
    Ok(())
}
