//! Schema Validator & Corrector
//!
//! Last gate before execution. Every statement ends in exactly one of:
//! - `Valid`: all identifiers resolve to the caller's scope
//! - `Corrected`: hallucinated identifiers were rewritten to their closest
//!   allowed equivalent (similarity >= 0.5); the rewrite must be validated again
//! - `Rejected`: with a reason naming the offending identifier
//!
//! Identifiers are pulled out with [`super::sql_extractor`], not a full parser.

use super::identifier_matcher::IdentifierMatcher;
use super::sql_extractor::{
    bare_identifiers, extract_aliases, extract_cte_names, extract_select_blocks, extract_tables,
    mask_literals, qualified_refs, replace_identifier, replace_qualified_column, ColumnRef,
};
use crate::domain::access_policy::AccessScope;
use crate::domain::error::{AppError, Result};
use crate::domain::schema::SchemaCatalog;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, info, warn};

static INTERVAL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\binterval\b").unwrap());

static DATE_FUNCTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(to_char|to_number|date_part|extract)\s*\(").unwrap()
});

static SYSTEM_PRAGMA_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*pragma\s+(?:table_info|foreign_key_list|index_list)\s*\(").unwrap()
});

static SYSTEM_OBJECT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:sqlite_master|sqlite_schema|pragma_table_info\s*\(|pragma_foreign_key_list\s*\(|pragma_index_list\s*\(|information_schema\s*\.)",
    )
    .unwrap()
});

static FROM_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bfrom\b").unwrap());

const SYSTEM_TABLES: &[&str] = &["sqlite_master", "sqlite_schema"];

/// What the validator decided about one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Valid,
    Corrected {
        statement: String,
        explanation: String,
    },
    Rejected(AppError),
}

/// A statement cleared for execution, with the correction note if one was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedStatement {
    pub statement: String,
    pub correction: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct ColumnCorrection {
    /// Qualifier as written in the statement; `None` for bare columns
    qualifier: Option<String>,
    table: String,
    from: String,
    to: String,
}

pub struct SchemaValidator<'a> {
    scope: &'a AccessScope,
    catalog: &'a SchemaCatalog,
    matcher: IdentifierMatcher,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(scope: &'a AccessScope, catalog: &'a SchemaCatalog) -> Self {
        Self {
            scope,
            catalog,
            matcher: IdentifierMatcher::default(),
        }
    }

    pub fn with_matcher(mut self, matcher: IdentifierMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Validate and, if needed, correct once. A rewrite that still wants
    /// another correction is rejected with `CorrectionLimit`.
    pub fn validate_with_correction(&self, sql: &str) -> Result<ValidatedStatement> {
        match self.validate(sql) {
            ValidationOutcome::Valid => Ok(ValidatedStatement {
                statement: sql.to_string(),
                correction: None,
            }),
            ValidationOutcome::Rejected(err) => Err(err),
            ValidationOutcome::Corrected {
                statement,
                explanation,
            } => match self.validate(&statement) {
                ValidationOutcome::Valid => Ok(ValidatedStatement {
                    statement,
                    correction: Some(explanation),
                }),
                ValidationOutcome::Rejected(err) => Err(err),
                ValidationOutcome::Corrected {
                    explanation: second,
                    ..
                } => {
                    warn!(
                        first = %explanation,
                        second = %second,
                        "Statement needed a second correction round"
                    );
                    Err(AppError::CorrectionLimit(second))
                }
            },
        }
    }

    pub fn validate(&self, sql: &str) -> ValidationOutcome {
        match self.check(sql) {
            Ok(outcome) => outcome,
            Err(err) => {
                info!(role = %self.scope.role(), reason = %err, "Statement rejected");
                ValidationOutcome::Rejected(err)
            }
        }
    }

    fn check(&self, sql: &str) -> Result<ValidationOutcome> {
        if sql.trim().is_empty() {
            return Err(AppError::MalformedSql("Empty SQL query".to_string()));
        }

        check_dialect(sql)?;

        if is_system_query(sql) {
            check_structure(sql)?;
            debug!(statement = %sql, "System query allowed");
            return Ok(ValidationOutcome::Valid);
        }

        let ctes = extract_cte_names(sql);
        let tables: Vec<String> = extract_tables(sql)
            .into_iter()
            .filter(|t| !ctes.contains(t))
            .collect();

        if let Some(outcome) = self.correct_tables(sql, &tables)? {
            return Ok(outcome);
        }

        if tables.is_empty() {
            return Err(AppError::MalformedSql(
                "No allowed tables found in query".to_string(),
            ));
        }

        self.check_hidden_columns(sql, &tables)?;

        let corrections = self.collect_column_corrections(sql, &tables, &ctes)?;
        if !corrections.is_empty() {
            let statement = apply_column_corrections(sql, &corrections);
            check_structure(&statement)?;
            let explanation = describe_column_corrections(&corrections);
            info!(
                role = %self.scope.role(),
                corrections = corrections.len(),
                statement = %statement,
                "Auto-corrected hallucinated columns"
            );
            return Ok(ValidationOutcome::Corrected {
                statement,
                explanation,
            });
        }

        check_structure(sql)?;
        Ok(ValidationOutcome::Valid)
    }

    /// Map every table outside the scope to its closest allowed table, or fail.
    fn correct_tables(&self, sql: &str, tables: &[String]) -> Result<Option<ValidationOutcome>> {
        let mut substitutions: Vec<(String, String)> = Vec::new();

        for table in tables {
            if self.scope.resolve_table(table).is_some() {
                continue;
            }
            if self.catalog.contains_table(table) {
                return Err(AppError::AccessDenied(format!("table '{}'", table)));
            }
            let best = self
                .matcher
                .best_match(table, self.scope.tables().iter().map(String::as_str))
                .ok_or_else(|| AppError::UnresolvableTable {
                    table: table.clone(),
                })?;
            debug!(
                hallucinated = %table,
                corrected = %best.name,
                score = best.score,
                "Table substitution"
            );
            substitutions.push((table.clone(), best.name));
        }

        if substitutions.is_empty() {
            return Ok(None);
        }

        let mut statement = sql.to_string();
        for (from, to) in &substitutions {
            statement = replace_identifier(&statement, from, to);
        }
        check_structure(&statement)?;

        let described: Vec<String> = substitutions
            .iter()
            .map(|(from, to)| format!("'{}' (auto-corrected to '{}')", from, to))
            .collect();
        let explanation = format!(
            "The model tried to use table(s) {}. The query was auto-corrected to use your schema.",
            described.join(", ")
        );
        info!(
            role = %self.scope.role(),
            corrections = substitutions.len(),
            statement = %statement,
            "Auto-corrected hallucinated tables"
        );
        Ok(Some(ValidationOutcome::Corrected {
            statement,
            explanation,
        }))
    }

    fn collect_column_corrections(
        &self,
        sql: &str,
        tables: &[String],
        ctes: &[String],
    ) -> Result<Vec<ColumnCorrection>> {
        let aliases = extract_aliases(sql);
        let mut corrections: Vec<ColumnCorrection> = Vec::new();

        let mut qualified: Vec<ColumnRef> = Vec::new();
        // (table of the enclosing SELECT block, column)
        let mut unqualified: Vec<(Option<String>, String)> = Vec::new();
        for block in extract_select_blocks(sql) {
            for item in &block.items {
                for r in item.column_refs() {
                    if r.qualifier.is_none() {
                        unqualified.push((block.table.clone(), r.column));
                    } else if !qualified.contains(&r) {
                        qualified.push(r);
                    }
                }
            }
        }
        for r in qualified_refs(sql) {
            if !qualified.contains(&r) {
                qualified.push(r);
            }
        }

        for r in &qualified {
            let Some(qualifier) = r.qualifier.as_deref() else {
                continue;
            };
            let Some(table) = self.resolve_qualifier(qualifier, &aliases, ctes)? else {
                continue;
            };
            if let Some(to) = self.check_column(&table, &r.column)? {
                push_unique(
                    &mut corrections,
                    ColumnCorrection {
                        qualifier: Some(qualifier.to_string()),
                        table,
                        from: r.column.clone(),
                        to,
                    },
                );
            }
        }

        // Bare columns belong to their block's FROM table unless another
        // referenced table has them. Columns selected from a CTE or a derived
        // table are not checked here.
        let first_table = tables.first().and_then(|t| self.scope.resolve_table(t));
        for (block_table, column) in &unqualified {
            let main_table = match block_table {
                Some(t) if ctes.contains(t) => continue,
                Some(t) => self.scope.resolve_table(t).or(first_table),
                None => continue,
            };
            let Some(main_table) = main_table.map(str::to_string) else {
                continue;
            };
            let known_elsewhere = tables.iter().any(|t| {
                self.scope.resolve_table(t).is_some()
                    && self
                        .scope
                        .visible_columns(t, self.catalog)
                        .iter()
                        .any(|c| c.eq_ignore_ascii_case(column))
            });
            if known_elsewhere {
                continue;
            }
            if let Some(to) = self.check_column(&main_table, column)? {
                push_unique(
                    &mut corrections,
                    ColumnCorrection {
                        qualifier: None,
                        table: main_table,
                        from: column.clone(),
                        to,
                    },
                );
            }
        }

        Ok(corrections)
    }

    /// Any bare identifier, wherever it appears, that names a column of a
    /// referenced table the role cannot see. Exempt when another referenced
    /// table exposes a column of that name.
    fn check_hidden_columns(&self, sql: &str, tables: &[String]) -> Result<()> {
        let referenced: Vec<&str> = tables
            .iter()
            .filter_map(|t| self.scope.resolve_table(t))
            .collect();
        let visible: Vec<String> = referenced
            .iter()
            .flat_map(|t| self.scope.visible_columns(t, self.catalog))
            .map(|c| c.to_lowercase())
            .collect();

        for identifier in bare_identifiers(sql) {
            if visible.contains(&identifier) {
                continue;
            }
            let owner = referenced.iter().find(|t| {
                self.catalog
                    .table(t)
                    .and_then(|schema| schema.column(&identifier))
                    .is_some()
            });
            if let Some(table) = owner {
                return Err(AppError::AccessDenied(format!(
                    "column '{}' of table '{}'",
                    identifier, table
                )));
            }
        }
        Ok(())
    }

    /// Resolve `t` in `t.col` to an allowed table. CTE names are skipped.
    fn resolve_qualifier(
        &self,
        qualifier: &str,
        aliases: &HashMap<String, String>,
        ctes: &[String],
    ) -> Result<Option<String>> {
        let lower = qualifier.to_lowercase();
        if ctes.contains(&lower) {
            return Ok(None);
        }
        let table = aliases.get(&lower).cloned().unwrap_or(lower);
        if let Some(resolved) = self.scope.resolve_table(&table) {
            return Ok(Some(resolved.to_string()));
        }
        if self.catalog.contains_table(&table) {
            return Err(AppError::AccessDenied(format!("table '{}'", table)));
        }
        Err(AppError::UnresolvableTable {
            table: qualifier.to_string(),
        })
    }

    /// `Ok(None)` when the column is allowed as written, `Ok(Some(name))` when
    /// it should be rewritten to `name`.
    fn check_column(&self, table: &str, column: &str) -> Result<Option<String>> {
        let allowed = self.scope.visible_columns(table, self.catalog);
        if allowed.is_empty() || allowed.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            return Ok(None);
        }
        let exists = self
            .catalog
            .table(table)
            .and_then(|t| t.column(column))
            .is_some();
        if exists {
            return Err(AppError::AccessDenied(format!(
                "column '{}' of table '{}'",
                column, table
            )));
        }
        let best = self
            .matcher
            .best_match(column, allowed.iter().map(String::as_str))
            .ok_or_else(|| AppError::UnresolvableColumn {
                table: table.to_string(),
                column: column.to_string(),
            })?;
        debug!(
            table = %table,
            hallucinated = %column,
            corrected = %best.name,
            score = best.score,
            "Column substitution"
        );
        Ok(Some(best.name))
    }
}

fn check_dialect(sql: &str) -> Result<()> {
    let masked = mask_literals(sql);
    if INTERVAL_PATTERN.is_match(&masked) {
        return Err(AppError::DialectError(
            "INTERVAL syntax is not supported. Use date('now', '-1 month') instead.".to_string(),
        ));
    }
    if let Some(caps) = DATE_FUNCTION_PATTERN.captures(&masked) {
        return Err(AppError::DialectError(format!(
            "{}() is not supported. Use strftime('%Y-%m-%d', column) or date(column) instead.",
            caps[1].to_uppercase()
        )));
    }
    Ok(())
}

/// Introspection statements: the three column/key/index pragmas, or reads
/// whose only tables are catalog tables.
fn is_system_query(sql: &str) -> bool {
    let masked = mask_literals(sql);
    if SYSTEM_PRAGMA_PATTERN.is_match(&masked) {
        return true;
    }
    if !SYSTEM_OBJECT_PATTERN.is_match(&masked) {
        return false;
    }
    extract_tables(sql)
        .iter()
        .all(|t| SYSTEM_TABLES.contains(&t.as_str()))
}

fn check_structure(sql: &str) -> Result<()> {
    let masked = mask_literals(sql);
    let open = masked.matches('(').count();
    let close = masked.matches(')').count();
    if open != close {
        return Err(AppError::MalformedSql("Unbalanced parentheses".to_string()));
    }
    if masked.trim_start().to_lowercase().starts_with("select") && !FROM_PATTERN.is_match(&masked)
    {
        return Err(AppError::MalformedSql(
            "SELECT query missing FROM clause".to_string(),
        ));
    }
    if let Some(c) = masked.chars().find(|c| matches!(c, '{' | '}' | '[' | ']')) {
        return Err(AppError::MalformedSql(format!(
            "Invalid character '{}' in SQL query",
            c
        )));
    }
    Ok(())
}

fn push_unique(corrections: &mut Vec<ColumnCorrection>, correction: ColumnCorrection) {
    if !corrections.contains(&correction) {
        corrections.push(correction);
    }
}

fn apply_column_corrections(sql: &str, corrections: &[ColumnCorrection]) -> String {
    let mut statement = sql.to_string();
    for c in corrections {
        statement = match &c.qualifier {
            Some(q) => replace_qualified_column(&statement, q, &c.from, &c.to),
            None => replace_identifier(&statement, &c.from, &c.to),
        };
    }
    statement
}

fn describe_column_corrections(corrections: &[ColumnCorrection]) -> String {
    let described: Vec<String> = corrections
        .iter()
        .map(|c| format!("'{}' (auto-corrected to '{}.{}')", c.from, c.table, c.to))
        .collect();
    format!(
        "The model tried to use non-existent column(s) {}. The query was auto-corrected to use your schema.",
        described.join(", ")
    )
}
