//! SQL Sanitizer
//!
//! Turns raw generation output into a single candidate statement:
//! - strips markdown code fences
//! - drops prose before the first statement keyword and after the first `;`
//! - collapses whitespace
//! - rewrites `ILIKE` to the portable `LIKE`
//! - excises JOIN clauses whose ON right-hand side is empty, `''` or NULL
//!
//! The output always ends with exactly one semicolon, and sanitizing an
//! already-sanitized statement returns it unchanged.

use super::sql_extractor::{extract_aliases, mask_literals, select_list_qualifiers};
use crate::domain::access_policy::AccessScope;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static FENCE_START_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*```\s*(?:sql\b)?").unwrap());

static FENCE_END_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```\s*$").unwrap());

static STATEMENT_START_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)\b(?:SELECT\b|WITH\s+(?:RECURSIVE\s+)?[`\w]+\s*(?:\([^)]*\)\s*)?AS\s*\(|INSERT\s+INTO\b|UPDATE\s+[`\w]+\s+SET\b|DELETE\s+FROM\b)",
    )
    .unwrap()
});

static WHITESPACE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static SPACE_BEFORE_SEMICOLON_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+;").unwrap());

static ILIKE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bILIKE\b").unwrap());

static INCOMPLETE_JOIN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\s*\b(?:(?:INNER|LEFT|RIGHT|FULL|CROSS)\s+(?:OUTER\s+)?)?JOIN\s+[`\w]+(?:\s+(?:AS\s+)?\w+)?\s+ON\s+[^=;]+?=\s*(?:''|""|NULL\b)?\s*(;|\)|,|$|\b(?:WHERE|GROUP|ORDER|LIMIT|HAVING|JOIN|INNER|LEFT|RIGHT|FULL|CROSS|UNION)\b)"#,
    )
    .unwrap()
});

static ENUMERATE_ALL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:show me all|list all|show all|display all|give me all)\b").unwrap()
});

fn collapse_whitespace(sql: &str) -> String {
    let collapsed = WHITESPACE_PATTERN.replace_all(sql, " ");
    SPACE_BEFORE_SEMICOLON_PATTERN
        .replace_all(collapsed.trim(), ";")
        .into_owned()
}

/// Clean raw model output into one statement, or `None` when no statement is present.
pub fn sanitize(raw: &str) -> Option<String> {
    let unfenced = FENCE_START_PATTERN.replace(raw, "");
    let unfenced = FENCE_END_PATTERN.replace(&unfenced, "");

    let start = STATEMENT_START_PATTERN.find(&unfenced)?.start();
    let mut sql = unfenced[start..].to_string();

    // Literal masking keeps byte offsets, so a `;` inside quotes is skipped.
    if let Some(end) = mask_literals(&sql).find(';') {
        sql.truncate(end + 1);
    }

    sql = collapse_whitespace(&sql);
    sql = ILIKE_PATTERN.replace_all(&sql, "LIKE").into_owned();
    sql = INCOMPLETE_JOIN_PATTERN
        .replace_all(&sql, " $1")
        .into_owned();
    sql = collapse_whitespace(&sql);

    let body = sql.trim_end_matches(';').trim_end();
    if body.is_empty() {
        return None;
    }
    Some(format!("{};", body))
}

/// Broad "enumerate everything" questions that should never need a join.
pub fn is_enumerate_all(question: &str) -> bool {
    ENUMERATE_ALL_PATTERN.is_match(question.trim().to_lowercase().as_str())
}

/// [`sanitize`] plus the simplicity fallback: an enumerate-all question whose
/// SELECT list spans more than one table becomes `SELECT * FROM <table>;`,
/// where `<table>` is the first table in the caller's scope.
pub fn sanitize_for_question(raw: &str, question: &str, scope: &AccessScope) -> Option<String> {
    let sql = sanitize(raw)?;
    if !is_enumerate_all(question) || scope.is_empty() {
        return Some(sql);
    }

    let aliases = extract_aliases(&sql);
    let mut select_tables: Vec<String> = Vec::new();
    for qualifier in select_list_qualifiers(&sql) {
        let table = aliases.get(&qualifier).cloned().unwrap_or(qualifier);
        if !select_tables.contains(&table) {
            select_tables.push(table);
        }
    }
    if select_tables.len() <= 1 {
        return Some(sql);
    }

    let primary = scope.first_table()?.to_string();

    debug!(
        question = %question,
        tables = ?select_tables,
        fallback_table = %primary,
        "Multi-table SELECT for enumerate-all question, using single-table fallback"
    );
    Some(format!("SELECT * FROM {};", primary))
}
