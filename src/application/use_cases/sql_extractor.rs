//! Lightweight SQL identifier extraction.
//!
//! Pattern-based, not a parser: it pulls table references, aliases and
//! select-list column references out of a single statement (subqueries and
//! UNION branches included), and rewrites
//! identifiers outside string literals. Everything the validator needs to
//! know about a statement's shape goes through this module.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static TABLE_REF_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:from|join|update|into)\s+`?([A-Za-z0-9_]+)`?").unwrap()
});

static ALIAS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:from|join)\s+`?([A-Za-z0-9_]+)`?(?:\s+as)?\s+`?([A-Za-z_][A-Za-z0-9_]*)`?")
        .unwrap()
});

static SELECT_KEYWORD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bselect\b").unwrap());

static FROM_KEYWORD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^from\b").unwrap());

static FROM_TABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)^from\s+[`"]?([A-Za-z0-9_]+)[`"]?"#).unwrap());

static SUBQUERY_START_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:select|with)\b").unwrap());

static WORD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*").unwrap());

static AS_ALIAS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^(.*?)\s+AS\s+[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static BARE_ALIAS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^(.*[\w)])\s+([A-Za-z_][A-Za-z0-9_]*)$").unwrap());

static DISTINCT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:DISTINCT|ALL)\s+").unwrap());

static QUALIFIED_WILDCARD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*\.\s*\*$").unwrap());

static QUALIFIED_COLUMN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*\.\s*([A-Za-z_][A-Za-z0-9_]*)$").unwrap()
});

static BARE_COLUMN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

static IDENTIFIER_TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)(?:\s*\.\s*([A-Za-z_][A-Za-z0-9_]*|\*))?").unwrap()
});

static CTE_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:\bWITH(?:\s+RECURSIVE)?|,)\s*`?([A-Za-z_][A-Za-z0-9_]*)`?\s*(?:\([^)]*\)\s*)?AS\s*\(",
    )
    .unwrap()
});

/// Words that can appear where an identifier would, but never name a column.
const SQL_WORDS: &[&str] = &[
    "all", "and", "as", "asc", "between", "boolean", "by", "case", "cast", "char", "collate",
    "cross", "current", "current_date", "current_time", "current_timestamp", "date", "decimal",
    "desc", "distinct", "div", "double", "else", "end", "escape", "exists", "false", "filter",
    "float", "following", "from", "full", "glob", "group", "having", "in", "inner", "integer",
    "interval", "is", "join", "left", "like", "limit", "mod", "nocase", "not", "null", "numeric",
    "offset", "on", "or", "order", "outer", "over", "partition", "preceding", "range", "real",
    "recursive", "regexp", "right", "row", "rows", "select", "signed", "text", "then", "true",
    "unbounded", "union", "unsigned", "varchar", "when", "where", "with", "xor",
];

/// Words that may follow a table name without being its alias.
const CLAUSE_WORDS: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "cross", "outer", "on", "group", "order",
    "limit", "having", "union", "set", "values", "natural", "using", "offset", "window",
];

pub fn is_sql_word(word: &str) -> bool {
    SQL_WORDS.contains(&word.to_lowercase().as_str())
}

/// A column reference, optionally qualified by a table name or alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub column: String,
}

impl ColumnRef {
    fn new(qualifier: Option<&str>, column: &str) -> Self {
        Self {
            qualifier: qualifier.map(|q| q.to_string()),
            column: column.to_string(),
        }
    }
}

/// One comma-separated item of a SELECT list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectItem {
    /// `*` or `t.*`
    Wildcard { qualifier: Option<String> },
    Column(ColumnRef),
    /// Function calls, arithmetic, CASE, literals: the identifiers used inside.
    Expression(Vec<ColumnRef>),
}

impl SelectItem {
    pub fn column_refs(&self) -> Vec<ColumnRef> {
        match self {
            SelectItem::Wildcard { .. } => Vec::new(),
            SelectItem::Column(r) => vec![r.clone()],
            SelectItem::Expression(refs) => refs.clone(),
        }
    }
}

/// Blank out the contents of single-quoted string literals, keeping byte offsets.
pub fn mask_literals(sql: &str) -> String {
    let mut masked = String::with_capacity(sql.len());
    let mut in_literal = false;
    for c in sql.chars() {
        if c == '\'' {
            in_literal = !in_literal;
            masked.push(c);
        } else if in_literal {
            for _ in 0..c.len_utf8() {
                masked.push(' ');
            }
        } else {
            masked.push(c);
        }
    }
    masked
}

/// Split a statement into (is_literal, text) segments on single quotes.
fn segments(sql: &str) -> Vec<(bool, &str)> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_literal = false;
    for (idx, c) in sql.char_indices() {
        if c != '\'' {
            continue;
        }
        if in_literal {
            parts.push((true, &sql[start..=idx]));
            start = idx + 1;
        } else {
            if start < idx {
                parts.push((false, &sql[start..idx]));
            }
            start = idx;
        }
        in_literal = !in_literal;
    }
    if start < sql.len() {
        parts.push((in_literal, &sql[start..]));
    }
    parts
}

fn rewrite_outside_literals<F>(sql: &str, re: &Regex, mut replace: F) -> String
where
    F: FnMut(&Captures) -> String,
{
    segments(sql)
        .into_iter()
        .map(|(literal, text)| {
            if literal {
                text.to_string()
            } else {
                re.replace_all(text, |caps: &Captures| replace(caps)).into_owned()
            }
        })
        .collect()
}

/// Table names following FROM/JOIN/UPDATE/INTO, lower-cased, unquoted, first-seen order.
///
/// A match immediately followed by `(` or `.` is a function or a qualified
/// name, and a FROM inside a function call (`EXTRACT(YEAR FROM col)`) names a
/// column. Tables of parenthesised subqueries are included.
pub fn extract_tables(sql: &str) -> Vec<String> {
    let masked = mask_literals(sql);
    let mut tables: Vec<String> = Vec::new();
    for caps in TABLE_REF_PATTERN.captures_iter(&masked) {
        let Some(whole) = caps.get(0) else { continue };
        let next = masked[whole.end()..].chars().next();
        let terminated = match next {
            None => true,
            Some(c) => c.is_whitespace() || matches!(c, ',' | ';' | ')'),
        };
        if !terminated || inside_function_call(&masked, whole.start()) {
            continue;
        }
        let name = caps[1].to_lowercase();
        if name.chars().all(|c| c.is_ascii_digit()) || is_sql_word(&name) {
            continue;
        }
        if !tables.contains(&name) {
            tables.push(name);
        }
    }
    tables
}

/// True when the innermost parenthesis open at `pos` is a call's argument
/// list rather than a subquery.
fn inside_function_call(masked: &str, pos: usize) -> bool {
    let mut open: Vec<usize> = Vec::new();
    for (idx, c) in masked[..pos].char_indices() {
        match c {
            '(' => open.push(idx),
            ')' => {
                open.pop();
            }
            _ => {}
        }
    }
    match open.last() {
        Some(&idx) => !SUBQUERY_START_PATTERN.is_match(&masked[idx + 1..]),
        None => false,
    }
}

/// `FROM cust_mast c` / `JOIN acct_mast AS a` → alias (lower) → table (lower).
pub fn extract_aliases(sql: &str) -> HashMap<String, String> {
    let masked = mask_literals(sql);
    let mut aliases = HashMap::new();
    let mut pos = 0;
    // Resume right after the table name when the "alias" turns out to be a
    // clause word, so `FROM a JOIN b x` still sees the JOIN.
    while let Some(caps) = ALIAS_PATTERN.captures_at(&masked, pos) {
        let (Some(table), Some(alias)) = (caps.get(1), caps.get(2)) else {
            break;
        };
        let alias_lower = alias.as_str().to_lowercase();
        if CLAUSE_WORDS.contains(&alias_lower.as_str()) || is_sql_word(&alias_lower) {
            pos = table.end();
            continue;
        }
        aliases.insert(alias_lower, table.as_str().to_lowercase());
        pos = alias.end();
    }
    aliases
}

/// Names introduced by a `WITH` clause, lower-cased.
pub fn extract_cte_names(sql: &str) -> Vec<String> {
    let masked = mask_literals(sql);
    if !masked.trim_start().to_lowercase().starts_with("with") {
        return Vec::new();
    }
    let mut names: Vec<String> = Vec::new();
    for caps in CTE_NAME_PATTERN.captures_iter(&masked) {
        let name = caps[1].to_lowercase();
        if !is_sql_word(&name) && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// One `SELECT ... FROM` block: its select list and the table named right
/// after its FROM (`None` for a derived table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectBlock {
    pub table: Option<String>,
    pub items: Vec<SelectItem>,
}

/// (select list, FROM table) for every SELECT that has a FROM at its own
/// nesting level: the outer query, subqueries and UNION branches alike.
/// Subqueries inside a select list are blanked out of that list.
fn raw_select_blocks(sql: &str) -> Vec<(String, Option<String>)> {
    let masked = mask_literals(sql);
    let mut blocks = Vec::new();
    for select in SELECT_KEYWORD_PATTERN.find_iter(&masked) {
        let rest = &masked[select.end()..];
        let Some(from) = same_level_from(rest) else {
            continue;
        };
        let list = blank_subqueries(rest[..from].trim());
        let table = FROM_TABLE_PATTERN
            .captures(&rest[from..])
            .map(|caps| caps[1].to_lowercase());
        blocks.push((list.trim().to_string(), table));
    }
    blocks
}

/// Offset of the first FROM keyword outside any parentheses, stopping at the
/// parenthesis that closes the enclosing subquery.
fn same_level_from(text: &str) -> Option<usize> {
    let mut depth: i32 = 0;
    let mut previous: Option<char> = None;
    for (idx, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            'f' | 'F' if depth == 0 => {
                let boundary = previous.map_or(true, |p| !(p.is_alphanumeric() || p == '_'));
                if boundary && FROM_KEYWORD_PATTERN.is_match(&text[idx..]) {
                    return Some(idx);
                }
            }
            _ => {}
        }
        previous = Some(c);
    }
    None
}

/// Replace the body of every `(SELECT ...)` with spaces, keeping the parentheses.
fn blank_subqueries(list: &str) -> String {
    let mut out = String::with_capacity(list.len());
    let mut depth: i32 = 0;
    let mut blanking: Option<i32> = None;
    for (idx, c) in list.char_indices() {
        match c {
            '(' => {
                depth += 1;
                if blanking.is_none() && SUBQUERY_START_PATTERN.is_match(&list[idx + 1..]) {
                    blanking = Some(depth);
                    out.push(c);
                    continue;
                }
            }
            ')' => {
                if blanking == Some(depth) {
                    blanking = None;
                }
                depth -= 1;
            }
            _ => {}
        }
        out.push(if blanking.is_some() { ' ' } else { c });
    }
    out
}

/// Select list of the first `SELECT ... FROM` block.
pub fn select_list(sql: &str) -> Option<String> {
    raw_select_blocks(sql).into_iter().next().map(|(list, _)| list)
}

/// Split on commas that are not nested inside parentheses.
pub fn split_top_level(list: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth: i32 = 0;
    let mut current = String::new();
    for c in list.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                items.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    items.push(current.trim().to_string());
    items
}

fn strip_item_alias(item: &str) -> &str {
    if let Some(caps) = AS_ALIAS_PATTERN.captures(item) {
        if let Some(expr) = caps.get(1) {
            return expr.as_str().trim();
        }
    }
    if let Some(caps) = BARE_ALIAS_PATTERN.captures(item) {
        let alias = &caps[2];
        let expr = caps.get(1).map(|m| m.as_str().trim()).unwrap_or(item);
        let expr_is_simple = BARE_COLUMN_PATTERN.is_match(expr)
            || QUALIFIED_COLUMN_PATTERN.is_match(expr)
            || expr.ends_with(')');
        if expr_is_simple && !is_sql_word(alias) && !is_sql_word(expr) {
            return expr;
        }
    }
    item
}

/// Identifiers used inside an expression, skipping function names and SQL words.
pub fn expression_refs(expr: &str) -> Vec<ColumnRef> {
    let cleaned = mask_literals(expr).replace(['`', '"'], "");
    let mut refs = Vec::new();
    for caps in IDENTIFIER_TOKEN_PATTERN.captures_iter(&cleaned) {
        let Some(whole) = caps.get(0) else { continue };
        let next = cleaned[whole.end()..].trim_start().chars().next();
        if next == Some('(') {
            continue;
        }
        let first = &caps[1];
        match caps.get(2).map(|m| m.as_str()) {
            Some("*") => {}
            Some(column) => refs.push(ColumnRef::new(Some(first), column)),
            None => {
                if !is_sql_word(first) {
                    refs.push(ColumnRef::new(None, first));
                }
            }
        }
    }
    refs
}

pub fn parse_select_item(raw: &str) -> Option<SelectItem> {
    let unquoted = raw.replace(['`', '"'], "");
    let trimmed = DISTINCT_PATTERN.replace(unquoted.trim(), "");
    let item = strip_item_alias(trimmed.trim());
    if item.is_empty() {
        return None;
    }
    if item == "*" {
        return Some(SelectItem::Wildcard { qualifier: None });
    }
    if let Some(caps) = QUALIFIED_WILDCARD_PATTERN.captures(item) {
        return Some(SelectItem::Wildcard {
            qualifier: Some(caps[1].to_string()),
        });
    }
    if let Some(caps) = QUALIFIED_COLUMN_PATTERN.captures(item) {
        return Some(SelectItem::Column(ColumnRef::new(Some(&caps[1]), &caps[2])));
    }
    if BARE_COLUMN_PATTERN.is_match(item) && !is_sql_word(item) {
        return Some(SelectItem::Column(ColumnRef::new(None, item)));
    }
    Some(SelectItem::Expression(expression_refs(item)))
}

fn parse_select_list(list: &str) -> Vec<SelectItem> {
    split_top_level(list)
        .iter()
        .filter_map(|item| parse_select_item(item))
        .collect()
}

/// Parsed SELECT list; empty when the statement has no `SELECT ... FROM`.
pub fn extract_select_items(sql: &str) -> Vec<SelectItem> {
    select_list(sql)
        .map(|list| parse_select_list(&list))
        .unwrap_or_default()
}

/// Every `SELECT ... FROM` block of the statement, in text order.
pub fn extract_select_blocks(sql: &str) -> Vec<SelectBlock> {
    raw_select_blocks(sql)
        .into_iter()
        .map(|(list, table)| SelectBlock {
            table,
            items: parse_select_list(&list),
        })
        .collect()
}

/// Unqualified identifiers anywhere outside string literals, lower-cased and
/// deduplicated. Qualifiers, qualified columns, function names, SQL words and
/// names introduced by `AS` are left out.
pub fn bare_identifiers(sql: &str) -> Vec<String> {
    let cleaned = mask_literals(sql).replace(['`', '"'], " ");
    let mut found: Vec<String> = Vec::new();
    let mut previous_word = String::new();
    for m in WORD_PATTERN.find_iter(&cleaned) {
        let word = m.as_str().to_lowercase();
        let before = cleaned[..m.start()].trim_end().chars().last();
        let after = cleaned[m.end()..].trim_start().chars().next();
        let named_by_as = previous_word == "as";
        previous_word = word.clone();
        if named_by_as
            || before == Some('.')
            || matches!(after, Some('(') | Some('.'))
            || is_sql_word(&word)
        {
            continue;
        }
        if !found.contains(&word) {
            found.push(word);
        }
    }
    found
}

/// Every `qualifier.column` reference in the statement outside string literals.
pub fn qualified_refs(sql: &str) -> Vec<ColumnRef> {
    expression_refs(sql)
        .into_iter()
        .filter(|r| r.qualifier.is_some())
        .collect()
}

/// Distinct table qualifiers used in the SELECT list (`t.col`, `t.*`).
pub fn select_list_qualifiers(sql: &str) -> Vec<String> {
    let mut qualifiers: Vec<String> = Vec::new();
    for item in extract_select_items(sql) {
        let found: Vec<String> = match &item {
            SelectItem::Wildcard {
                qualifier: Some(q),
            } => vec![q.to_lowercase()],
            other => other
                .column_refs()
                .into_iter()
                .filter_map(|r| r.qualifier.map(|q| q.to_lowercase()))
                .collect(),
        };
        for q in found {
            if !qualifiers.contains(&q) {
                qualifiers.push(q);
            }
        }
    }
    qualifiers
}

/// Replace whole-word occurrences of `from` with `to`, case-insensitively,
/// leaving string literals untouched.
pub fn replace_identifier(sql: &str, from: &str, to: &str) -> String {
    let pattern = format!(r"(?i)\b{}\b", regex::escape(from));
    match Regex::new(&pattern) {
        Ok(re) => rewrite_outside_literals(sql, &re, |_| to.to_string()),
        Err(_) => sql.to_string(),
    }
}

/// Replace `qualifier.from` (optionally backticked) with `qualifier.to`.
pub fn replace_qualified_column(sql: &str, qualifier: &str, from: &str, to: &str) -> String {
    let pattern = format!(
        r"(?i)(\b{}`?\s*\.\s*`?){}\b",
        regex::escape(qualifier),
        regex::escape(from)
    );
    match Regex::new(&pattern) {
        Ok(re) => rewrite_outside_literals(sql, &re, |caps| format!("{}{}", &caps[1], to)),
        Err(_) => sql.to_string(),
    }
}
