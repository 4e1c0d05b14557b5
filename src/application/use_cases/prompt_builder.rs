//! Prompt Builder for SQL generation
//!
//! Produces the same prompt for the same inputs. Everything schema-related is
//! restricted to the caller's scope before it reaches the model.

use super::context_retriever::RetrievedContext;
use crate::domain::access_policy::AccessScope;
use crate::domain::schema::SchemaCatalog;
use crate::domain::session::PriorTurn;

/// Backward references that make a question a follow-up to the previous turn.
const CONTEXTUAL_PHRASES: &[&str] = &[
    "from the above",
    "from previous",
    "previous result",
    "above result",
    "based on the above",
    "based on previous",
    "using the last result",
    "based on this",
    "using previous result",
];

const RULES: &[&str] = &[
    "Output ONLY the SQL query - no explanations, no markdown, no extra text",
    "Use ONLY the provided table and column names - NEVER invent or guess table or column names",
    "Use valid SQLite syntax only",
    "Use backticks for table and column names: `table_name`.`column_name`",
    "Always prefer the simplest possible query that answers the question. If a single-table query suffices, do not use multiple tables.",
    "Do NOT use JOINs, subqueries, or advanced SQL unless the question clearly requires data from multiple tables or complex logic.",
    "Avoid GROUP BY, HAVING, or window functions unless the question asks for aggregation or grouping.",
    "For date filtering, use: WHERE date_column >= date('now', '-1 month')",
    "For case-insensitive matching, use LIKE (ILIKE is not supported). If needed, use LOWER(column) LIKE ...",
    "For year, month or day of a date, use strftime('%Y', date_column). Do NOT use to_char, to_number, extract, or date_part.",
    "If the question is ambiguous, generate a simple query using the most relevant table and columns from the schema.",
    "If the user's question can be answered from a single table, use only that table and do not include columns from other tables.",
    "Always end with a semicolon",
];

const FEW_SHOT_EXAMPLES: &str = "### EXAMPLE 1
DATABASE SCHEMA
Table `customers` has columns: `customer_id`, `name`, `dob`, `address`.
Table `accounts` has columns: `account_id`, `customer_id`, `balance`, `open_date`.

USER QUESTION
List the names and addresses of all customers.

SQL QUERY (ONLY THE QUERY, NO EXPLANATIONS)
SELECT `name`, `address` FROM `customers`;

### EXAMPLE 2
DATABASE SCHEMA
Table `transactions` has columns: `txn_id`, `account_id`, `amount`, `txn_date`.
Table `accounts` has columns: `account_id`, `customer_id`, `balance`, `open_date`.

USER QUESTION
Show the total transaction amount for each account.

SQL QUERY (ONLY THE QUERY, NO EXPLANATIONS)
SELECT `account_id`, SUM(`amount`) AS total_amount FROM `transactions` GROUP BY `account_id`;

### EXAMPLE 3 (BAD)
DATABASE SCHEMA
Table `txn_hist` has columns: `txn_id`, `acct_id`, `amount`, `txn_type`.
Table `acct_mast` has columns: `acct_id`, `cust_id`, `acct_type`.

USER QUESTION
Show me all transactions.

BAD SQL QUERY (DO NOT DO THIS)
SELECT txn_hist.txn_id, acct_mast.acct_type FROM txn_hist JOIN acct_mast ON txn_hist.acct_id = acct_mast.acct_id;

GOOD SQL QUERY
SELECT * FROM txn_hist;";

pub fn is_contextual_question(question: &str) -> bool {
    let lower = question.to_lowercase();
    CONTEXTUAL_PHRASES.iter().any(|p| lower.contains(p))
}

/// Inputs for one generation request.
pub struct PromptRequest<'a> {
    pub question: &'a str,
    pub scope: &'a AccessScope,
    pub catalog: &'a SchemaCatalog,
    /// `None` for the full-schema strategy
    pub rag_context: Option<&'a RetrievedContext>,
    /// Only consulted when the question is contextual
    pub prior_turn: Option<&'a PriorTurn>,
}

pub struct PromptBuilder;

impl PromptBuilder {
    pub fn build(request: &PromptRequest<'_>) -> String {
        let mut sections: Vec<String> = Vec::new();

        sections.push(format!(
            "### TABLES AND COLUMNS (USE ONLY THESE):\n{}\n\nYou MUST use only the table names and column names listed above. If you use any other table or column, your answer will be rejected.",
            Self::table_listing(request)
        ));

        let rules: Vec<String> = RULES
            .iter()
            .enumerate()
            .map(|(i, rule)| format!("{}. {}", i + 1, rule))
            .collect();
        sections.push(format!("### CRITICAL RULES:\n{}", rules.join("\n")));

        sections.push(format!(
            "### DATABASE SCHEMA (REFERENCE)\n{}",
            Self::schema_reference(request)
        ));

        sections.push(FEW_SHOT_EXAMPLES.to_string());

        if let Some(previous) = Self::previous_context(request) {
            sections.push(previous);
        }

        sections.push(format!(
            "### RAG CONTEXT (Additional relevant context)\n{}",
            Self::rag_section(request)
        ));

        sections.push(format!("### USER QUESTION\n{}", request.question.trim()));
        sections.push("### SQL QUERY (ONLY THE QUERY, NO EXPLANATIONS)\n".to_string());

        sections.join("\n\n")
    }

    /// `table: col1, col2` per allowed table.
    fn table_listing(request: &PromptRequest<'_>) -> String {
        request
            .scope
            .tables()
            .iter()
            .map(|table| {
                let columns = request.scope.visible_columns(table, request.catalog);
                format!("{}: {}", table, columns.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn schema_reference(request: &PromptRequest<'_>) -> String {
        let mut lines = Vec::new();
        for table in request.scope.tables() {
            let columns = request.scope.visible_columns(table, request.catalog);
            let quoted: Vec<String> = columns.iter().map(|c| format!("`{}`", c)).collect();
            lines.push(format!("Table `{}` has columns: {}.", table, quoted.join(", ")));

            let Some(schema) = request.catalog.table(table) else {
                continue;
            };

            let fks: Vec<String> = schema
                .foreign_keys
                .iter()
                .filter(|fk| {
                    columns.iter().any(|c| c.eq_ignore_ascii_case(&fk.column))
                        && request.scope.resolve_table(&fk.target_table).is_some()
                })
                .map(|fk| {
                    format!(
                        "`{}` -> `{}`.`{}`",
                        fk.column, fk.target_table, fk.target_column
                    )
                })
                .collect();
            if !fks.is_empty() {
                lines.push(format!("  - Foreign Keys: {}", fks.join("; ")));
            }

            if let Some(desc) = schema.description.as_deref().filter(|d| !d.is_empty()) {
                lines.push(format!("  - Description: {}", desc));
            }

            let described: Vec<String> = schema
                .columns
                .iter()
                .filter(|c| columns.iter().any(|v| v.eq_ignore_ascii_case(&c.name)))
                .filter_map(|c| {
                    c.description
                        .as_deref()
                        .filter(|d| !d.is_empty())
                        .map(|d| format!("`{}`: {}", c.name, d))
                })
                .collect();
            if !described.is_empty() {
                lines.push(format!("  - Columns: {}", described.join("; ")));
            }
        }
        lines.join("\n")
    }

    fn previous_context(request: &PromptRequest<'_>) -> Option<String> {
        if !is_contextual_question(request.question) {
            return None;
        }
        let prior = request.prior_turn?;
        let mut section = format!("### PREVIOUS QUERY\n{}", prior.sql);
        if !prior.result_columns.is_empty() {
            section.push_str(&format!(
                "\n\n### PREVIOUS RESULT COLUMNS\n{}",
                prior.result_columns.join(", ")
            ));
        }
        Some(section)
    }

    fn rag_section(request: &PromptRequest<'_>) -> String {
        let Some(context) = request.rag_context else {
            return "No additional context.".to_string();
        };
        let context = context.restricted_to(request.scope);
        if context.is_empty() {
            return "No additional context.".to_string();
        }

        let mut lines = Vec::new();
        if !context.schema_matches.is_empty() {
            lines.push("Relevant schema fields:".to_string());
            lines.extend(context.schema_matches.iter().map(|m| format!("- {}", m.text)));
        }
        if !context.row_matches.is_empty() {
            lines.push("Sample rows:".to_string());
            lines.extend(context.row_matches.iter().map(|m| format!("- {}", m.text)));
        }
        lines.join("\n")
    }
}
