//! Candidate Generator
//!
//! Two prompting strategies over the same question: one grounded in the
//! retrieved context and one given only the allowed schema. Both calls go out
//! together; each yields at most one sanitized candidate. When the generation
//! service fails or returns nothing usable, a heuristic statement over the
//! first allowed table stands in.

use super::context_retriever::RetrievedContext;
use super::prompt_builder::{PromptBuilder, PromptRequest};
use super::sql_sanitizer::sanitize_for_question;
use crate::domain::access_policy::AccessScope;
use crate::domain::candidate::{Candidate, CandidateSource};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::domain::schema::SchemaCatalog;
use crate::domain::session::PriorTurn;
use crate::infrastructure::llm_clients::LLMClient;
use crate::infrastructure::response::clean_llm_response;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

static AVERAGE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(average|avg|mean)\b").unwrap());

static COUNT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(count|total|number)\b").unwrap());

/// Everything a strategy may draw on for one question.
pub struct GenerationContext<'a> {
    pub question: &'a str,
    pub scope: &'a AccessScope,
    pub catalog: &'a SchemaCatalog,
    pub retrieved: &'a RetrievedContext,
    pub prior_turn: Option<&'a PriorTurn>,
}

pub trait GenerationStrategy: Send + Sync {
    fn source(&self) -> CandidateSource;
    fn prompt(&self, context: &GenerationContext<'_>) -> String;
}

/// Prompt includes the retrieved schema fields and sample rows.
pub struct RagGroundedStrategy;

impl GenerationStrategy for RagGroundedStrategy {
    fn source(&self) -> CandidateSource {
        CandidateSource::RagGrounded
    }

    fn prompt(&self, context: &GenerationContext<'_>) -> String {
        PromptBuilder::build(&PromptRequest {
            question: context.question,
            scope: context.scope,
            catalog: context.catalog,
            rag_context: Some(context.retrieved),
            prior_turn: context.prior_turn,
        })
    }
}

/// Prompt carries the allowed schema only.
pub struct FullSchemaStrategy;

impl GenerationStrategy for FullSchemaStrategy {
    fn source(&self) -> CandidateSource {
        CandidateSource::FullSchema
    }

    fn prompt(&self, context: &GenerationContext<'_>) -> String {
        PromptBuilder::build(&PromptRequest {
            question: context.question,
            scope: context.scope,
            catalog: context.catalog,
            rag_context: None,
            prior_turn: context.prior_turn,
        })
    }
}

/// Minimal statement over the first allowed table, chosen by keywords in the
/// question. `None` when the scope is empty.
pub fn fallback_statement(
    question: &str,
    scope: &AccessScope,
    catalog: &SchemaCatalog,
) -> Option<String> {
    let table = scope.first_table()?;

    if AVERAGE_PATTERN.is_match(question) {
        let columns = scope.visible_columns(table, catalog);
        if let Some(column) = columns.get(1).or_else(|| columns.first()) {
            return Some(format!(
                "SELECT AVG({}) AS average_value FROM {};",
                column, table
            ));
        }
    }
    if COUNT_PATTERN.is_match(question) {
        return Some(format!("SELECT COUNT(*) AS total_count FROM {};", table));
    }
    Some(format!("SELECT * FROM {};", table))
}

pub struct CandidateGenerator {
    llm_client: Arc<dyn LLMClient>,
    config: LLMConfig,
}

impl CandidateGenerator {
    pub fn new(llm_client: Arc<dyn LLMClient>, config: LLMConfig) -> Self {
        Self { llm_client, config }
    }

    /// Raw completion for `prompt`; a timeout counts as an unavailable service.
    async fn complete(&self, prompt: &str) -> Result<String> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        tokio::time::timeout(timeout, self.llm_client.generate(&self.config, prompt))
            .await
            .map_err(|_| {
                AppError::ServiceUnavailable(format!(
                    "Generation timed out after {} seconds",
                    self.config.timeout_secs
                ))
            })?
    }

    pub async fn generate(
        &self,
        strategy: &dyn GenerationStrategy,
        context: &GenerationContext<'_>,
    ) -> Option<Candidate> {
        let source = strategy.source();
        let prompt = strategy.prompt(context);
        debug!(source = %source, prompt_chars = prompt.len(), "Requesting SQL generation");

        let sanitized = match self.complete(&prompt).await {
            Ok(raw) => {
                let sql = sanitize_for_question(
                    &clean_llm_response(&raw),
                    context.question,
                    context.scope,
                );
                if sql.is_none() {
                    warn!(source = %source, raw = %raw, "No SQL statement in model output");
                }
                sql
            }
            Err(e) => {
                warn!(source = %source, error = %e, "Generation service failed");
                None
            }
        };

        if let Some(statement) = sanitized {
            info!(source = %source, statement = %statement, "Candidate generated");
            return Some(Candidate::new(statement, source));
        }

        let statement = fallback_statement(context.question, context.scope, context.catalog)?;
        info!(source = %source, statement = %statement, "Using heuristic fallback statement");
        Some(Candidate::new(statement, CandidateSource::Fallback))
    }

    /// RAG-grounded and full-schema candidates, in that order.
    pub async fn generate_pair(
        &self,
        context: &GenerationContext<'_>,
    ) -> (Option<Candidate>, Option<Candidate>) {
        tokio::join!(
            self.generate(&RagGroundedStrategy, context),
            self.generate(&FullSchemaStrategy, context),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::context_retriever::RetrievalMatch;
    use crate::domain::access_policy::TableAccess;
    use crate::domain::schema::TableSchema;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Answers by strategy: prompts with retrieved rows get `rag`, others `full`.
    struct ScriptedClient {
        rag: &'static str,
        full: &'static str,
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn generate(&self, _config: &LLMConfig, prompt: &str) -> Result<String> {
            if prompt.contains("Relevant schema fields:") {
                Ok(self.rag.to_string())
            } else {
                Ok(self.full.to_string())
            }
        }
    }

    struct DownClient;

    #[async_trait]
    impl LLMClient for DownClient {
        async fn generate(&self, _config: &LLMConfig, _prompt: &str) -> Result<String> {
            Err(AppError::ServiceUnavailable("connection refused".to_string()))
        }
    }

    struct SlowClient;

    #[async_trait]
    impl LLMClient for SlowClient {
        async fn generate(&self, _config: &LLMConfig, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("SELECT * FROM txn_hist;".to_string())
        }
    }

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![
            TableSchema::new("acct_mast", &["acct_id", "balance", "cust_id"]),
            TableSchema::new("txn_hist", &["txn_id", "amount"]),
        ])
    }

    fn scope() -> AccessScope {
        AccessScope::new(
            "Teller",
            vec![
                ("acct_mast".to_string(), TableAccess::All),
                ("txn_hist".to_string(), TableAccess::All),
            ],
        )
    }

    fn retrieved() -> RetrievedContext {
        RetrievedContext {
            schema_matches: vec![RetrievalMatch {
                table: "acct_mast".to_string(),
                column: Some("balance".to_string()),
                text: "acct_mast balance".to_string(),
                cells: vec![],
                score: 1.0,
            }],
            row_matches: vec![],
        }
    }

    #[test]
    fn test_fallback_statement() {
        let catalog = catalog();
        let scope = scope();
        assert_eq!(
            fallback_statement("What is the average balance?", &scope, &catalog).unwrap(),
            "SELECT AVG(balance) AS average_value FROM acct_mast;"
        );
        assert_eq!(
            fallback_statement("Total number of accounts", &scope, &catalog).unwrap(),
            "SELECT COUNT(*) AS total_count FROM acct_mast;"
        );
        assert_eq!(
            fallback_statement("Show me accounts", &scope, &catalog).unwrap(),
            "SELECT * FROM acct_mast;"
        );
        assert_eq!(
            fallback_statement("anything", &AccessScope::new("Nobody", vec![]), &catalog),
            None
        );
    }

    #[test]
    fn test_fallback_average_with_single_column() {
        let catalog = catalog();
        let scope = AccessScope::new(
            "Auditor",
            vec![(
                "txn_hist".to_string(),
                TableAccess::Columns(vec!["amount".to_string()]),
            )],
        );
        assert_eq!(
            fallback_statement("mean amount", &scope, &catalog).unwrap(),
            "SELECT AVG(amount) AS average_value FROM txn_hist;"
        );
    }

    #[test]
    fn test_strategies_differ_only_in_rag_context() {
        let catalog = catalog();
        let scope = scope();
        let retrieved = retrieved();
        let context = GenerationContext {
            question: "balance of account 7",
            scope: &scope,
            catalog: &catalog,
            retrieved: &retrieved,
            prior_turn: None,
        };

        let rag = RagGroundedStrategy.prompt(&context);
        let full = FullSchemaStrategy.prompt(&context);
        assert!(rag.contains("- acct_mast balance"));
        assert!(full.contains("No additional context."));
        assert_eq!(RagGroundedStrategy.source(), CandidateSource::RagGrounded);
        assert_eq!(FullSchemaStrategy.source(), CandidateSource::FullSchema);
    }

    #[tokio::test]
    async fn test_generate_pair_sanitizes_both() {
        let generator = CandidateGenerator::new(
            Arc::new(ScriptedClient {
                rag: "```sql\nSELECT balance FROM acct_mast WHERE acct_id = 7\n```",
                full: "Here you go: SELECT * FROM acct_mast;",
            }),
            LLMConfig::default(),
        );
        let catalog = catalog();
        let scope = scope();
        let retrieved = retrieved();
        let context = GenerationContext {
            question: "balance of account 7",
            scope: &scope,
            catalog: &catalog,
            retrieved: &retrieved,
            prior_turn: None,
        };

        let (rag, full) = generator.generate_pair(&context).await;
        let rag = rag.unwrap();
        let full = full.unwrap();
        assert_eq!(rag.statement, "SELECT balance FROM acct_mast WHERE acct_id = 7;");
        assert_eq!(rag.source, CandidateSource::RagGrounded);
        assert_eq!(full.statement, "SELECT * FROM acct_mast;");
        assert_eq!(full.source, CandidateSource::FullSchema);
    }

    #[tokio::test]
    async fn test_service_down_uses_fallback() {
        let generator = CandidateGenerator::new(Arc::new(DownClient), LLMConfig::default());
        let catalog = catalog();
        let scope = scope();
        let retrieved = RetrievedContext::default();
        let context = GenerationContext {
            question: "How many accounts are there in total?",
            scope: &scope,
            catalog: &catalog,
            retrieved: &retrieved,
            prior_turn: None,
        };

        let candidate = generator
            .generate(&RagGroundedStrategy, &context)
            .await
            .unwrap();
        assert_eq!(candidate.statement, "SELECT COUNT(*) AS total_count FROM acct_mast;");
        assert_eq!(candidate.source, CandidateSource::Fallback);
    }

    #[tokio::test]
    async fn test_unusable_output_uses_fallback() {
        let generator = CandidateGenerator::new(
            Arc::new(ScriptedClient {
                rag: "I am not sure what you mean.",
                full: "I am not sure what you mean.",
            }),
            LLMConfig::default(),
        );
        let catalog = catalog();
        let scope = scope();
        let retrieved = RetrievedContext::default();
        let context = GenerationContext {
            question: "show accounts",
            scope: &scope,
            catalog: &catalog,
            retrieved: &retrieved,
            prior_turn: None,
        };

        let candidate = generator
            .generate(&FullSchemaStrategy, &context)
            .await
            .unwrap();
        assert_eq!(candidate.statement, "SELECT * FROM acct_mast;");
    }

    #[tokio::test]
    async fn test_timeout_is_service_unavailable() {
        let config = LLMConfig {
            timeout_secs: 1,
            ..LLMConfig::default()
        };
        let generator = CandidateGenerator::new(Arc::new(SlowClient), config);

        let err = generator.complete("prompt").await.unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }
}
