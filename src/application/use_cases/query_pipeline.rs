//! Query Pipeline
//!
//! One question, end to end: retrieve context, generate two candidates,
//! admit one, validate and correct it once, then execute. Rejections are
//! surfaced to the caller and nothing is executed for them. Every turn,
//! answered or not, is recorded in the caller's session.

use super::access_filter::AccessFilter;
use super::candidate_generator::{CandidateGenerator, GenerationContext};
use super::context_retriever::RetrievalIndex;
use super::embedding_service::Embedder;
use super::response_builder::ResponseBuilder;
use super::schema_validator::SchemaValidator;
use crate::domain::access_policy::{AccessScope, RoleAccessPolicy};
use crate::domain::candidate::{Candidate, CandidateSource};
use crate::domain::error::{AppError, Result};
use crate::domain::query_result::QueryResult;
use crate::domain::schema::{DictionaryEntry, SchemaCatalog};
use crate::domain::session::{QueryTurn, SessionContext};
use crate::infrastructure::config::{AppConfig, RetrievalConfig};
use crate::infrastructure::db::engine::SqlEngine;
use crate::infrastructure::llm_clients::LLMClient;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    /// The executed statement, after any correction.
    pub statement: String,
    pub response: String,
    pub result: QueryResult,
    pub correction: Option<String>,
    pub source: CandidateSource,
}

/// Shared, read-only after construction. Sessions are passed in per call.
pub struct QueryPipeline {
    catalog: Arc<SchemaCatalog>,
    policy: Arc<RoleAccessPolicy>,
    index: Arc<RetrievalIndex>,
    generator: CandidateGenerator,
    engine: Arc<dyn SqlEngine>,
    retrieval: RetrievalConfig,
}

impl QueryPipeline {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        policy: Arc<RoleAccessPolicy>,
        index: Arc<RetrievalIndex>,
        generator: CandidateGenerator,
        engine: Arc<dyn SqlEngine>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            catalog,
            policy,
            index,
            generator,
            engine,
            retrieval,
        }
    }

    /// Introspect the engine, check the policy against it and build the
    /// retrieval index from sampled rows.
    pub async fn bootstrap(
        config: &AppConfig,
        engine: Arc<dyn SqlEngine>,
        policy: RoleAccessPolicy,
        dictionary: &[DictionaryEntry],
        llm_client: Arc<dyn LLMClient>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let mut catalog = engine.load_catalog().await?;
        if catalog.is_empty() {
            return Err(AppError::ConfigError(
                "The database has no tables to query".to_string(),
            ));
        }
        catalog.apply_dictionary(dictionary);
        policy.validate_against(&catalog)?;

        let mut samples = Vec::new();
        if config.retrieval.rows_per_table > 0 {
            for table in catalog.table_names() {
                match engine
                    .sample_rows(&table, config.retrieval.rows_per_table)
                    .await
                {
                    Ok(rows) => samples.push((table, rows)),
                    Err(e) => warn!(table = %table, error = %e, "Skipping row sample"),
                }
            }
        }

        let index = RetrievalIndex::build(&catalog, &samples, embedder).await;
        info!(
            engine = %engine.kind(),
            tables = catalog.tables().len(),
            roles = policy.roles().len(),
            "Query pipeline ready"
        );

        Ok(Self::new(
            Arc::new(catalog),
            Arc::new(policy),
            Arc::new(index),
            CandidateGenerator::new(llm_client, config.llm.clone()),
            engine,
            config.retrieval.clone(),
        ))
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn scope(&self, role: &str) -> Result<AccessScope> {
        self.policy.scope_for(role, &self.catalog)
    }

    /// A ready session for `role`. Unknown roles are a configuration error.
    pub fn open_session(&self, role: &str) -> Result<SessionContext> {
        self.scope(role)?;
        let mut session = SessionContext::new(role);
        session.mark_ready();
        Ok(session)
    }

    pub async fn answer(&self, session: &mut SessionContext, question: &str) -> Result<QueryAnswer> {
        if !session.system_ready {
            return Err(AppError::ServiceUnavailable(
                "Session is not ready; open it through the pipeline first".to_string(),
            ));
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::MalformedSql("Empty question".to_string()));
        }

        let started = Instant::now();
        let scope = match self.scope(&session.role) {
            Ok(scope) => scope,
            Err(e) => return Err(fail(session, question, None, e)),
        };

        let retrieved = self
            .index
            .retrieve(
                question,
                self.retrieval.schema_top_k,
                self.retrieval.row_top_k,
            )
            .await;
        let prior_turn = session.prior_turn();
        let context = GenerationContext {
            question,
            scope: &scope,
            catalog: &self.catalog,
            retrieved: &retrieved,
            prior_turn: prior_turn.as_ref(),
        };
        let (rag_grounded, full_schema) = self.generator.generate_pair(&context).await;

        let mut candidate = match AccessFilter::new(&scope).select_candidate(rag_grounded, full_schema)
        {
            Ok(candidate) => candidate,
            Err(e) => return Err(fail(session, question, None, e)),
        };

        let validator = SchemaValidator::new(&scope, &self.catalog);
        let validated = match validator.validate_with_correction(&candidate.statement) {
            Ok(validated) => validated,
            Err(e) => {
                candidate.reject();
                return Err(fail(session, question, Some(candidate), e));
            }
        };
        if let Some(note) = &validated.correction {
            info!(
                from = %candidate.statement,
                to = %validated.statement,
                "Statement auto-corrected"
            );
            candidate.apply_correction(validated.statement.clone(), note.clone());
        }

        let result = match self.engine.execute(&candidate.statement).await {
            Ok(result) => result,
            Err(e) => return Err(fail(session, question, Some(candidate), e)),
        };

        let response = ResponseBuilder::summarize(&result);
        info!(
            role = %session.role,
            source = %candidate.source,
            rows = result.row_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Question answered"
        );

        let answer = QueryAnswer {
            statement: candidate.statement.clone(),
            response: response.clone(),
            result: result.clone(),
            correction: candidate.correction_note.clone(),
            source: candidate.source,
        };
        session.record(QueryTurn::answered(question, candidate, result, response));
        Ok(answer)
    }
}

/// Record the failed turn and hand the error back.
fn fail(
    session: &mut SessionContext,
    question: &str,
    candidate: Option<Candidate>,
    err: AppError,
) -> AppError {
    warn!(role = %session.role, reason = %err, "Question not answered");
    session.record(QueryTurn::failed(question, candidate, err.user_message()));
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::CandidateStatus;
    use crate::domain::llm_config::LLMConfig;
    use crate::infrastructure::config::DatabaseConfig;
    use crate::infrastructure::db::engine::EngineKind;
    use crate::infrastructure::db::sqlite::SqliteEngine;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    const POLICY: &str = r#"{
        "Teller": {
            "cust_mast": "cust_id,cust_name",
            "acct_mast": "ALL",
            "txn_hist": "ALL",
            "loan_mast": ""
        },
        "Manager": {
            "cust_mast": "ALL",
            "acct_mast": "ALL",
            "txn_hist": "ALL",
            "loan_mast": "ALL"
        }
    }"#;

    /// Returns the same completion for every prompt and keeps the prompts.
    struct ScriptedClient {
        completion: Option<&'static str>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn answering(completion: &'static str) -> Arc<Self> {
            Arc::new(Self {
                completion: Some(completion),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn down() -> Arc<Self> {
            Arc::new(Self {
                completion: None,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn generate(&self, _config: &LLMConfig, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.completion
                .map(str::to_string)
                .ok_or_else(|| AppError::ServiceUnavailable("connection refused".to_string()))
        }
    }

    async fn bank_engine() -> Arc<SqliteEngine> {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        let engine = SqliteEngine::connect(&config).await.unwrap();
        for statement in [
            "CREATE TABLE cust_mast (cust_id INTEGER PRIMARY KEY, cust_name TEXT, ssn TEXT)",
            "CREATE TABLE acct_mast (acct_id INTEGER PRIMARY KEY, cust_id INTEGER REFERENCES cust_mast(cust_id), balance REAL)",
            "CREATE TABLE txn_hist (txn_id INTEGER PRIMARY KEY, acct_id INTEGER, amount REAL)",
            "CREATE TABLE loan_mast (loan_id INTEGER PRIMARY KEY, cust_id INTEGER, amount REAL)",
            "INSERT INTO cust_mast VALUES (1, 'Asha', '111-22-3333'), (2, 'Ravi', '444-55-6666')",
            "INSERT INTO acct_mast VALUES (10, 1, 5200.5), (11, 2, 80.0)",
            "INSERT INTO txn_hist VALUES (100, 10, 250.0), (101, 10, 75.25), (102, 11, 12.0)",
            "INSERT INTO loan_mast VALUES (900, 1, 150000.0)",
        ] {
            sqlx::query(statement).execute(engine.pool()).await.unwrap();
        }
        Arc::new(engine)
    }

    /// Delegates to SQLite and keeps every executed statement.
    struct RecordingEngine {
        inner: Arc<SqliteEngine>,
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SqlEngine for RecordingEngine {
        fn kind(&self) -> EngineKind {
            self.inner.kind()
        }

        async fn execute(&self, statement: &str) -> Result<QueryResult> {
            self.executed.lock().unwrap().push(statement.to_string());
            self.inner.execute(statement).await
        }

        async fn load_catalog(&self) -> Result<SchemaCatalog> {
            self.inner.load_catalog().await
        }

        async fn sample_rows(&self, table: &str, limit: u32) -> Result<QueryResult> {
            self.inner.sample_rows(table, limit).await
        }
    }

    async fn recording_pipeline(completion: &'static str) -> (QueryPipeline, Arc<RecordingEngine>) {
        let engine = Arc::new(RecordingEngine {
            inner: bank_engine().await,
            executed: Mutex::new(Vec::new()),
        });
        let pipeline = pipeline_over(ScriptedClient::answering(completion), engine.clone()).await;
        (pipeline, engine)
    }

    async fn pipeline(client: Arc<ScriptedClient>) -> QueryPipeline {
        pipeline_over(client, bank_engine().await).await
    }

    async fn pipeline_over(client: Arc<ScriptedClient>, engine: Arc<dyn SqlEngine>) -> QueryPipeline {
        let mut config = AppConfig::default();
        config.llm.timeout_secs = 5;
        QueryPipeline::bootstrap(
            &config,
            engine,
            RoleAccessPolicy::from_json(POLICY).unwrap(),
            &[],
            client,
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_answers_valid_statement() {
        let pipeline = pipeline(ScriptedClient::answering("SELECT * FROM txn_hist;")).await;
        let mut session = pipeline.open_session("Teller").unwrap();

        let answer = pipeline
            .answer(&mut session, "Show me all transactions")
            .await
            .unwrap();
        assert_eq!(answer.statement, "SELECT * FROM txn_hist;");
        assert_eq!(answer.source, CandidateSource::RagGrounded);
        assert_eq!(answer.result.row_count(), 3);
        assert_eq!(
            answer.response,
            "I found 3 record(s) with 3 field(s) based on your query."
        );
        assert_eq!(answer.correction, None);
        assert!(session.history()[0].is_answered());
    }

    #[tokio::test]
    async fn test_corrects_hallucinated_table() {
        let pipeline = pipeline(ScriptedClient::answering(
            "SELECT cust_name FROM customer_mast WHERE cust_id = 2;",
        ))
        .await;
        let mut session = pipeline.open_session("Teller").unwrap();

        let answer = pipeline
            .answer(&mut session, "What is the name of customer 2?")
            .await
            .unwrap();
        assert_eq!(answer.statement, "SELECT cust_name FROM cust_mast WHERE cust_id = 2;");
        assert_eq!(answer.result.rows, vec![vec![json!("Ravi")]]);
        assert!(answer.correction.unwrap().contains("'customer_mast'"));

        let candidate = session.history()[0].candidate.as_ref().unwrap();
        assert_eq!(candidate.status, CandidateStatus::Corrected);
    }

    #[tokio::test]
    async fn test_forbidden_table_is_not_executed() {
        let pipeline = pipeline(ScriptedClient::answering("SELECT amount FROM loan_mast;")).await;
        let mut session = pipeline.open_session("Teller").unwrap();

        let err = pipeline
            .answer(&mut session, "List loan amounts")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccessDenied(_)));

        let turn = &session.history()[0];
        assert!(!turn.is_answered());
        assert_eq!(turn.response, err.user_message());
        assert_eq!(
            turn.candidate.as_ref().map(|c| c.status.clone()),
            Some(CandidateStatus::Rejected)
        );
    }

    #[tokio::test]
    async fn test_forbidden_column_is_not_executed() {
        let pipeline = pipeline(ScriptedClient::answering("SELECT ssn FROM cust_mast;")).await;
        let mut session = pipeline.open_session("Teller").unwrap();

        let err = pipeline
            .answer(&mut session, "Show customer ssn")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_forbidden_table_in_subquery_is_not_executed() {
        let (pipeline, engine) = recording_pipeline(
            "SELECT * FROM txn_hist WHERE amount < (SELECT MAX(amount) FROM loan_mast);",
        )
        .await;
        let mut session = pipeline.open_session("Teller").unwrap();

        let err = pipeline
            .answer(&mut session, "Transactions smaller than the biggest loan")
            .await
            .unwrap_err();
        assert_eq!(err, AppError::AccessDenied("table 'loan_mast'".to_string()));
        assert!(engine.executed.lock().unwrap().is_empty());
        assert_eq!(
            session.history()[0].candidate.as_ref().map(|c| c.status.clone()),
            Some(CandidateStatus::Rejected)
        );
    }

    #[tokio::test]
    async fn test_forbidden_column_in_union_or_predicate_is_not_executed() {
        for completion in [
            "SELECT cust_name FROM cust_mast UNION SELECT ssn FROM cust_mast;",
            "SELECT cust_name FROM cust_mast WHERE ssn LIKE '111%';",
        ] {
            let (pipeline, engine) = recording_pipeline(completion).await;
            let mut session = pipeline.open_session("Teller").unwrap();

            let err = pipeline
                .answer(&mut session, "Customer names and social security numbers")
                .await
                .unwrap_err();
            assert_eq!(
                err,
                AppError::AccessDenied("column 'ssn' of table 'cust_mast'".to_string())
            );
            assert!(engine.executed.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_allowed_statement_reaches_engine_once() {
        let (pipeline, engine) = recording_pipeline("SELECT * FROM txn_hist;").await;
        let mut session = pipeline.open_session("Teller").unwrap();

        pipeline
            .answer(&mut session, "Show me all transactions")
            .await
            .unwrap();
        assert_eq!(
            *engine.executed.lock().unwrap(),
            vec!["SELECT * FROM txn_hist;".to_string()]
        );
    }

    #[tokio::test]
    async fn test_manager_may_read_loans() {
        let pipeline = pipeline(ScriptedClient::answering("SELECT amount FROM loan_mast;")).await;
        let mut session = pipeline.open_session("Manager").unwrap();

        let answer = pipeline.answer(&mut session, "List loan amounts").await.unwrap();
        assert_eq!(answer.result.rows, vec![vec![json!(150000.0)]]);
    }

    #[tokio::test]
    async fn test_service_down_uses_fallback() {
        let pipeline = pipeline(ScriptedClient::down()).await;
        let mut session = pipeline.open_session("Teller").unwrap();

        let answer = pipeline
            .answer(&mut session, "How many accounts are there in total?")
            .await
            .unwrap();
        // acct_mast is the Teller's first table in catalog order
        assert_eq!(answer.statement, "SELECT COUNT(*) AS total_count FROM acct_mast;");
        assert_eq!(answer.source, CandidateSource::Fallback);
        assert_eq!(answer.result.rows, vec![vec![json!(2)]]);
    }

    #[tokio::test]
    async fn test_empty_result_response() {
        let pipeline = pipeline(ScriptedClient::answering(
            "SELECT * FROM txn_hist WHERE amount > 1000000;",
        ))
        .await;
        let mut session = pipeline.open_session("Teller").unwrap();

        let answer = pipeline
            .answer(&mut session, "Transactions above one million")
            .await
            .unwrap();
        assert_eq!(answer.response, "I couldn't find any data matching your query.");
    }

    #[tokio::test]
    async fn test_follow_up_sees_previous_query() {
        let client = ScriptedClient::answering("SELECT * FROM txn_hist;");
        let pipeline = pipeline(Arc::clone(&client)).await;
        let mut session = pipeline.open_session("Teller").unwrap();

        pipeline
            .answer(&mut session, "Show me all transactions")
            .await
            .unwrap();
        pipeline
            .answer(&mut session, "Only large ones from the above")
            .await
            .unwrap();

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 4);
        assert!(!prompts[0].contains("### PREVIOUS QUERY"));
        assert!(prompts[2].contains("### PREVIOUS QUERY\nSELECT * FROM txn_hist;"));
        assert!(prompts[2].contains("txn_id, acct_id, amount"));
    }

    #[tokio::test]
    async fn test_prompts_never_show_forbidden_schema() {
        let client = ScriptedClient::answering("SELECT * FROM txn_hist;");
        let pipeline = pipeline(Arc::clone(&client)).await;
        let mut session = pipeline.open_session("Teller").unwrap();

        pipeline
            .answer(&mut session, "cust_name with loan amount and social security")
            .await
            .unwrap();

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("cust_name: Asha"));
        for prompt in prompts.iter() {
            assert!(!prompt.contains("loan_mast"));
            assert!(!prompt.contains("ssn"));
            assert!(!prompt.contains("111-22-3333"));
        }
    }

    #[tokio::test]
    async fn test_unknown_role_and_unready_session() {
        let pipeline = pipeline(ScriptedClient::answering("SELECT * FROM txn_hist;")).await;
        assert!(matches!(
            pipeline.open_session("Janitor"),
            Err(AppError::ConfigError(_))
        ));

        let mut session = SessionContext::new("Teller");
        assert!(matches!(
            pipeline.answer(&mut session, "Show me all transactions").await,
            Err(AppError::ServiceUnavailable(_))
        ));
        assert!(session.history().is_empty());
    }
}
