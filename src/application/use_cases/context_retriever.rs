//! Context Retriever
//!
//! Two nearest-neighbour corpora built once per session: one entry per schema
//! field and one per sampled data row. Queries are scored by cosine
//! similarity in the embedder's space, or by lexical overlap when no
//! embedding backend is reachable. Retrieval never fails the turn.

use super::embedding_service::{Embedder, EmbeddingService};
use crate::domain::access_policy::AccessScope;
use crate::domain::query_result::{display_value, QueryResult};
use crate::domain::schema::SchemaCatalog;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct IndexEntry {
    table: String,
    column: Option<String>,
    cells: Vec<(String, String)>,
    text: String,
    embedding: Option<Vec<f32>>,
}

impl IndexEntry {
    fn to_match(&self, score: f32) -> RetrievalMatch {
        RetrievalMatch {
            table: self.table.clone(),
            column: self.column.clone(),
            text: self.text.clone(),
            cells: self.cells.clone(),
            score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalMatch {
    pub table: String,
    /// Set for schema-field entries.
    pub column: Option<String>,
    pub text: String,
    /// Column/value pairs of a sampled row; empty for schema fields.
    pub cells: Vec<(String, String)>,
    pub score: f32,
}

fn render_row(table: &str, cells: &[(String, String)]) -> String {
    let cells: Vec<String> = cells
        .iter()
        .map(|(column, value)| format!("{}: {}", column, value))
        .collect();
    format!("table: {} | {}", table, cells.join(" | "))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievedContext {
    pub schema_matches: Vec<RetrievalMatch>,
    pub row_matches: Vec<RetrievalMatch>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.schema_matches.is_empty() && self.row_matches.is_empty()
    }

    /// Keep only what the caller may read: schema fields of allowed columns,
    /// and sampled rows cut down to their allowed cells.
    pub fn restricted_to(&self, scope: &AccessScope) -> RetrievedContext {
        let schema_matches = self
            .schema_matches
            .iter()
            .filter(|m| match (scope.access(&m.table), m.column.as_deref()) {
                (Some(access), Some(column)) => access.allows_column(column),
                (Some(_), None) => true,
                (None, _) => false,
            })
            .cloned()
            .collect();

        let row_matches = self
            .row_matches
            .iter()
            .filter_map(|m| {
                let access = scope.access(&m.table)?;
                if access.is_all() {
                    return Some(m.clone());
                }
                let cells: Vec<(String, String)> = m
                    .cells
                    .iter()
                    .filter(|(column, _)| access.allows_column(column))
                    .cloned()
                    .collect();
                if cells.is_empty() {
                    return None;
                }
                Some(RetrievalMatch {
                    text: render_row(&m.table, &cells),
                    cells,
                    ..m.clone()
                })
            })
            .collect();

        RetrievedContext {
            schema_matches,
            row_matches,
        }
    }
}

/// Immutable once built; share it behind an `Arc` across sessions.
pub struct RetrievalIndex {
    schema: Vec<IndexEntry>,
    rows: Vec<IndexEntry>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl RetrievalIndex {
    /// Build both corpora. Row samples are `(table, sampled rows)` pairs.
    ///
    /// If the embedder fails here the index stays lexical for its lifetime.
    pub async fn build(
        catalog: &SchemaCatalog,
        row_samples: &[(String, QueryResult)],
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let mut schema = Vec::new();
        for table in catalog.tables() {
            for column in &table.columns {
                let description = column
                    .description
                    .as_deref()
                    .or(table.description.as_deref())
                    .unwrap_or("");
                let text = format!("{} {} {}", table.name, column.name, description)
                    .trim_end()
                    .to_string();
                schema.push(IndexEntry {
                    table: table.name.clone(),
                    column: Some(column.name.clone()),
                    cells: Vec::new(),
                    text,
                    embedding: None,
                });
            }
        }

        let mut rows = Vec::new();
        for (table, sample) in row_samples {
            for row in &sample.rows {
                let cells: Vec<(String, String)> = sample
                    .columns
                    .iter()
                    .zip(row.iter())
                    .map(|(column, value)| (column.clone(), display_value(value)))
                    .collect();
                rows.push(IndexEntry {
                    table: table.clone(),
                    column: None,
                    text: render_row(table, &cells),
                    cells,
                    embedding: None,
                });
            }
        }

        let embedder = match embedder {
            Some(embedder) => {
                let embedded = embed_entries(embedder.as_ref(), &mut schema).await
                    && embed_entries(embedder.as_ref(), &mut rows).await;
                if embedded {
                    Some(embedder)
                } else {
                    for entry in schema.iter_mut().chain(rows.iter_mut()) {
                        entry.embedding = None;
                    }
                    None
                }
            }
            None => None,
        };

        info!(
            schema_entries = schema.len(),
            row_entries = rows.len(),
            dense = embedder.is_some(),
            "Retrieval index built"
        );

        Self {
            schema,
            rows,
            embedder,
        }
    }

    pub fn schema_len(&self) -> usize {
        self.schema.len()
    }

    pub fn row_len(&self) -> usize {
        self.rows.len()
    }

    /// True when matches are ranked by embeddings rather than word overlap.
    pub fn is_dense(&self) -> bool {
        self.embedder.is_some()
    }

    pub async fn retrieve(&self, question: &str, k_schema: usize, k_rows: usize) -> RetrievedContext {
        if let Some(embedder) = &self.embedder {
            match embedder.embed(question).await {
                Ok(query) => {
                    return RetrievedContext {
                        schema_matches: dense_top_k(&query, &self.schema, k_schema),
                        row_matches: dense_top_k(&query, &self.rows, k_rows),
                    };
                }
                Err(e) => {
                    warn!(error = %e, "Question embedding failed, using lexical retrieval");
                }
            }
        }

        RetrievedContext {
            schema_matches: lexical_top_k(question, &self.schema, k_schema),
            row_matches: lexical_top_k(question, &self.rows, k_rows),
        }
    }
}

async fn embed_entries(embedder: &dyn Embedder, entries: &mut [IndexEntry]) -> bool {
    if entries.is_empty() {
        return true;
    }
    let texts: Vec<String> = entries.iter().map(|e| e.text.clone()).collect();
    match embedder.embed_batch(&texts).await {
        Ok(vectors) if vectors.len() == entries.len() => {
            for (entry, vector) in entries.iter_mut().zip(vectors) {
                entry.embedding = Some(vector);
            }
            true
        }
        Ok(vectors) => {
            warn!(
                expected = entries.len(),
                got = vectors.len(),
                "Embedding count mismatch, using lexical retrieval"
            );
            false
        }
        Err(e) => {
            warn!(error = %e, "Embedding backend unavailable, using lexical retrieval");
            false
        }
    }
}

fn rank(mut matches: Vec<RetrievalMatch>, k: usize) -> Vec<RetrievalMatch> {
    // stable sort keeps corpus order between equal scores
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(k);
    matches
}

fn dense_top_k(query: &[f32], entries: &[IndexEntry], k: usize) -> Vec<RetrievalMatch> {
    let matches = entries
        .iter()
        .filter_map(|entry| {
            let embedding = entry.embedding.as_ref()?;
            Some(entry.to_match(EmbeddingService::cosine_similarity(query, embedding)))
        })
        .collect();
    rank(matches, k)
}

fn question_words(question: &str) -> HashSet<String> {
    question
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Count of question words found in the entry text. Each distinct word
/// counts once, so repeating a word in the question does not raise the score.
pub fn lexical_score(question: &str, text: &str) -> f32 {
    let text = text.to_lowercase();
    question_words(question)
        .iter()
        .filter(|w| text.contains(w.as_str()))
        .count() as f32
}

fn lexical_top_k(question: &str, entries: &[IndexEntry], k: usize) -> Vec<RetrievalMatch> {
    let matches = entries
        .iter()
        .map(|entry| entry.to_match(lexical_score(question, &entry.text)))
        .filter(|m| m.score > 0.0)
        .collect();
    rank(matches, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::access_policy::TableAccess;
    use crate::domain::error::{AppError, Result};
    use crate::domain::schema::TableSchema;
    use async_trait::async_trait;
    use serde_json::json;

    const VOCABULARY: &[&str] = &["cust", "name", "acct", "balance", "txn", "amount"];

    /// One dimension per vocabulary word.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    VOCABULARY
                        .iter()
                        .map(|w| if t.contains(w) { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect())
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::ServiceUnavailable("connection refused".to_string()))
        }
    }

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![
            TableSchema::new("cust_mast", &["cust_id", "cust_name"]),
            TableSchema::new("acct_mast", &["acct_id", "balance"]),
            TableSchema::new("txn_hist", &["txn_id", "amount"]),
        ])
    }

    fn samples() -> Vec<(String, QueryResult)> {
        vec![(
            "acct_mast".to_string(),
            QueryResult::new(
                vec!["acct_id".to_string(), "balance".to_string()],
                vec![vec![json!(1), json!(5200.5)], vec![json!(2), json!(80)]],
            ),
        )]
    }

    #[tokio::test]
    async fn test_dense_retrieval() {
        let embedder: Arc<dyn Embedder> = Arc::new(KeywordEmbedder);
        let index = RetrievalIndex::build(&catalog(), &samples(), Some(embedder)).await;
        assert!(index.is_dense());
        assert_eq!(index.schema_len(), 6);
        assert_eq!(index.row_len(), 2);

        let context = index.retrieve("what is the acct balance", 1, 1).await;
        assert_eq!(context.schema_matches.len(), 1);
        assert_eq!(context.schema_matches[0].text, "acct_mast balance");
        assert_eq!(context.row_matches[0].table, "acct_mast");
    }

    #[tokio::test]
    async fn test_lexical_fallback_when_backend_down() {
        let embedder: Arc<dyn Embedder> = Arc::new(DownEmbedder);
        let index = RetrievalIndex::build(&catalog(), &samples(), Some(embedder)).await;
        assert!(!index.is_dense());

        let context = index.retrieve("show txn amount", 2, 3).await;
        assert_eq!(context.schema_matches[0].text, "txn_hist amount");
        assert_eq!(context.schema_matches.len(), 2);
        assert!(context.row_matches.is_empty());
    }

    #[tokio::test]
    async fn test_restricted_to_hides_forbidden_columns() {
        let index = RetrievalIndex::build(&catalog(), &samples(), None).await;
        let context = index.retrieve("acct balance", 10, 10).await;
        let scope = AccessScope::new(
            "Clerk",
            vec![(
                "acct_mast".to_string(),
                TableAccess::Columns(vec!["acct_id".to_string()]),
            )],
        );

        let restricted = context.restricted_to(&scope);
        let fields: Vec<&str> = restricted.schema_matches.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(fields, vec!["acct_mast acct_id"]);
        assert_eq!(restricted.row_matches[0].text, "table: acct_mast | acct_id: 1");
        assert!(restricted.row_matches.iter().all(|m| !m.text.contains("balance")));
    }

    #[tokio::test]
    async fn test_restricted_to_scope() {
        let index = RetrievalIndex::build(&catalog(), &samples(), None).await;
        let context = index.retrieve("balance amount", 5, 5).await;
        let scope = AccessScope::new("Teller", vec![("txn_hist".to_string(), TableAccess::All)]);

        let restricted = context.restricted_to(&scope);
        assert!(!restricted.is_empty());
        assert!(restricted.schema_matches.iter().all(|m| m.table == "txn_hist"));
        assert!(restricted.row_matches.is_empty());
    }

    #[test]
    fn test_lexical_score_counts_distinct_words() {
        assert_eq!(lexical_score("balance balance acct", "acct_mast balance"), 2.0);
        assert_eq!(lexical_score("loans", "acct_mast balance"), 0.0);
    }
}
