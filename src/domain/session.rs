//! Session-scoped mutable state, owned by exactly one caller at a time.

use super::candidate::Candidate;
use super::query_result::QueryResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Failed,
}

/// One question and what became of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTurn {
    pub question: String,
    pub candidate: Option<Candidate>,
    pub result: Option<QueryResult>,
    pub response: String,
    pub asked_at: DateTime<Utc>,
}

impl QueryTurn {
    pub fn answered(
        question: &str,
        candidate: Candidate,
        result: QueryResult,
        response: String,
    ) -> Self {
        Self {
            question: question.to_string(),
            candidate: Some(candidate),
            result: Some(result),
            response,
            asked_at: Utc::now(),
        }
    }

    pub fn failed(question: &str, candidate: Option<Candidate>, response: String) -> Self {
        Self {
            question: question.to_string(),
            candidate,
            result: None,
            response,
            asked_at: Utc::now(),
        }
    }

    pub fn is_answered(&self) -> bool {
        self.result.is_some()
    }
}

/// SQL and result columns of an earlier turn, offered to follow-up questions.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorTurn {
    pub sql: String,
    pub result_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: Uuid,
    pub role: String,
    pub system_ready: bool,
    pub connection: ConnectionStatus,
    history: Vec<QueryTurn>,
}

impl SessionContext {
    pub fn new(role: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: role.to_string(),
            system_ready: false,
            connection: ConnectionStatus::Disconnected,
            history: Vec::new(),
        }
    }

    pub fn mark_ready(&mut self) {
        self.system_ready = true;
        self.connection = ConnectionStatus::Connected;
    }

    pub fn history(&self) -> &[QueryTurn] {
        &self.history
    }

    pub fn record(&mut self, turn: QueryTurn) {
        self.history.push(turn);
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Most recent turn that executed a statement.
    pub fn prior_turn(&self) -> Option<PriorTurn> {
        self.history.iter().rev().find_map(|turn| {
            let candidate = turn.candidate.as_ref()?;
            let result = turn.result.as_ref()?;
            Some(PriorTurn {
                sql: candidate.statement.clone(),
                result_columns: result.columns.clone(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::CandidateSource;

    #[test]
    fn test_prior_turn_skips_failed_turns() {
        let mut session = SessionContext::new("Teller");
        assert!(session.prior_turn().is_none());

        session.record(QueryTurn::answered(
            "Show me all transactions",
            Candidate::new("SELECT * FROM txn_hist;", CandidateSource::RagGrounded),
            QueryResult::new(vec!["txn_id".to_string()], vec![]),
            "I couldn't find any data matching your query.".to_string(),
        ));
        session.record(QueryTurn::failed(
            "Show me secrets",
            None,
            "not allowed".to_string(),
        ));

        let prior = session.prior_turn().unwrap();
        assert_eq!(prior.sql, "SELECT * FROM txn_hist;");
        assert_eq!(prior.result_columns, vec!["txn_id"]);
        assert_eq!(session.history().len(), 2);

        session.clear_history();
        assert!(session.prior_turn().is_none());
    }
}
