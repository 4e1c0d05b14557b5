//! Access Filter
//!
//! Coarse, text-based admissibility check used to choose between the
//! RAG-grounded and full-schema candidates. Exact table and column
//! enforcement happens in the schema validator.

use crate::domain::access_policy::{AccessScope, TableAccess};
use crate::domain::candidate::Candidate;
use crate::domain::error::{AppError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

static SELECT_FROM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\bselect\b.*\bfrom\b").unwrap());

pub struct AccessFilter<'a> {
    scope: &'a AccessScope,
}

impl<'a> AccessFilter<'a> {
    pub fn new(scope: &'a AccessScope) -> Self {
        Self { scope }
    }

    /// A statement is admissible when it mentions an allowed table together
    /// with that table's access (ALL, or one of its allowed columns), or when
    /// it is a generic `SELECT ... FROM ...` and the role can read any table.
    pub fn is_admissible(&self, statement: &str) -> bool {
        if self.scope.is_empty() {
            return false;
        }
        let sql_lower = statement.to_lowercase();

        for table in self.scope.tables() {
            if !sql_lower.contains(&table.to_lowercase()) {
                continue;
            }
            match self.scope.access(table) {
                Some(TableAccess::All) => return true,
                Some(TableAccess::Columns(cols)) => {
                    if cols.iter().any(|c| sql_lower.contains(&c.to_lowercase())) {
                        return true;
                    }
                }
                None => {}
            }
        }

        SELECT_FROM_PATTERN.is_match(&sql_lower)
    }

    /// Prefer the RAG-grounded candidate, then the full-schema one.
    pub fn select_candidate(
        &self,
        rag_grounded: Option<Candidate>,
        full_schema: Option<Candidate>,
    ) -> Result<Candidate> {
        for candidate in [rag_grounded, full_schema].into_iter().flatten() {
            if self.is_admissible(&candidate.statement) {
                let mut admitted = candidate;
                admitted.admit();
                info!(
                    role = %self.scope.role(),
                    source = %admitted.source,
                    "Candidate admitted"
                );
                return Ok(admitted);
            }
            debug!(
                role = %self.scope.role(),
                source = %candidate.source,
                statement = %candidate.statement,
                "Candidate not admissible"
            );
        }
        Err(AppError::NoAdmissibleCandidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::{CandidateSource, CandidateStatus};

    fn teller_scope() -> AccessScope {
        AccessScope::new(
            "Teller",
            vec![
                (
                    "cust_mast".to_string(),
                    TableAccess::Columns(vec!["cust_id".to_string(), "cust_name".to_string()]),
                ),
                ("txn_hist".to_string(), TableAccess::All),
            ],
        )
    }

    #[test]
    fn test_all_access_table_is_admissible() {
        let scope = teller_scope();
        let filter = AccessFilter::new(&scope);
        assert!(filter.is_admissible("SELECT * FROM txn_hist;"));
    }

    #[test]
    fn test_column_mention_is_admissible() {
        let scope = teller_scope();
        let filter = AccessFilter::new(&scope);
        assert!(filter.is_admissible("SELECT cust_name FROM cust_mast WHERE cust_id = 4;"));
    }

    #[test]
    fn test_non_select_without_allowed_table() {
        let scope = teller_scope();
        let filter = AccessFilter::new(&scope);
        assert!(!filter.is_admissible("DELETE FROM loan_mast;"));
        assert!(!filter.is_admissible("I don't know"));
    }

    #[test]
    fn test_generic_select_is_admissible() {
        let scope = teller_scope();
        let filter = AccessFilter::new(&scope);
        // loan_mast is rejected later by the schema validator
        assert!(filter.is_admissible("SELECT amount FROM loan_mast;"));
    }

    #[test]
    fn test_empty_scope_admits_nothing() {
        let scope = AccessScope::new("Nobody", vec![]);
        let filter = AccessFilter::new(&scope);
        assert!(!filter.is_admissible("SELECT * FROM txn_hist;"));
    }

    #[test]
    fn test_select_candidate_prefers_rag() {
        let scope = teller_scope();
        let filter = AccessFilter::new(&scope);
        let rag = Candidate::new("SELECT * FROM txn_hist;", CandidateSource::RagGrounded);
        let full = Candidate::new("SELECT cust_name FROM cust_mast;", CandidateSource::FullSchema);

        let chosen = filter.select_candidate(Some(rag), Some(full)).unwrap();
        assert_eq!(chosen.source, CandidateSource::RagGrounded);
        assert_eq!(chosen.status, CandidateStatus::Admitted);
    }

    #[test]
    fn test_select_candidate_falls_back_to_full_schema() {
        let scope = teller_scope();
        let filter = AccessFilter::new(&scope);
        let rag = Candidate::new("UPDATE loan_mast SET amount = 0;", CandidateSource::RagGrounded);
        let full = Candidate::new("SELECT * FROM txn_hist;", CandidateSource::FullSchema);

        let chosen = filter.select_candidate(Some(rag), Some(full)).unwrap();
        assert_eq!(chosen.source, CandidateSource::FullSchema);
    }

    #[test]
    fn test_select_candidate_none_admissible() {
        let scope = teller_scope();
        let filter = AccessFilter::new(&scope);
        let rag = Candidate::new("DROP TABLE loan_mast;", CandidateSource::RagGrounded);

        assert_eq!(
            filter.select_candidate(Some(rag), None),
            Err(AppError::NoAdmissibleCandidate)
        );
    }
}
