use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppError {
    /// Generation or embedding backend unreachable, non-success status or timed out.
    ServiceUnavailable(String),
    DialectError(String),
    UnresolvableTable {
        table: String,
    },
    UnresolvableColumn {
        table: String,
        column: String,
    },
    MalformedSql(String),
    /// The statement names a real table or column outside the caller's role.
    AccessDenied(String),
    /// A corrected statement still needed another correction round.
    CorrectionLimit(String),
    NoAdmissibleCandidate,
    ExecutionError(String),
    ConfigError(String),
    ParseError(String),
    IoError(String),
}

impl AppError {
    /// Sentence shown to the person who asked the question.
    pub fn user_message(&self) -> String {
        match self {
            AppError::UnresolvableTable { table } => format!(
                "Your request could not be completed because the model tried to use table '{}' \
                 which does not exist in your database. Please rephrase your question.",
                table
            ),
            AppError::UnresolvableColumn { table, column } => format!(
                "Your request could not be completed because the model tried to use column '{}' \
                 for table '{}', which does not exist in your database. Please rephrase your question.",
                column, table
            ),
            AppError::NoAdmissibleCandidate => "You are not allowed to access the requested data \
                 or the query could not be generated."
                .to_string(),
            AppError::AccessDenied(what) => {
                format!("You are not allowed to access {}.", what)
            }
            AppError::DialectError(msg) => format!("SQL validation failed: {}", msg),
            AppError::MalformedSql(msg) => format!("SQL validation failed: {}", msg),
            AppError::CorrectionLimit(msg) => {
                format!("SQL validation failed after correction: {}", msg)
            }
            AppError::ExecutionError(msg) => format!("Error executing SQL: {}", msg),
            other => other.to_string(),
        }
    }

    /// True for the outcomes produced by the schema validator.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::DialectError(_)
                | AppError::UnresolvableTable { .. }
                | AppError::UnresolvableColumn { .. }
                | AppError::MalformedSql(_)
                | AppError::AccessDenied(_)
                | AppError::CorrectionLimit(_)
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::DialectError(msg) => write!(f, "Dialect error: {}", msg),
            AppError::UnresolvableTable { table } => {
                write!(f, "Unresolvable table: '{}'", table)
            }
            AppError::UnresolvableColumn { table, column } => {
                write!(f, "Unresolvable column: '{}' for table '{}'", column, table)
            }
            AppError::MalformedSql(msg) => write!(f, "Malformed SQL: {}", msg),
            AppError::AccessDenied(what) => write!(f, "Access denied: {}", what),
            AppError::CorrectionLimit(msg) => write!(f, "Correction limit reached: {}", msg),
            AppError::NoAdmissibleCandidate => write!(f, "No admissible candidate"),
            AppError::ExecutionError(msg) => write!(f, "Execution error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            AppError::IoError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ParseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_names_table() {
        let err = AppError::UnresolvableTable {
            table: "xyz_unrelated".to_string(),
        };
        assert!(err.user_message().contains("'xyz_unrelated'"));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_user_message_names_table_and_column() {
        let err = AppError::UnresolvableColumn {
            table: "cust_mast".to_string(),
            column: "ssn".to_string(),
        };
        let msg = err.user_message();
        assert!(msg.contains("'ssn'"));
        assert!(msg.contains("'cust_mast'"));
    }

    #[test]
    fn test_no_admissible_candidate_message() {
        let msg = AppError::NoAdmissibleCandidate.user_message();
        assert!(msg.starts_with("You are not allowed to access the requested data"));
        assert!(!AppError::NoAdmissibleCandidate.is_rejection());
    }
}
