use serde::{Deserialize, Serialize};
use std::fmt;

/// Which generation strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    RagGrounded,
    FullSchema,
    /// Heuristic statement used when the generation service failed
    Fallback,
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateSource::RagGrounded => write!(f, "rag_grounded"),
            CandidateSource::FullSchema => write!(f, "full_schema"),
            CandidateSource::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Admitted,
    Corrected,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub statement: String,
    pub source: CandidateSource,
    pub status: CandidateStatus,
    /// Set when the validator rewrote hallucinated identifiers.
    pub correction_note: Option<String>,
}

impl Candidate {
    pub fn new(statement: impl Into<String>, source: CandidateSource) -> Self {
        Self {
            statement: statement.into(),
            source,
            status: CandidateStatus::Pending,
            correction_note: None,
        }
    }

    pub fn admit(&mut self) {
        self.status = CandidateStatus::Admitted;
    }

    pub fn reject(&mut self) {
        self.status = CandidateStatus::Rejected;
    }

    pub fn apply_correction(&mut self, statement: String, note: String) {
        self.statement = statement;
        self.correction_note = Some(note);
        self.status = CandidateStatus::Corrected;
    }
}
