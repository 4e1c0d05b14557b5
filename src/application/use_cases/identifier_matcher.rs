//! Fuzzy identifier matching for hallucinated table and column names.
//!
//! Similarity is the sequence-matcher ratio `2 * matches / (len(a) + len(b))`
//! over characters, computed case-insensitively.

use crate::domain::schema::strip_quotes;
use similar::TextDiff;

/// Minimum ratio for a hallucinated identifier to be rewritten.
pub const MIN_SIMILARITY: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierMatch {
    /// The allowed identifier, in its original spelling
    pub name: String,
    pub score: f32,
}

pub fn similarity_ratio(a: &str, b: &str) -> f32 {
    let a = strip_quotes(a).to_lowercase();
    let b = strip_quotes(b).to_lowercase();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    TextDiff::from_chars(a.as_str(), b.as_str()).ratio()
}

pub struct IdentifierMatcher {
    cutoff: f32,
}

impl IdentifierMatcher {
    pub fn new(cutoff: f32) -> Self {
        Self { cutoff }
    }

    /// Best candidate scoring at or above the cutoff; ties keep the earliest candidate.
    pub fn best_match<'a, I>(&self, needle: &str, candidates: I) -> Option<IdentifierMatch>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<IdentifierMatch> = None;
        for candidate in candidates {
            let score = similarity_ratio(needle, candidate);
            if score < self.cutoff {
                continue;
            }
            let better = best.as_ref().map(|b| score > b.score).unwrap_or(true);
            if better {
                best = Some(IdentifierMatch {
                    name: candidate.to_string(),
                    score,
                });
            }
        }
        best
    }
}

impl Default for IdentifierMatcher {
    fn default() -> Self {
        Self::new(MIN_SIMILARITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_ratio() {
        // 9 shared characters over 22 total
        let score = similarity_ratio("customer_mast", "cust_mast");
        assert!((score - 18.0 / 22.0).abs() < 0.001, "score = {}", score);
        assert!((similarity_ratio("TXN_HIST", "txn_hist") - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_best_match_picks_highest() {
        let matcher = IdentifierMatcher::default();
        let tables = ["acct_mast", "cust_mast", "txn_hist"];
        let found = matcher.best_match("customer_mast", tables).unwrap();
        assert_eq!(found.name, "cust_mast");
    }

    #[test]
    fn test_best_match_below_cutoff() {
        let matcher = IdentifierMatcher::default();
        let tables = ["cust_mast", "txn_hist"];
        assert!(matcher.best_match("xyz_unrelated", tables).is_none());
    }

    #[test]
    fn test_cutoff_is_inclusive() {
        // "ab" vs "ax": one shared character over four
        let matcher = IdentifierMatcher::new(0.5);
        assert!(matcher.best_match("ab", ["ax"]).is_some());
        let strict = IdentifierMatcher::new(0.51);
        assert!(strict.best_match("ab", ["ax"]).is_none());
    }
}
