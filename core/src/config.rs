//! Matching thresholds, passed into the engine at construction.
//!
//! RULE: No process-wide defaults and no hidden mutation. Every run
//! snapshots the rules it used into the persisted result so a stored
//! outcome stays reproducible after the live configuration changes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRules {
    /// Minimum weighted score (0-100) for a partial match.
    pub partial_match_threshold: f64,
    /// Largest amount variance, in percent of the system amount, that
    /// still earns amount credit during scoring.
    pub amount_variance_percentage: f64,
    /// How far apart two timestamps may be while still counting as the
    /// same instant in the exact-match predicate.
    pub exact_date_tolerance_ms: i64,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            partial_match_threshold: 98.0,
            amount_variance_percentage: 2.0,
            exact_date_tolerance_ms: 1_000,
        }
    }
}
