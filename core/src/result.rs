//! The persisted outcome of one reconciliation run.
//!
//! One result per batch, keyed on batch_ref: a re-run replaces the
//! snapshot rather than appending a second one. Every summary number is
//! derived from the run, never hand-set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::MatchRules,
    duplicate::DuplicateGroup,
    record::MatchType,
    score::{FieldMismatch, MatchField},
    types::{BatchId, RecordId},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub total_records: i64,
    pub matched: i64,
    pub partially_matched: i64,
    pub unmatched: i64,
    /// Number of duplicate groups found in the batch.
    pub duplicates: i64,
    /// Number of individual records excluded as duplicate group members.
    /// matched + partially_matched + unmatched + duplicate_records
    /// accounts for every record in the batch.
    pub duplicate_records: i64,
    pub accuracy_percentage: f64,
}

impl ReconciliationSummary {
    /// Weighted accuracy over processed (non-duplicate) records: exact
    /// matches count 1.0, partial matches 0.5, rounded to a whole
    /// percent. A batch with nothing processed reports 0, never NaN.
    pub fn accuracy(&self) -> f64 {
        let processed = self.matched + self.partially_matched + self.unmatched;
        if processed == 0 {
            return 0.0;
        }
        let weighted = self.matched as f64 + self.partially_matched as f64 * 0.5;
        (weighted / processed as f64 * 100.0).round()
    }
}

/// One pairing in the result's ordered match list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEntry {
    pub system_record: RecordId,
    pub uploaded_record: RecordId,
    pub match_type: MatchType,
    pub confidence_score: f64,
    pub matched_fields: Vec<MatchField>,
    pub mismatched_fields: Vec<FieldMismatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub batch_ref: BatchId,
    pub summary: ReconciliationSummary,
    pub matches: Vec<MatchEntry>,
    pub unmatched_records: Vec<RecordId>,
    pub duplicate_groups: Vec<DuplicateGroup>,
    /// Wall clock from batch load to persistence.
    pub processing_time_ms: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// The exact rules in effect for this run, for reproducibility.
    pub rules_applied: MatchRules,
}
