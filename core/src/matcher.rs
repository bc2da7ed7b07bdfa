//! Pairs one uploaded record against the system partition.
//!
//! Two passes, in order:
//!   1. Exact: first system record with identical transaction id,
//!      reference number, and amount, dated within the configured
//!      tolerance (default one second). First hit wins.
//!   2. Partial: score every system record; keep the best candidate at
//!      or above the partial threshold. Strict `>` when comparing, so
//!      the first record to reach a score wins ties.
//!
//! Callers pre-sort system records by record id, which makes both
//! first-hit rules deterministic instead of retrieval-order flaky.
//! O(uploaded x system) per batch; the system set is loaded once.

use serde::{Deserialize, Serialize};

use crate::{
    config::MatchRules,
    record::{MatchType, TxnRecord},
    score::{self, FieldMismatch, MatchField},
    types::RecordId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub match_type: MatchType,
    pub system_record: Option<RecordId>,
    pub confidence_score: f64,
    pub matched_fields: Vec<MatchField>,
    pub mismatched_fields: Vec<FieldMismatch>,
}

pub fn is_exact_match(uploaded: &TxnRecord, system: &TxnRecord, rules: &MatchRules) -> bool {
    uploaded.transaction_id == system.transaction_id
        && uploaded.amount == system.amount
        && uploaded.reference_number == system.reference_number
        && (uploaded.date - system.date).num_milliseconds().abs() < rules.exact_date_tolerance_ms
}

pub fn find_match(
    uploaded: &TxnRecord,
    system_records: &[TxnRecord],
    rules: &MatchRules,
) -> MatchOutcome {
    for system in system_records {
        if is_exact_match(uploaded, system, rules) {
            return MatchOutcome {
                match_type: MatchType::Exact,
                system_record: Some(system.record_id.clone()),
                confidence_score: 100.0,
                matched_fields: vec![
                    MatchField::TransactionId,
                    MatchField::Amount,
                    MatchField::ReferenceNumber,
                    MatchField::Date,
                ],
                mismatched_fields: Vec::new(),
            };
        }
    }

    let mut best: Option<&TxnRecord> = None;
    let mut best_score = 0.0;

    for system in system_records {
        let candidate_score = score::match_score(uploaded, system, rules);
        if candidate_score > best_score && candidate_score >= rules.partial_match_threshold {
            best_score = candidate_score;
            best = Some(system);
        }
    }

    match best {
        Some(system) => MatchOutcome {
            match_type: MatchType::Partial,
            system_record: Some(system.record_id.clone()),
            confidence_score: best_score,
            matched_fields: score::matched_fields(uploaded, system),
            mismatched_fields: score::mismatched_fields(uploaded, system),
        },
        None => MatchOutcome {
            match_type: MatchType::None,
            system_record: None,
            confidence_score: 0.0,
            matched_fields: Vec::new(),
            mismatched_fields: Vec::new(),
        },
    }
}
