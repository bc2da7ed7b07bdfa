//! Duplicate detection: groups one batch's upload records that share a
//! transaction id.
//!
//! Pure function over the batch: no status writes happen here (the
//! engine applies them centrally). Grouping is batch-local only, never
//! across batches and never against the system partition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{record::TxnRecord, types::RecordId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub transaction_id: String,
    /// Members in batch scan order; the first is the canonical record.
    pub records: Vec<RecordId>,
    pub count: usize,
}

/// Group upload records by transaction id and keep the keys with two or
/// more members. A batch with no duplicates yields an empty map, which
/// is a normal outcome, not an error. BTreeMap keeps group order stable
/// for persistence and tests.
pub fn detect_duplicates(records: &[TxnRecord]) -> BTreeMap<String, DuplicateGroup> {
    let mut by_txn: BTreeMap<String, Vec<RecordId>> = BTreeMap::new();
    for record in records {
        by_txn
            .entry(record.transaction_id.clone())
            .or_default()
            .push(record.record_id.clone());
    }

    by_txn
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(transaction_id, records)| {
            let count = records.len();
            (
                transaction_id.clone(),
                DuplicateGroup {
                    transaction_id,
                    records,
                    count,
                },
            )
        })
        .collect()
}

/// Whether a transaction id belongs to any duplicate group.
pub fn is_duplicate(transaction_id: &str, groups: &BTreeMap<String, DuplicateGroup>) -> bool {
    groups.contains_key(transaction_id)
}
