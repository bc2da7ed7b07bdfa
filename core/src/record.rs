//! The transaction record entity shared by both partitions.
//!
//! RULE: `source` is immutable after creation. The engine mutates only
//! upload-partition records, and only their status/match fields; system
//! records are reference truth and are never written by a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActorId, BatchId, RecordId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    System,
    Upload,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Upload => "upload",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "upload" => Some(Self::Upload),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Matched,
    PartiallyMatched,
    Unmatched,
    Duplicate,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Matched => "matched",
            Self::PartiallyMatched => "partially_matched",
            Self::Unmatched => "unmatched",
            Self::Duplicate => "duplicate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "matched" => Some(Self::Matched),
            "partially_matched" => Some(Self::PartiallyMatched),
            "unmatched" => Some(Self::Unmatched),
            "duplicate" => Some(Self::Duplicate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Partial,
    None,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Partial => "partial",
            Self::None => "none",
        }
    }
}

/// Match metadata written onto an upload record once it is classified.
/// A record with status=duplicate never carries this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDetails {
    pub matched_with: RecordId,
    pub match_type: MatchType,
    pub confidence_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance_percentage: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnRecord {
    pub record_id: RecordId,
    pub source: RecordSource,
    /// Present iff source=upload: the batch this record arrived in.
    pub batch_ref: Option<BatchId>,
    pub transaction_id: String,
    pub reference_number: String,
    pub amount: f64,
    pub date: DateTime<Utc>,
    /// Free-form additional columns carried through ingestion.
    pub attributes: serde_json::Value,
    pub status: RecordStatus,
    pub match_details: Option<MatchDetails>,
    pub is_duplicate: bool,
    pub duplicate_group: Option<String>,
    /// Canonical member of this record's duplicate group, if any.
    pub duplicate_of: Option<RecordId>,
    /// Monotonic, bumped on every mutation. Guards concurrent writes.
    pub version: i64,
    pub last_modified_by: Option<ActorId>,
}

impl TxnRecord {
    /// A reference-partition record.
    pub fn system(
        record_id: impl Into<RecordId>,
        transaction_id: impl Into<String>,
        reference_number: impl Into<String>,
        amount: f64,
        date: DateTime<Utc>,
    ) -> Self {
        Self::new(record_id, RecordSource::System, None, transaction_id, reference_number, amount, date)
    }

    /// An upload-partition record awaiting reconciliation.
    pub fn uploaded(
        record_id: impl Into<RecordId>,
        batch_ref: impl Into<BatchId>,
        transaction_id: impl Into<String>,
        reference_number: impl Into<String>,
        amount: f64,
        date: DateTime<Utc>,
    ) -> Self {
        Self::new(
            record_id,
            RecordSource::Upload,
            Some(batch_ref.into()),
            transaction_id,
            reference_number,
            amount,
            date,
        )
    }

    fn new(
        record_id: impl Into<RecordId>,
        source: RecordSource,
        batch_ref: Option<BatchId>,
        transaction_id: impl Into<String>,
        reference_number: impl Into<String>,
        amount: f64,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            source,
            batch_ref,
            transaction_id: transaction_id.into(),
            reference_number: reference_number.into(),
            amount,
            date,
            attributes: serde_json::json!({}),
            status: RecordStatus::Pending,
            match_details: None,
            is_duplicate: false,
            duplicate_group: None,
            duplicate_of: None,
            version: 1,
            last_modified_by: None,
        }
    }
}
