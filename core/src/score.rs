//! Weighted field comparison between an uploaded record and a system
//! candidate.
//!
//! Weights sum to 100: transaction id 40, reference number 35, amount
//! 20, date 5. Identifiers are all-or-nothing on exact equality. Amount
//! credit scales with variance and is only awarded within the configured
//! tolerance. Date credit compares calendar day, not timestamp.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{config::MatchRules, record::TxnRecord};

pub const WEIGHT_TRANSACTION_ID: f64 = 40.0;
pub const WEIGHT_REFERENCE_NUMBER: f64 = 35.0;
pub const WEIGHT_AMOUNT: f64 = 20.0;
pub const WEIGHT_DATE: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    TransactionId,
    ReferenceNumber,
    Amount,
    Date,
}

impl MatchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransactionId => "transaction_id",
            Self::ReferenceNumber => "reference_number",
            Self::Amount => "amount",
            Self::Date => "date",
        }
    }
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field that failed to earn full credit, with both raw values and,
/// for amounts, the variance detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMismatch {
    pub field: MatchField,
    pub uploaded_value: String,
    pub system_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance_percentage: Option<f64>,
}

/// Variance of the uploaded amount relative to the system amount, in
/// percent. None when the system amount is zero: a zero denominator
/// earns no variance credit rather than propagating infinity or NaN.
pub fn amount_variance_percent(uploaded: f64, system: f64) -> Option<f64> {
    if system == 0.0 {
        return None;
    }
    Some((uploaded - system).abs() / system * 100.0)
}

pub fn same_calendar_day(a: &TxnRecord, b: &TxnRecord) -> bool {
    a.date.date_naive() == b.date.date_naive()
}

/// Deterministic weighted score in [0, 100].
pub fn match_score(uploaded: &TxnRecord, system: &TxnRecord, rules: &MatchRules) -> f64 {
    let mut score = 0.0;

    if uploaded.transaction_id == system.transaction_id {
        score += WEIGHT_TRANSACTION_ID;
    }

    if uploaded.reference_number == system.reference_number {
        score += WEIGHT_REFERENCE_NUMBER;
    }

    if let Some(variance_pct) = amount_variance_percent(uploaded.amount, system.amount) {
        if variance_pct <= rules.amount_variance_percentage {
            score += WEIGHT_AMOUNT * (1.0 - variance_pct / 100.0);
        }
    }

    if same_calendar_day(uploaded, system) {
        score += WEIGHT_DATE;
    }

    score.min(100.0)
}

/// Fields that agree exactly. Amounts are compared for equality here,
/// not by tolerance; a tolerated variance is still a mismatched field.
pub fn matched_fields(uploaded: &TxnRecord, system: &TxnRecord) -> Vec<MatchField> {
    let mut fields = Vec::new();
    if uploaded.transaction_id == system.transaction_id {
        fields.push(MatchField::TransactionId);
    }
    if uploaded.reference_number == system.reference_number {
        fields.push(MatchField::ReferenceNumber);
    }
    if uploaded.amount == system.amount {
        fields.push(MatchField::Amount);
    }
    if same_calendar_day(uploaded, system) {
        fields.push(MatchField::Date);
    }
    fields
}

pub fn mismatched_fields(uploaded: &TxnRecord, system: &TxnRecord) -> Vec<FieldMismatch> {
    let mut fields = Vec::new();

    if uploaded.transaction_id != system.transaction_id {
        fields.push(FieldMismatch {
            field: MatchField::TransactionId,
            uploaded_value: uploaded.transaction_id.clone(),
            system_value: system.transaction_id.clone(),
            variance: None,
            variance_percentage: None,
        });
    }

    if uploaded.reference_number != system.reference_number {
        fields.push(FieldMismatch {
            field: MatchField::ReferenceNumber,
            uploaded_value: uploaded.reference_number.clone(),
            system_value: system.reference_number.clone(),
            variance: None,
            variance_percentage: None,
        });
    }

    if uploaded.amount != system.amount {
        fields.push(FieldMismatch {
            field: MatchField::Amount,
            uploaded_value: uploaded.amount.to_string(),
            system_value: system.amount.to_string(),
            variance: Some((uploaded.amount - system.amount).abs()),
            variance_percentage: amount_variance_percent(uploaded.amount, system.amount),
        });
    }

    if !same_calendar_day(uploaded, system) {
        fields.push(FieldMismatch {
            field: MatchField::Date,
            uploaded_value: uploaded.date.to_rfc3339(),
            system_value: system.date.to_rfc3339(),
            variance: None,
            variance_percentage: None,
        });
    }

    fields
}
