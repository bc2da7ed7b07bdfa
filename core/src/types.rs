//! Shared primitive types used across the reconciliation engine.

/// A stable, unique identifier for a stored record.
pub type RecordId = String;

/// Identifies one upload batch submitted for reconciliation.
pub type BatchId = String;

/// The operator or service principal driving a mutation.
pub type ActorId = String;
