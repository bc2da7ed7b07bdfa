//! Transaction reconciliation engine.
//!
//! Matches uploaded transaction batches against the system partition:
//! duplicate detection first, then exact matching, then weighted
//! partial scoring, with every status write version-guarded and every
//! run audited. One persisted result snapshot per batch.

pub mod audit;
pub mod config;
pub mod duplicate;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod record;
pub mod result;
pub mod score;
pub mod store;
pub mod types;

pub use config::MatchRules;
pub use engine::{ReconEngine, RunLocks};
pub use error::{ReconError, ReconResult};
pub use record::{MatchType, RecordSource, RecordStatus, TxnRecord};
pub use result::{ReconciliationResult, ReconciliationSummary};
pub use store::RecordStore;
