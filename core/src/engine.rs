//! The reconciliation engine. Pairs one upload batch against the
//! system partition and persists a single, replaceable result snapshot.
//!
//! EXECUTION ORDER (fixed, never reordered):
//!   1. Claim the per-batch run lock
//!   2. Load both partitions (system pre-sorted by record id)
//!   3. Detect duplicates (pure, batch-local)
//!   4. Match and classify every non-duplicate record
//!   5. Aggregate accuracy and build the result
//!   6. Persist statuses + result in one transaction
//!   7. Flush the audit buffer (best-effort)
//!
//! RULES:
//!   - System-partition records are never written.
//!   - Every record write is version-guarded, with one re-read retry.
//!   - A failed run rolls back all of its writes; no partial state is
//!     ever visible to readers.
//!   - The engine never retries a whole run; scheduling callers own
//!     retry and backoff.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::{
    audit::{AuditEvent, AuditTrail},
    config::MatchRules,
    duplicate,
    error::{ReconError, ReconResult},
    matcher,
    record::{MatchDetails, MatchType, RecordStatus, TxnRecord},
    result::{MatchEntry, ReconciliationResult, ReconciliationSummary},
    score,
    store::RecordStore,
    types::BatchId,
};

/// Registry of batches with a run in flight. Clones share the same
/// registry: engines serving the same database must share one, so a
/// manual retry racing an automated trigger cannot interleave writes.
#[derive(Debug, Clone, Default)]
pub struct RunLocks {
    in_flight: Arc<Mutex<HashSet<BatchId>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a batch, failing if another run already holds it.
    pub fn acquire(&self, batch_ref: &str) -> ReconResult<RunLockGuard> {
        let mut held = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(batch_ref.to_string()) {
            return Err(ReconError::ConcurrentRun {
                batch_ref: batch_ref.to_string(),
            });
        }
        Ok(RunLockGuard {
            locks: self.clone(),
            batch_ref: batch_ref.to_string(),
        })
    }

    fn release(&self, batch_ref: &str) {
        let mut held = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(batch_ref);
    }
}

/// Releases the batch claim on drop, including on error paths.
pub struct RunLockGuard {
    locks: RunLocks,
    batch_ref: BatchId,
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.locks.release(&self.batch_ref);
    }
}

pub struct ReconEngine {
    pub store: RecordStore,
    rules: MatchRules,
    locks: RunLocks,
}

impl ReconEngine {
    pub fn new(store: RecordStore, rules: MatchRules) -> Self {
        Self {
            store,
            rules,
            locks: RunLocks::new(),
        }
    }

    /// Wire an engine into an existing lock registry. Required when
    /// several engine handles reconcile different batches of the same
    /// database concurrently.
    pub fn with_locks(store: RecordStore, rules: MatchRules, locks: RunLocks) -> Self {
        Self { store, rules, locks }
    }

    /// In-memory engine with migrations applied. Used by tests and the
    /// demo runner.
    pub fn in_memory(rules: MatchRules) -> ReconResult<Self> {
        let store = RecordStore::in_memory()?;
        store.migrate()?;
        Ok(Self::new(store, rules))
    }

    pub fn rules(&self) -> &MatchRules {
        &self.rules
    }

    /// Reconcile one upload batch end to end.
    pub fn reconcile(&self, batch_ref: &str, actor: &str) -> ReconResult<ReconciliationResult> {
        let _guard = self.locks.acquire(batch_ref)?;
        let started_at = Utc::now();
        let wall = Instant::now();

        let uploaded = self.store.fetch_upload_records(batch_ref)?;
        if uploaded.is_empty() {
            return Err(ReconError::BatchNotFound {
                batch_ref: batch_ref.to_string(),
            });
        }

        // Loaded once and held for the whole batch. The store orders by
        // record id, so tie-breaking in the matcher is deterministic.
        let system_records = self.store.fetch_system_records()?;

        log::info!(
            "batch={batch_ref} reconciling {} uploaded against {} system records",
            uploaded.len(),
            system_records.len()
        );

        let mut audit = AuditTrail::new();

        // Status writes and the result write share one transaction: a
        // failed run leaves nothing behind.
        self.store.begin()?;
        let outcome =
            self.run_batch(batch_ref, actor, &uploaded, &system_records, started_at, wall, &mut audit);

        match outcome {
            Ok(result) => {
                if let Err(err) = self.store.commit() {
                    // A failed COMMIT leaves the transaction open; release
                    // it so the connection stays usable for the next run.
                    self.store.rollback();
                    log::error!("batch={batch_ref} commit failed, rolled back: {err}");
                    return Err(match err {
                        ReconError::Database(source) => ReconError::Persistence {
                            batch_ref: batch_ref.to_string(),
                            source,
                        },
                        other => other,
                    });
                }
                let summary_json =
                    serde_json::to_value(&result.summary).unwrap_or(serde_json::Value::Null);
                audit.push(AuditEvent::run_summary(batch_ref, actor, summary_json));
                audit.flush(&self.store);
                log::info!(
                    "batch={batch_ref} done: {} matched, {} partial, {} unmatched, {} duplicate groups, accuracy {:.0}%",
                    result.summary.matched,
                    result.summary.partially_matched,
                    result.summary.unmatched,
                    result.summary.duplicates,
                    result.summary.accuracy_percentage,
                );
                Ok(result)
            }
            Err(err) => {
                self.store.rollback();
                log::error!("batch={batch_ref} reconciliation failed, rolled back: {err}");
                Err(err)
            }
        }
    }

    fn run_batch(
        &self,
        batch_ref: &str,
        actor: &str,
        uploaded: &[TxnRecord],
        system_records: &[TxnRecord],
        started_at: DateTime<Utc>,
        wall: Instant,
        audit: &mut AuditTrail,
    ) -> ReconResult<ReconciliationResult> {
        let groups = duplicate::detect_duplicates(uploaded);

        let mut summary = ReconciliationSummary {
            total_records: uploaded.len() as i64,
            duplicates: groups.len() as i64,
            ..Default::default()
        };
        let mut matches: Vec<MatchEntry> = Vec::new();
        let mut unmatched_records = Vec::new();

        for record in uploaded {
            // Duplicate group members are excluded from matching; the
            // first member of each group is the canonical one.
            if let Some(group) = groups.get(&record.transaction_id) {
                summary.duplicate_records += 1;
                let duplicate_of = group
                    .records
                    .first()
                    .filter(|canonical| canonical.as_str() != record.record_id)
                    .cloned();
                self.write_status(
                    record,
                    RecordStatus::Duplicate,
                    None,
                    Some(&group.transaction_id),
                    duplicate_of.as_deref(),
                    actor,
                    audit,
                )?;
                continue;
            }

            let outcome = matcher::find_match(record, system_records, &self.rules);
            match (outcome.match_type, outcome.system_record.as_deref()) {
                (MatchType::Exact, Some(system_id)) | (MatchType::Partial, Some(system_id)) => {
                    let status = if outcome.match_type == MatchType::Exact {
                        summary.matched += 1;
                        RecordStatus::Matched
                    } else {
                        summary.partially_matched += 1;
                        RecordStatus::PartiallyMatched
                    };

                    let system = system_records.iter().find(|s| s.record_id == system_id);
                    let (variance_amount, variance_percentage) = match system {
                        Some(s) if s.amount != record.amount => (
                            Some((record.amount - s.amount).abs()),
                            score::amount_variance_percent(record.amount, s.amount),
                        ),
                        _ => (None, None),
                    };

                    let details = MatchDetails {
                        matched_with: system_id.to_string(),
                        match_type: outcome.match_type,
                        confidence_score: outcome.confidence_score,
                        variance_amount,
                        variance_percentage,
                    };

                    matches.push(MatchEntry {
                        system_record: system_id.to_string(),
                        uploaded_record: record.record_id.clone(),
                        match_type: outcome.match_type,
                        confidence_score: outcome.confidence_score,
                        matched_fields: outcome.matched_fields,
                        mismatched_fields: outcome.mismatched_fields,
                    });

                    self.write_status(record, status, Some(&details), None, None, actor, audit)?;
                }
                _ => {
                    summary.unmatched += 1;
                    unmatched_records.push(record.record_id.clone());
                    self.write_status(record, RecordStatus::Unmatched, None, None, None, actor, audit)?;
                }
            }
        }

        summary.accuracy_percentage = summary.accuracy();

        let result = ReconciliationResult {
            batch_ref: batch_ref.to_string(),
            summary,
            matches,
            unmatched_records,
            duplicate_groups: groups.into_values().collect(),
            processing_time_ms: wall.elapsed().as_millis() as i64,
            started_at,
            completed_at: Utc::now(),
            rules_applied: self.rules.clone(),
        };

        self.store.upsert_result(&result).map_err(|err| match err {
            ReconError::Database(source) => ReconError::Persistence {
                batch_ref: batch_ref.to_string(),
                source,
            },
            other => other,
        })?;

        Ok(result)
    }

    /// Version-guarded status write with a single re-read retry, plus
    /// the buffered transition audit event.
    #[allow(clippy::too_many_arguments)]
    fn write_status(
        &self,
        record: &TxnRecord,
        status: RecordStatus,
        details: Option<&MatchDetails>,
        duplicate_group: Option<&str>,
        duplicate_of: Option<&str>,
        actor: &str,
        audit: &mut AuditTrail,
    ) -> ReconResult<()> {
        let first = self.store.update_record_status(
            &record.record_id,
            record.version,
            status,
            details,
            duplicate_group,
            duplicate_of,
            actor,
        );

        if let Err(ReconError::RecordWriteConflict { .. }) = first {
            // Someone bumped the version since the batch was loaded.
            // Re-read once and retry; a second conflict fails the run.
            log::warn!(
                "record={} version conflict, retrying once",
                record.record_id
            );
            let current = self.store.get_record(&record.record_id)?;
            self.store.update_record_status(
                &record.record_id,
                current.version,
                status,
                details,
                duplicate_group,
                duplicate_of,
                actor,
            )?;
        } else {
            first?;
        }

        audit.push(AuditEvent::status_transition(
            &record.record_id,
            actor,
            record.status,
            status,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_lock_rejects_second_claim() {
        let locks = RunLocks::new();
        let guard = locks.acquire("batch-1").unwrap();
        let second = locks.acquire("batch-1");
        assert!(matches!(
            second,
            Err(ReconError::ConcurrentRun { ref batch_ref }) if batch_ref == "batch-1"
        ));
        drop(guard);
        assert!(locks.acquire("batch-1").is_ok());
    }

    #[test]
    fn run_lock_is_per_batch() {
        let locks = RunLocks::new();
        let _a = locks.acquire("batch-a").unwrap();
        assert!(locks.acquire("batch-b").is_ok());
    }

    use chrono::TimeZone;

    fn base_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    /// One system record and one upload record that match it exactly.
    fn engine_with_batch() -> ReconEngine {
        let engine = ReconEngine::in_memory(MatchRules::default()).unwrap();
        engine
            .store
            .insert_record(&TxnRecord::system("s1", "TXN-1", "REF-1", 100.0, base_date()))
            .unwrap();
        engine
            .store
            .insert_record(&TxnRecord::uploaded(
                "u1", "batch-1", "TXN-1", "REF-1", 100.0,
                base_date(),
            ))
            .unwrap();
        engine
    }

    /// When the result cannot be written, the whole run rolls back:
    /// statuses and versions are untouched, the error names the batch,
    /// and the connection is immediately usable for another run.
    #[test]
    fn failed_result_write_rolls_back_statuses() {
        let engine = engine_with_batch();
        engine
            .store
            .execute_raw("DROP TABLE reconciliation_result;")
            .unwrap();

        let err = engine.reconcile("batch-1", "tester").unwrap_err();
        assert!(matches!(err, ReconError::Persistence { .. }), "got {err}");

        let u1 = engine.store.get_record("u1").unwrap();
        assert_eq!(u1.status, RecordStatus::Pending);
        assert_eq!(u1.version, 1);
        assert!(u1.match_details.is_none());
        assert_eq!(engine.store.audit_event_count().unwrap(), 0);

        // No transaction left dangling: restore the table and the same
        // engine completes the batch.
        engine.store.migrate().unwrap();
        let result = engine.reconcile("batch-1", "tester").unwrap();
        assert_eq!(result.summary.matched, 1);
        assert!(engine.store.get_result("batch-1").unwrap().is_some());
    }

    /// A broken audit sink is logged and swallowed; the run still
    /// commits and the result is persisted.
    #[test]
    fn audit_flush_failure_does_not_fail_the_run() {
        let engine = engine_with_batch();
        engine.store.execute_raw("DROP TABLE audit_log;").unwrap();

        let result = engine.reconcile("batch-1", "tester").unwrap();
        assert_eq!(result.summary.matched, 1);
        assert!(engine.store.get_result("batch-1").unwrap().is_some());
        assert_eq!(
            engine.store.get_record("u1").unwrap().status,
            RecordStatus::Matched
        );
    }

    /// A stale snapshot version triggers one re-read and retry, which
    /// succeeds and still emits exactly one transition event.
    #[test]
    fn stale_version_write_retries_once() {
        let engine = engine_with_batch();
        // Bump the stored version past what the batch snapshot saw.
        engine
            .store
            .update_record_status(
                "u1", 1, RecordStatus::Unmatched, None, None, None, "elsewhere",
            )
            .unwrap();

        // Snapshot still at version 1.
        let stale = TxnRecord::uploaded("u1", "batch-1", "TXN-1", "REF-1", 100.0, base_date());
        let mut audit = AuditTrail::new();
        engine
            .write_status(&stale, RecordStatus::Matched, None, None, None, "tester", &mut audit)
            .unwrap();

        let u1 = engine.store.get_record("u1").unwrap();
        assert_eq!(u1.status, RecordStatus::Matched);
        assert_eq!(u1.version, 3);
        assert_eq!(audit.len(), 1);
    }

    /// When the retry conflicts as well, the write fails instead of
    /// looping, and nothing is audited. A system record conflicts on
    /// every attempt, which makes it the reliable second-conflict case.
    #[test]
    fn second_version_conflict_fails_the_write() {
        let engine = engine_with_batch();
        let sys = TxnRecord::system("s1", "TXN-1", "REF-1", 100.0, base_date());
        let mut audit = AuditTrail::new();

        let result =
            engine.write_status(&sys, RecordStatus::Matched, None, None, None, "tester", &mut audit);
        assert!(
            matches!(result, Err(ReconError::RecordWriteConflict { ref record_id, .. }) if record_id == "s1"),
            "got {result:?}"
        );
        assert!(audit.is_empty());
    }
}
