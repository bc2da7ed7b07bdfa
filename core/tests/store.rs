//! Store tier: persistence, version guards, corrections.

use chrono::{TimeZone, Utc};
use serde_json::json;
use txnrecon_core::record::{MatchDetails, MatchType, RecordSource, RecordStatus};
use txnrecon_core::{ReconError, RecordStore, TxnRecord};

fn base_date() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn store() -> RecordStore {
    let store = RecordStore::in_memory().unwrap();
    store.migrate().unwrap();
    store
}

fn details_for(system_id: &str) -> MatchDetails {
    MatchDetails {
        matched_with: system_id.to_string(),
        match_type: MatchType::Exact,
        confidence_score: 100.0,
        variance_amount: None,
        variance_percentage: None,
    }
}

/// Full insert/fetch round trip, attributes included.
#[test]
fn record_round_trip() {
    let store = store();
    let mut record = TxnRecord::uploaded("u1", "batch-1", "TXN-1", "REF-1", 99.5, base_date());
    record.attributes = json!({ "channel": "wire", "branch": 7 });
    store.insert_record(&record).unwrap();

    let loaded = store.get_record("u1").unwrap();
    assert_eq!(loaded.source, RecordSource::Upload);
    assert_eq!(loaded.batch_ref.as_deref(), Some("batch-1"));
    assert_eq!(loaded.amount, 99.5);
    assert_eq!(loaded.date, base_date());
    assert_eq!(loaded.attributes["channel"], "wire");
    assert_eq!(loaded.status, RecordStatus::Pending);
    assert_eq!(loaded.version, 1);
}

/// Upload fetches are scoped to the batch and ordered by record id.
#[test]
fn upload_fetch_is_batch_scoped_and_ordered() {
    let store = store();
    for (id, batch) in [("u-b", "batch-1"), ("u-a", "batch-1"), ("u-c", "batch-2")] {
        store
            .insert_record(&TxnRecord::uploaded(id, batch, "TXN-1", "REF-1", 1.0, base_date()))
            .unwrap();
    }
    store
        .insert_record(&TxnRecord::system("s1", "TXN-1", "REF-1", 1.0, base_date()))
        .unwrap();

    let records = store.fetch_upload_records("batch-1").unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.record_id.as_str()).collect();
    assert_eq!(ids, vec!["u-a", "u-b"]);

    let system = store.fetch_system_records().unwrap();
    assert_eq!(system.len(), 1);
    assert_eq!(system[0].record_id, "s1");
}

/// A status write against a stale version is a conflict; against the
/// current version it bumps the version by one.
#[test]
fn status_write_is_version_guarded() {
    let store = store();
    store
        .insert_record(&TxnRecord::uploaded("u1", "batch-1", "TXN-1", "REF-1", 1.0, base_date()))
        .unwrap();

    let stale = store.update_record_status(
        "u1", 99, RecordStatus::Matched, Some(&details_for("s1")), None, None, "tester",
    );
    assert!(
        matches!(stale, Err(ReconError::RecordWriteConflict { ref record_id, expected: 99 }) if record_id == "u1"),
        "got {stale:?}"
    );
    assert_eq!(store.record_version("u1").unwrap(), Some(1));

    store
        .update_record_status(
            "u1", 1, RecordStatus::Matched, Some(&details_for("s1")), None, None, "tester",
        )
        .unwrap();
    let loaded = store.get_record("u1").unwrap();
    assert_eq!(loaded.status, RecordStatus::Matched);
    assert_eq!(loaded.version, 2);
    assert_eq!(loaded.last_modified_by.as_deref(), Some("tester"));
    assert_eq!(store.record_version("u1").unwrap(), Some(2));
    assert_eq!(store.record_version("no-such-record").unwrap(), None);
}

/// The system partition rejects status writes outright.
#[test]
fn system_partition_is_read_only() {
    let store = store();
    store
        .insert_record(&TxnRecord::system("s1", "TXN-1", "REF-1", 1.0, base_date()))
        .unwrap();

    let result = store.update_record_status(
        "s1", 1, RecordStatus::Matched, Some(&details_for("s2")), None, None, "tester",
    );
    assert!(matches!(result, Err(ReconError::RecordWriteConflict { .. })));
    assert_eq!(store.get_record("s1").unwrap().version, 1);
}

/// A duplicate status drops any match details the caller passed.
#[test]
fn duplicate_status_never_carries_details() {
    let store = store();
    store
        .insert_record(&TxnRecord::uploaded("u1", "batch-1", "TXN-1", "REF-1", 1.0, base_date()))
        .unwrap();

    store
        .update_record_status(
            "u1", 1, RecordStatus::Duplicate, Some(&details_for("s1")),
            Some("TXN-1"), Some("u0"), "tester",
        )
        .unwrap();

    let loaded = store.get_record("u1").unwrap();
    assert_eq!(loaded.status, RecordStatus::Duplicate);
    assert!(loaded.is_duplicate);
    assert!(loaded.match_details.is_none());
    assert_eq!(loaded.duplicate_group.as_deref(), Some("TXN-1"));
    assert_eq!(loaded.duplicate_of.as_deref(), Some("u0"));
}

/// Correcting an amount resets the record for re-reconciliation and
/// leaves a correction audit event behind.
#[test]
fn correction_resets_record_and_audits() {
    let store = store();
    store
        .insert_record(&TxnRecord::uploaded("u1", "batch-1", "TXN-1", "REF-1", 103.0, base_date()))
        .unwrap();
    store
        .update_record_status(
            "u1", 1, RecordStatus::Unmatched, None, None, None, "engine",
        )
        .unwrap();

    let corrected = store
        .correct_record("u1", "amount", &json!(100.0), "operator-7")
        .unwrap();
    assert_eq!(corrected.amount, 100.0);
    assert_eq!(corrected.status, RecordStatus::Pending);
    assert!(corrected.match_details.is_none());
    assert_eq!(corrected.version, 3);
    assert_eq!(corrected.last_modified_by.as_deref(), Some("operator-7"));

    let events = store.audit_events_for_entity("u1").unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action.as_str(), "correct");
    assert_eq!(events[0].old_value.as_ref().unwrap()["amount"], 103.0);
    assert_eq!(events[0].new_value.as_ref().unwrap()["amount"], 100.0);
}

/// Dates are corrected from RFC 3339 input.
#[test]
fn correction_accepts_rfc3339_dates() {
    let store = store();
    store
        .insert_record(&TxnRecord::uploaded("u1", "batch-1", "TXN-1", "REF-1", 1.0, base_date()))
        .unwrap();

    let corrected = store
        .correct_record("u1", "date", &json!("2025-06-02T08:30:00Z"), "operator-7")
        .unwrap();
    assert_eq!(
        corrected.date,
        Utc.with_ymd_and_hms(2025, 6, 2, 8, 30, 0).unwrap()
    );
}

/// Unknown fields, wrong value types, negative amounts, and system
/// records are all rejected.
#[test]
fn correction_rejects_bad_input() {
    let store = store();
    store
        .insert_record(&TxnRecord::uploaded("u1", "batch-1", "TXN-1", "REF-1", 1.0, base_date()))
        .unwrap();
    store
        .insert_record(&TxnRecord::system("s1", "TXN-1", "REF-1", 1.0, base_date()))
        .unwrap();

    assert!(store.correct_record("u1", "status", &json!("matched"), "op").is_err());
    assert!(store.correct_record("u1", "amount", &json!("not a number"), "op").is_err());
    assert!(store.correct_record("u1", "amount", &json!(-5.0), "op").is_err());
    assert!(store.correct_record("u1", "date", &json!("yesterday"), "op").is_err());
    assert!(store.correct_record("s1", "amount", &json!(2.0), "op").is_err());

    // Nothing changed, nothing audited.
    assert_eq!(store.get_record("u1").unwrap().version, 1);
    assert_eq!(store.audit_event_count().unwrap(), 0);
}

/// get_result returns None for a batch that never ran.
#[test]
fn missing_result_is_none() {
    let store = store();
    assert!(store.get_result("batch-1").unwrap().is_none());
    assert_eq!(store.result_count().unwrap(), 0);
}

/// A reopened file-backed store sees the committed data; a reopened
/// in-memory store is a fresh, isolated database.
#[test]
fn file_backed_store_survives_reopen() {
    let dir = std::env::temp_dir().join(format!("txnrecon-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("reopen.db");
    let path = path.to_str().unwrap();

    let store = RecordStore::open(path).unwrap();
    store.migrate().unwrap();
    store
        .insert_record(&TxnRecord::system("s1", "TXN-1", "REF-1", 1.0, base_date()))
        .unwrap();

    let reopened = store.reopen().unwrap();
    assert_eq!(reopened.record_count(RecordSource::System).unwrap(), 1);

    let memory = RecordStore::in_memory().unwrap();
    memory.migrate().unwrap();
    memory
        .insert_record(&TxnRecord::system("s1", "TXN-1", "REF-1", 1.0, base_date()))
        .unwrap();
    let isolated = memory.reopen().unwrap();
    isolated.migrate().unwrap();
    assert_eq!(isolated.record_count(RecordSource::System).unwrap(), 0);

    drop(store);
    drop(reopened);
    let _ = std::fs::remove_dir_all(&dir);
}
