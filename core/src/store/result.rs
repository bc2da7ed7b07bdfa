use chrono::{TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::RecordStore;
use crate::{
    audit::{AuditAction, AuditEvent},
    error::ReconResult,
    result::ReconciliationResult,
};

impl RecordStore {
    // ── Reconciliation results ─────────────────────────────────

    /// Persist the result snapshot for a batch. One row per batch: a
    /// re-run replaces the previous snapshot in place.
    pub fn upsert_result(&self, result: &ReconciliationResult) -> ReconResult<()> {
        self.conn.execute(
            "INSERT INTO reconciliation_result (
                batch_ref, summary, matches, unmatched_records, duplicate_groups,
                processing_time_ms, started_at_ms, completed_at_ms, rules_applied
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(batch_ref) DO UPDATE SET
                summary = excluded.summary,
                matches = excluded.matches,
                unmatched_records = excluded.unmatched_records,
                duplicate_groups = excluded.duplicate_groups,
                processing_time_ms = excluded.processing_time_ms,
                started_at_ms = excluded.started_at_ms,
                completed_at_ms = excluded.completed_at_ms,
                rules_applied = excluded.rules_applied",
            params![
                result.batch_ref,
                serde_json::to_string(&result.summary)?,
                serde_json::to_string(&result.matches)?,
                serde_json::to_string(&result.unmatched_records)?,
                serde_json::to_string(&result.duplicate_groups)?,
                result.processing_time_ms,
                result.started_at.timestamp_millis(),
                result.completed_at.timestamp_millis(),
                serde_json::to_string(&result.rules_applied)?,
            ],
        )?;
        Ok(())
    }

    pub fn get_result(&self, batch_ref: &str) -> ReconResult<Option<ReconciliationResult>> {
        let row = self
            .conn
            .query_row(
                "SELECT batch_ref, summary, matches, unmatched_records, duplicate_groups,
                        processing_time_ms, started_at_ms, completed_at_ms, rules_applied
                 FROM reconciliation_result WHERE batch_ref = ?1",
                params![batch_ref],
                result_row_mapper,
            )
            .optional()?;
        Ok(row)
    }

    pub fn result_count(&self) -> ReconResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM reconciliation_result", [], |row| {
                row.get(0)
            })
            .map_err(Into::into)
    }

    // ── Audit log ──────────────────────────────────────────────

    /// Append a flushed batch of audit events in one statement loop.
    pub fn append_audit_events(&self, events: &[AuditEvent]) -> ReconResult<()> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO audit_log (
                event_id, action, entity, entity_id, actor,
                old_value, new_value, occurred_at_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for e in events {
            let old_json = e.old_value.as_ref().map(|v| v.to_string());
            let new_json = e.new_value.as_ref().map(|v| v.to_string());
            stmt.execute(params![
                e.event_id,
                e.action.as_str(),
                e.entity,
                e.entity_id,
                e.actor,
                old_json,
                new_json,
                e.occurred_at.timestamp_millis(),
            ])?;
        }
        Ok(())
    }

    pub fn audit_events_for_entity(&self, entity_id: &str) -> ReconResult<Vec<AuditEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, action, entity, entity_id, actor,
                    old_value, new_value, occurred_at_ms
             FROM audit_log WHERE entity_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![entity_id], audit_row_mapper)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn audit_event_count(&self) -> ReconResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(Into::into)
    }
}

fn result_row_mapper(row: &Row<'_>) -> Result<ReconciliationResult, rusqlite::Error> {
    fn json_col<T: serde::de::DeserializeOwned>(
        row: &Row<'_>,
        idx: usize,
    ) -> Result<T, rusqlite::Error> {
        let raw: String = row.get(idx)?;
        serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    }

    fn millis_col(
        row: &Row<'_>,
        idx: usize,
    ) -> Result<chrono::DateTime<Utc>, rusqlite::Error> {
        let ms: i64 = row.get(idx)?;
        Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Integer,
                format!("timestamp {ms} out of range").into(),
            )
        })
    }

    Ok(ReconciliationResult {
        batch_ref: row.get(0)?,
        summary: json_col(row, 1)?,
        matches: json_col(row, 2)?,
        unmatched_records: json_col(row, 3)?,
        duplicate_groups: json_col(row, 4)?,
        processing_time_ms: row.get(5)?,
        started_at: millis_col(row, 6)?,
        completed_at: millis_col(row, 7)?,
        rules_applied: json_col(row, 8)?,
    })
}

fn audit_row_mapper(row: &Row<'_>) -> Result<AuditEvent, rusqlite::Error> {
    let action_raw: String = row.get(1)?;
    let action = AuditAction::parse(&action_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown audit action '{action_raw}'").into(),
        )
    })?;

    fn optional_json(row: &Row<'_>, idx: usize) -> Result<Option<serde_json::Value>, rusqlite::Error> {
        let raw: Option<String> = row.get(idx)?;
        raw.map(|s| {
            serde_json::from_str(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()
    }

    let ms: i64 = row.get(7)?;
    Ok(AuditEvent {
        event_id: row.get(0)?,
        action,
        entity: row.get(2)?,
        entity_id: row.get(3)?,
        actor: row.get(4)?,
        old_value: optional_json(row, 5)?,
        new_value: optional_json(row, 6)?,
        occurred_at: Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Integer,
                format!("timestamp {ms} out of range").into(),
            )
        })?,
    })
}
