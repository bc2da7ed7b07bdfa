use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::RecordStore;
use crate::{
    audit::AuditEvent,
    error::{ReconError, ReconResult},
    record::{MatchDetails, RecordSource, RecordStatus, TxnRecord},
};

const RECORD_COLUMNS: &str = "record_id, source, batch_ref, transaction_id, reference_number,
             amount, date_ms, attributes, status, match_details,
             is_duplicate, duplicate_group, duplicate_of, version, last_modified_by";

impl RecordStore {
    // ── Records ────────────────────────────────────────────────

    pub fn insert_record(&self, r: &TxnRecord) -> ReconResult<()> {
        let details_json = r
            .match_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            "INSERT INTO record (
                record_id, source, batch_ref, transaction_id, reference_number,
                amount, date_ms, attributes, status, match_details,
                is_duplicate, duplicate_group, duplicate_of, version, last_modified_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                r.record_id,
                r.source.as_str(),
                r.batch_ref.as_deref(),
                r.transaction_id,
                r.reference_number,
                r.amount,
                r.date.timestamp_millis(),
                r.attributes.to_string(),
                r.status.as_str(),
                details_json,
                if r.is_duplicate { 1i32 } else { 0i32 },
                r.duplicate_group.as_deref(),
                r.duplicate_of.as_deref(),
                r.version,
                r.last_modified_by.as_deref(),
            ],
        )?;
        Ok(())
    }

    pub fn get_record(&self, record_id: &str) -> ReconResult<TxnRecord> {
        self.conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM record WHERE record_id = ?1"),
                params![record_id],
                record_row_mapper,
            )
            .map_err(Into::into)
    }

    /// All upload records for one batch, ordered by record id so the
    /// classification loop visits them in a stable order.
    pub fn fetch_upload_records(&self, batch_ref: &str) -> ReconResult<Vec<TxnRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM record
             WHERE source = 'upload' AND batch_ref = ?1
             ORDER BY record_id ASC"
        ))?;
        let rows = stmt.query_map(params![batch_ref], record_row_mapper)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// The whole system partition, ordered by record id. The matcher
    /// relies on this ordering for deterministic first-hit tie-breaks.
    pub fn fetch_system_records(&self) -> ReconResult<Vec<TxnRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM record
             WHERE source = 'system'
             ORDER BY record_id ASC"
        ))?;
        let rows = stmt.query_map([], record_row_mapper)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Version-guarded status write, upload partition only.
    ///
    /// A row count of zero means the guard failed: either the version
    /// moved underneath us or someone pointed us at a system record.
    /// Both surface as RecordWriteConflict. A duplicate status never
    /// carries match details, whatever the caller passed.
    #[allow(clippy::too_many_arguments)]
    pub fn update_record_status(
        &self,
        record_id: &str,
        expected_version: i64,
        status: RecordStatus,
        details: Option<&MatchDetails>,
        duplicate_group: Option<&str>,
        duplicate_of: Option<&str>,
        actor: &str,
    ) -> ReconResult<()> {
        let details = if status == RecordStatus::Duplicate {
            None
        } else {
            details
        };
        let details_json = details.map(serde_json::to_string).transpose()?;
        let is_duplicate = status == RecordStatus::Duplicate;

        let updated = self.conn.execute(
            "UPDATE record SET
                status = ?1,
                match_details = ?2,
                is_duplicate = ?3,
                duplicate_group = ?4,
                duplicate_of = ?5,
                version = version + 1,
                last_modified_by = ?6
             WHERE record_id = ?7 AND version = ?8 AND source = 'upload'",
            params![
                status.as_str(),
                details_json,
                if is_duplicate { 1i32 } else { 0i32 },
                duplicate_group,
                duplicate_of,
                actor,
                record_id,
                expected_version,
            ],
        )?;

        if updated == 0 {
            return Err(ReconError::RecordWriteConflict {
                record_id: record_id.to_string(),
                expected: expected_version,
            });
        }
        Ok(())
    }

    /// Operator correction of a single field on an upload record.
    ///
    /// Resets the record to pending and clears any previous match so
    /// the next run re-evaluates it from scratch. The correction is
    /// audited with the full before/after snapshots; audit failure is
    /// logged, never escalated.
    pub fn correct_record(
        &self,
        record_id: &str,
        field: &str,
        value: &serde_json::Value,
        actor: &str,
    ) -> ReconResult<TxnRecord> {
        let before = self.get_record(record_id)?;
        if before.source != RecordSource::Upload {
            return Err(anyhow::anyhow!("cannot correct system record '{record_id}'").into());
        }

        let (column, param): (&str, rusqlite::types::Value) = match (field, value) {
            ("transaction_id", serde_json::Value::String(s)) => {
                ("transaction_id", s.clone().into())
            }
            ("reference_number", serde_json::Value::String(s)) => {
                ("reference_number", s.clone().into())
            }
            ("amount", serde_json::Value::Number(n)) => {
                let amount = n
                    .as_f64()
                    .ok_or_else(|| anyhow::anyhow!("amount '{n}' is not a finite number"))?;
                if amount < 0.0 {
                    return Err(anyhow::anyhow!("amount must be non-negative, got {amount}").into());
                }
                ("amount", amount.into())
            }
            ("date", serde_json::Value::String(s)) => {
                let date = DateTime::parse_from_rfc3339(s)
                    .map_err(|e| anyhow::anyhow!("invalid date '{s}': {e}"))?;
                ("date_ms", date.timestamp_millis().into())
            }
            (other, _) => {
                return Err(anyhow::anyhow!(
                    "field '{other}' is not correctable or value has the wrong type"
                )
                .into())
            }
        };

        let sql = format!(
            "UPDATE record SET {column} = ?1,
                status = 'pending', match_details = NULL,
                is_duplicate = 0, duplicate_group = NULL, duplicate_of = NULL,
                version = version + 1, last_modified_by = ?2
             WHERE record_id = ?3 AND version = ?4 AND source = 'upload'"
        );
        let updated = self
            .conn
            .execute(&sql, params![param, actor, record_id, before.version])?;
        if updated == 0 {
            return Err(ReconError::RecordWriteConflict {
                record_id: record_id.to_string(),
                expected: before.version,
            });
        }

        let after = self.get_record(record_id)?;
        let event = AuditEvent::correction(
            record_id,
            actor,
            serde_json::to_value(&before)?,
            serde_json::to_value(&after)?,
        );
        if let Err(err) = self.append_audit_events(std::slice::from_ref(&event)) {
            log::warn!("correction audit for record={record_id} dropped: {err}");
        }
        Ok(after)
    }

    /// Status breakdown for one batch, e.g. for progress displays.
    pub fn status_counts(&self, batch_ref: &str) -> ReconResult<Vec<(RecordStatus, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM record
             WHERE source = 'upload' AND batch_ref = ?1
             GROUP BY status ORDER BY status ASC",
        )?;
        let rows = stmt.query_map(params![batch_ref], |row| {
            let raw: String = row.get(0)?;
            let status = RecordStatus::parse(&raw).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown record status '{raw}'").into(),
                )
            })?;
            Ok((status, row.get(1)?))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Test helpers ───────────────────────────────────────────

    pub fn record_count(&self, source: RecordSource) -> ReconResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM record WHERE source = ?1",
                params![source.as_str()],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    pub fn record_version(&self, record_id: &str) -> ReconResult<Option<i64>> {
        self.conn
            .query_row(
                "SELECT version FROM record WHERE record_id = ?1",
                params![record_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }
}

fn record_row_mapper(row: &Row<'_>) -> Result<TxnRecord, rusqlite::Error> {
    let source_raw: String = row.get(1)?;
    let source = RecordSource::parse(&source_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown record source '{source_raw}'").into(),
        )
    })?;

    let attributes_raw: String = row.get(7)?;
    let attributes = serde_json::from_str(&attributes_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status_raw: String = row.get(8)?;
    let status = RecordStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown record status '{status_raw}'").into(),
        )
    })?;

    let details_raw: Option<String> = row.get(9)?;
    let match_details = details_raw
        .map(|raw| {
            serde_json::from_str::<MatchDetails>(&raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    9,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    let date_ms: i64 = row.get(6)?;

    Ok(TxnRecord {
        record_id: row.get(0)?,
        source,
        batch_ref: row.get(2)?,
        transaction_id: row.get(3)?,
        reference_number: row.get(4)?,
        amount: row.get(5)?,
        date: Utc.timestamp_millis_opt(date_ms).single().ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Integer,
                format!("date_ms {date_ms} out of range").into(),
            )
        })?,
        attributes,
        status,
        match_details,
        is_duplicate: row.get::<_, i32>(10)? != 0,
        duplicate_group: row.get(11)?,
        duplicate_of: row.get(12)?,
        version: row.get(13)?,
        last_modified_by: row.get(14)?,
    })
}
