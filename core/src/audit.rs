//! Audit events emitted by the engine.
//!
//! One event per record-status transition plus one summary event per
//! completed run. Events are buffered for the duration of a run and
//! flushed in a single batch after the result commits; emitting audit
//! rows per record inside the classification loop is a throughput
//! problem at scale. Audit is best-effort: a failed flush is logged and
//! swallowed, never escalated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{record::RecordStatus, store::RecordStore, types::ActorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Update,
    Reconcile,
    Correct,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Reconcile => "reconcile",
            Self::Correct => "correct",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "update" => Some(Self::Update),
            "reconcile" => Some(Self::Reconcile),
            "correct" => Some(Self::Correct),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub action: AuditAction,
    /// Entity kind: "record" or "reconciliation".
    pub entity: String,
    pub entity_id: String,
    pub actor: ActorId,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn status_transition(
        record_id: &str,
        actor: &str,
        from: RecordStatus,
        to: RecordStatus,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            action: AuditAction::Update,
            entity: "record".into(),
            entity_id: record_id.to_string(),
            actor: actor.to_string(),
            old_value: Some(serde_json::json!({ "status": from.as_str() })),
            new_value: Some(serde_json::json!({ "status": to.as_str() })),
            occurred_at: Utc::now(),
        }
    }

    /// The one summarizing event emitted per completed run.
    pub fn run_summary(batch_ref: &str, actor: &str, summary: serde_json::Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            action: AuditAction::Reconcile,
            entity: "reconciliation".into(),
            entity_id: batch_ref.to_string(),
            actor: actor.to_string(),
            old_value: None,
            new_value: Some(summary),
            occurred_at: Utc::now(),
        }
    }

    /// Operator correction of a single record field, outside any run.
    pub fn correction(
        record_id: &str,
        actor: &str,
        old_value: serde_json::Value,
        new_value: serde_json::Value,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            action: AuditAction::Correct,
            entity: "record".into(),
            entity_id: record_id.to_string(),
            actor: actor.to_string(),
            old_value: Some(old_value),
            new_value: Some(new_value),
            occurred_at: Utc::now(),
        }
    }
}

/// Collects a run's events and writes them in one batch at the end.
#[derive(Debug, Default)]
pub struct AuditTrail {
    events: Vec<AuditEvent>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: AuditEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Flush everything buffered. Failure is logged and swallowed; a
    /// completed run must never be failed by its audit trail.
    pub fn flush(self, store: &RecordStore) {
        if self.is_empty() {
            return;
        }
        let count = self.len();
        if let Err(err) = store.append_audit_events(&self.events) {
            log::warn!("audit flush failed, {count} events dropped: {err}");
        }
    }
}
