//! Diagnostic report sinks.
//!
//! Every allocation failure, executable transition and foreign release
//! warning is recorded as an [`AuditEvent`]; the storage schema is left to
//! integrators.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::authorization::EntityRef;

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Normal lifecycle transition.
    Info,
    /// Recoverable or partial failure.
    Warning,
    /// Failure needing operator attention.
    Error,
}

/// Audit event structure.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related entity.
    pub entity: EntityRef,
    /// Action taken (allocate, allocation_failed, start, stop, fail, release_warning, ...).
    pub action: String,
    /// Severity.
    pub level: AuditLevel,
    /// Timestamp.
    pub created_at: DateTime<Utc>,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Events concerning one entity.
    #[must_use]
    pub fn events_for(&self, entity: &EntityRef) -> Vec<AuditEvent> {
        self.events
            .iter()
            .filter(|e| &e.entity == entity)
            .cloned()
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Helper to build an audit event with a fresh id and the current time.
pub fn build_audit_event(
    entity: EntityRef,
    action: impl Into<String>,
    level: AuditLevel,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4().to_string(),
        entity,
        action: action.into(),
        level,
        created_at: Utc::now(),
        detail,
    }
}

/// Shared sinks let callers keep a handle for inspection.
impl<S: AuditSink> AuditSink for std::sync::Arc<parking_lot::Mutex<S>> {
    fn record(&mut self, event: AuditEvent) {
        self.lock().record(event);
    }
}
