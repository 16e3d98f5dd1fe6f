//! Combined audit + notification handle shared by scheduler and executor.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::core::audit::{build_audit_event, AuditLevel, AuditSink};
use crate::core::authorization::EntityRef;
use crate::core::notification::{LifecycleEvent, NotificationDispatcher};

/// Records diagnostic reports and announces lifecycle events.
#[derive(Clone, Default)]
pub struct Reporter {
    audit: Option<Arc<Mutex<Box<dyn AuditSink>>>>,
    notifications: NotificationDispatcher,
}

impl Reporter {
    /// Reporter that records nothing and notifies nobody.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Arc::new(Mutex::new(audit)));
        self
    }

    /// Attach a notification dispatcher.
    #[must_use]
    pub fn with_notifications(mut self, notifications: NotificationDispatcher) -> Self {
        self.notifications = notifications;
        self
    }

    /// Record a report.
    pub fn audit(
        &self,
        entity: EntityRef,
        action: &str,
        level: AuditLevel,
        detail: Option<String>,
    ) {
        if level != AuditLevel::Info {
            warn!(%entity, action, detail = detail.as_deref().unwrap_or(""), "report recorded");
        }
        if let Some(audit) = &self.audit {
            audit
                .lock()
                .record(build_audit_event(entity, action, level, detail));
        }
    }

    /// Dispatch a lifecycle event.
    pub fn notify(&self, event: &LifecycleEvent) {
        self.notifications.notify(event);
    }
}
