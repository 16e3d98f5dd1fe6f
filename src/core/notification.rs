//! Lifecycle notification fan-out.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::authorization::EntityRef;
use crate::util::UserId;

/// Lifecycle transition being announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Request received a reservation tree.
    RequestAllocated,
    /// Request could not be allocated.
    AllocationFailed,
    /// Request and its tree were deleted.
    RequestDeleted,
    /// Foreign remote ids could not all be cancelled.
    ForeignReleaseWarning,
    /// Executable is running on its device.
    ExecutableStarted,
    /// Executable was torn down.
    ExecutableStopped,
    /// Executable needs operator attention.
    ExecutableFailed,
}

/// Event handed to notification executors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// What happened.
    pub kind: EventKind,
    /// Entity concerned.
    pub entity: EntityRef,
    /// Users to notify.
    pub recipients: Vec<UserId>,
    /// Free-text detail.
    pub detail: Option<String>,
}

impl LifecycleEvent {
    /// Event for a single recipient.
    pub fn new(kind: EventKind, entity: EntityRef, recipient: impl Into<UserId>) -> Self {
        Self {
            kind,
            entity,
            recipients: vec![recipient.into()],
            detail: None,
        }
    }

    /// Attach a detail string.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Delivery backend (email, chat, ...). Fire-and-forget.
pub trait NotificationExecutor: Send + Sync {
    /// Deliver one event.
    fn dispatch(&self, event: &LifecycleEvent);
}

/// Fans events out to the registered executors.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    executors: Vec<Arc<dyn NotificationExecutor>>,
}

impl NotificationDispatcher {
    /// Dispatcher without executors (every notify is a no-op).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn NotificationExecutor>) -> Self {
        self.executors.push(executor);
        self
    }

    /// Number of registered executors.
    #[must_use]
    pub fn executor_count(&self) -> usize {
        self.executors.len()
    }

    /// Fan `event` out to all executors.
    pub fn notify(&self, event: &LifecycleEvent) {
        if self.executors.is_empty() {
            return;
        }
        if event.recipients.is_empty() {
            debug!(kind = ?event.kind, entity = %event.entity, "notification skipped, no recipients");
            return;
        }
        for executor in &self.executors {
            executor.dispatch(event);
        }
    }
}
