//! Runtime counterparts of allocated reservations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::repository::Entity;
use crate::core::reservation::Alias;
use crate::core::ValidationError;
use crate::util::{ExecutableId, ReservationId, ResourceId, Technology, TimeInterval, UserId};

/// Executable lifecycle.
///
/// ```text
/// NotAllocated -> Allocated -> Starting -> Started -> Stopping -> Stopped
///      |              |           |  \                    \
///      +--> ToDelete <+-----------+   +--> Failed          +--> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutableState {
    /// Created, no connector bound yet.
    NotAllocated,
    /// Bound to a connector, waiting for the start time.
    Allocated,
    /// Start commands in progress.
    Starting,
    /// Running on the device.
    Started,
    /// Stop commands in progress.
    Stopping,
    /// Torn down.
    Stopped,
    /// Commands exhausted; needs operator attention.
    Failed,
    /// Cancelled before it ever ran.
    ToDelete,
}

impl ExecutableState {
    /// No further transitions are allowed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::ToDelete)
    }

    /// Holds or is about to hold a device object that can be handed over to
    /// a replacing reservation.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(
            self,
            Self::NotAllocated | Self::Allocated | Self::Starting | Self::Started
        )
    }

    /// A device command decides the next state.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }

    /// Whether `next` is a legal successor.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotAllocated, Self::Allocated | Self::ToDelete)
                | (Self::Allocated, Self::Starting | Self::ToDelete)
                | (Self::Starting, Self::Started | Self::Failed | Self::ToDelete)
                | (Self::Started, Self::Stopping)
                | (Self::Stopping, Self::Stopped | Self::Failed)
        )
    }
}

impl std::fmt::Display for ExecutableState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotAllocated => "not_allocated",
            Self::Allocated => "allocated",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::ToDelete => "to_delete",
        };
        f.write_str(name)
    }
}

/// What is realized on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutableKind {
    /// Virtual room on a multipoint device.
    Room {
        /// Room resource.
        resource_id: ResourceId,
        /// Licensed participants.
        participant_count: u32,
        /// Technology.
        technology: Technology,
        /// Dial-in aliases.
        aliases: Vec<Alias>,
        /// Device side identifier once created.
        device_room_id: Option<String>,
    },
    /// Endpoint dialed into a room alias.
    Connection {
        /// Dialing endpoint.
        endpoint_id: ResourceId,
        /// Alias being dialed.
        alias: Alias,
        /// Device side call identifier once established.
        call_id: Option<String>,
    },
    /// Folder receiving recordings.
    RecordingFolder {
        /// Recording resource.
        resource_id: ResourceId,
        /// Folder name.
        name: String,
        /// Device side identifier once created.
        folder_id: Option<String>,
    },
}

impl ExecutableKind {
    /// Resource whose connector executes the commands.
    #[must_use]
    pub fn resource_id(&self) -> &str {
        match self {
            Self::Room { resource_id, .. } | Self::RecordingFolder { resource_id, .. } => {
                resource_id
            }
            Self::Connection { endpoint_id, .. } => endpoint_id,
        }
    }

    /// Whether a running executable of `self` can take over `other`'s reservation.
    #[must_use]
    pub fn compatible_with(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Room {
                    resource_id: a,
                    technology: ta,
                    ..
                },
                Self::Room {
                    resource_id: b,
                    technology: tb,
                    ..
                },
            ) => a == b && ta == tb,
            (
                Self::Connection {
                    endpoint_id: a,
                    alias: x,
                    ..
                },
                Self::Connection {
                    endpoint_id: b,
                    alias: y,
                    ..
                },
            ) => a == b && x == y,
            (Self::RecordingFolder { resource_id: a, .. }, Self::RecordingFolder { resource_id: b, .. }) => {
                a == b
            }
            _ => false,
        }
    }

    /// Short label used in logs and reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Room { .. } => "room",
            Self::Connection { .. } => "connection",
            Self::RecordingFolder { .. } => "recording_folder",
        }
    }
}

/// A live (or about to be live) device object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executable {
    /// Identifier (0 until persisted).
    pub id: ExecutableId,
    /// Reservation it realizes.
    pub reservation_id: ReservationId,
    /// Time slot.
    pub slot: TimeInterval,
    /// Owner of the originating request, notified about lifecycle events.
    pub owner: Option<UserId>,
    /// Device object.
    pub kind: ExecutableKind,
    /// Lifecycle state.
    pub state: ExecutableState,
    /// Connector bound on allocation.
    pub connector: Option<String>,
    /// Index into the command plan of the current transient state.
    pub step: usize,
    /// Retries consumed in the current transient state.
    pub retry_count: u32,
    /// Earliest time of the next command attempt.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Deletion is waiting for the device to become idle.
    pub deferred_delete: bool,
    /// Explicit stop requested before the slot ended.
    pub stop_requested: bool,
    /// Last failure detail.
    pub last_error: Option<String>,
}

impl Executable {
    /// New executable in `NotAllocated`.
    #[must_use]
    pub const fn new(reservation_id: ReservationId, slot: TimeInterval, kind: ExecutableKind) -> Self {
        Self {
            id: 0,
            reservation_id,
            slot,
            owner: None,
            kind,
            state: ExecutableState::NotAllocated,
            connector: None,
            step: 0,
            retry_count: 0,
            next_attempt_at: None,
            deferred_delete: false,
            stop_requested: false,
            last_error: None,
        }
    }

    /// Move to `next`, resetting per-phase progress.
    ///
    /// # Errors
    ///
    /// `ValidationError::IllegalTransition` if `next` is not a legal successor.
    pub fn transition(&mut self, next: ExecutableState) -> Result<(), ValidationError> {
        if !self.state.can_transition_to(next) {
            return Err(ValidationError::IllegalTransition {
                id: self.id,
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.step = 0;
        self.retry_count = 0;
        self.next_attempt_at = None;
        Ok(())
    }
}

impl Entity for Executable {
    const KIND: &'static str = "executable";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}
