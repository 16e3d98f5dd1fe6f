//! Requests, specifications and the reservation tree.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::repository::Entity;
use crate::core::ValidationError;
use crate::util::{
    AliasType, RequestId, ReservationId, ResourceId, Technology, TimeInterval, UserId,
};

/// What a request wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Specification {
    /// A specific existing resource.
    Resource {
        /// Requested resource.
        resource_id: ResourceId,
    },
    /// A value from a provider.
    Value {
        /// Provider; any provider when absent.
        provider_id: Option<ResourceId>,
        /// Concrete value wanted.
        requested: Option<String>,
    },
    /// A dial-in alias.
    Alias {
        /// Technology.
        technology: Technology,
        /// Alias kind filter.
        alias_type: Option<AliasType>,
        /// Concrete underlying value wanted.
        requested_value: Option<String>,
    },
    /// A virtual room.
    Room {
        /// Technology.
        technology: Technology,
        /// Participant licenses.
        participant_count: u32,
        /// Aliases to allocate for the room.
        aliases: Vec<Technology>,
        /// Whether a recording folder is needed.
        recorded: bool,
    },
    /// Endpoints joined through a room.
    Compartment {
        /// Technology.
        technology: Technology,
        /// Participating endpoint resources.
        endpoints: Vec<ResourceId>,
    },
    /// Reuse of an existing allocated reservation.
    Existing {
        /// Reused reservation.
        reservation_id: ReservationId,
    },
}

impl Specification {
    /// Structural validation before persistence.
    ///
    /// # Errors
    ///
    /// `ValidationError::InvalidSpecification` for empty or contradictory content.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| Err(ValidationError::InvalidSpecification(reason.into()));
        match self {
            Self::Resource { resource_id } if resource_id.trim().is_empty() => {
                invalid("resource id must not be empty")
            }
            Self::Room {
                participant_count: 0,
                ..
            } => invalid("room needs at least one participant"),
            Self::Compartment { endpoints, .. } if endpoints.len() < 2 => {
                invalid("compartment needs at least two endpoints")
            }
            Self::Compartment { endpoints, .. } => {
                let unique: BTreeSet<_> = endpoints.iter().collect();
                if unique.len() == endpoints.len() {
                    Ok(())
                } else {
                    invalid("compartment endpoints must be distinct")
                }
            }
            _ => Ok(()),
        }
    }

    /// Short label used in logs and reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Resource { .. } => "resource",
            Self::Value { .. } => "value",
            Self::Alias { .. } => "alias",
            Self::Room { .. } => "room",
            Self::Compartment { .. } => "compartment",
            Self::Existing { .. } => "existing",
        }
    }
}

/// Lifecycle of a reservation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Waiting for the scheduler.
    New,
    /// Backed by a reservation tree.
    Allocated,
    /// Last allocation attempt failed.
    AllocationFailed,
    /// Deleted together with its tree.
    Deleted,
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Allocated => write!(f, "allocated"),
            Self::AllocationFailed => write!(f, "allocation_failed"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// A booking request owned by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    /// Identifier (0 until persisted).
    pub id: RequestId,
    /// Requesting user.
    pub owner: UserId,
    /// Requested interval.
    pub interval: TimeInterval,
    /// What is wanted.
    pub specification: Specification,
    /// Whether foreign domains may satisfy it.
    pub allow_foreign: bool,
    /// Lifecycle state.
    pub state: RequestState,
    /// Root of the current reservation tree.
    pub reservation_id: Option<ReservationId>,
    /// Detail of the last failure.
    pub report: Option<String>,
    /// Modification waiting to replace the booked interval and specification.
    #[serde(default)]
    pub pending: Option<PendingModification>,
    /// Detached foreign reservations of rolled back trees whose remote
    /// bookings still wait for cancellation.
    #[serde(default)]
    pub orphans: Vec<ReservationId>,
}

/// New interval and specification of an allocated request, applied only
/// once the replacing tree is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingModification {
    /// Requested interval.
    pub interval: TimeInterval,
    /// Requested specification.
    pub specification: Specification,
}

impl ReservationRequest {
    /// New unpersisted request.
    pub fn new(
        owner: impl Into<UserId>,
        interval: TimeInterval,
        specification: Specification,
    ) -> Self {
        Self {
            id: 0,
            owner: owner.into(),
            interval,
            specification,
            allow_foreign: false,
            state: RequestState::New,
            reservation_id: None,
            report: None,
            pending: None,
            orphans: Vec::new(),
        }
    }

    /// Permit delegation to foreign domains.
    #[must_use]
    pub const fn allowing_foreign(mut self) -> Self {
        self.allow_foreign = true;
        self
    }

    /// Interval the next allocation books.
    #[must_use]
    pub fn target_interval(&self) -> TimeInterval {
        self.pending.as_ref().map_or(self.interval, |p| p.interval)
    }

    /// Specification the next allocation books.
    #[must_use]
    pub fn target_specification(&self) -> &Specification {
        self.pending
            .as_ref()
            .map_or(&self.specification, |p| &p.specification)
    }
}

impl Entity for ReservationRequest {
    const KIND: &'static str = "reservation request";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// A concrete alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alias {
    /// Technology.
    pub technology: Technology,
    /// Kind.
    pub alias_type: AliasType,
    /// Dialable value.
    pub value: String,
}

/// Allocated target of a reservation; one variant per reservation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReservationKind {
    /// Units of a resource.
    Resource {
        /// Resource.
        resource_id: ResourceId,
        /// Consumed units.
        units: u32,
    },
    /// Value from a provider.
    Value {
        /// Provider resource.
        provider_id: ResourceId,
        /// Allocated value.
        value: String,
    },
    /// Aliases rendered from a child value.
    Alias {
        /// Resource owning the alias capability.
        resource_id: ResourceId,
        /// Rendered aliases.
        aliases: Vec<Alias>,
    },
    /// Virtual room licenses.
    Room {
        /// Room resource.
        resource_id: ResourceId,
        /// Licensed participants.
        participant_count: u32,
        /// Technology.
        technology: Technology,
    },
    /// Recording service slot.
    Recording {
        /// Recording resource.
        resource_id: ResourceId,
    },
    /// Endpoints connected through a room.
    Compartment {
        /// Technology.
        technology: Technology,
    },
    /// Reuse of another reservation.
    Existing {
        /// Reused reservation.
        reused_id: ReservationId,
    },
    /// Booking realized by a foreign domain.
    Foreign {
        /// Domain name.
        domain: String,
        /// Remote request ids still held.
        remote_request_ids: BTreeSet<String>,
        /// What was delegated.
        description: String,
    },
}

impl ReservationKind {
    /// Resource and units counted against capacity, if any.
    #[must_use]
    pub fn capacity_usage(&self) -> Option<(&str, u32)> {
        match self {
            Self::Resource { resource_id, units } => Some((resource_id, *units)),
            Self::Room {
                resource_id,
                participant_count,
                ..
            } => Some((resource_id, *participant_count)),
            Self::Recording { resource_id } => Some((resource_id, 1)),
            _ => None,
        }
    }

    /// Provider and value, for value reservations.
    #[must_use]
    pub fn provided_value(&self) -> Option<(&str, &str)> {
        match self {
            Self::Value { provider_id, value } => Some((provider_id, value)),
            _ => None,
        }
    }

    /// Short label used in logs and reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Resource { .. } => "resource",
            Self::Value { .. } => "value",
            Self::Alias { .. } => "alias",
            Self::Room { .. } => "room",
            Self::Recording { .. } => "recording",
            Self::Compartment { .. } => "compartment",
            Self::Existing { .. } => "existing",
            Self::Foreign { .. } => "foreign",
        }
    }
}

/// A persisted node of a reservation tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Identifier (0 until persisted).
    pub id: ReservationId,
    /// Owning request.
    pub request_id: RequestId,
    /// Parent node, `None` for the root.
    pub parent_id: Option<ReservationId>,
    /// Allocated interval, inside the request interval.
    pub interval: TimeInterval,
    /// Allocated target.
    pub kind: ReservationKind,
    /// Child nodes.
    pub children: Vec<ReservationId>,
    /// Reservation of the previous tree this one replaces.
    pub migrate_from: Option<ReservationId>,
}

impl Entity for Reservation {
    const KIND: &'static str = "reservation";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Serializable view of a reservation subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSummary {
    /// Identifier.
    pub id: ReservationId,
    /// Interval.
    pub interval: TimeInterval,
    /// Kind payload.
    pub kind: ReservationKind,
    /// Children.
    pub children: Vec<ReservationSummary>,
}

/// Unpersisted reservation node produced while allocating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDraft {
    /// Allocated target.
    pub kind: ReservationKind,
    /// Allocated interval.
    pub interval: TimeInterval,
    /// Child drafts.
    pub children: Vec<ReservationDraft>,
}

impl ReservationDraft {
    /// Leaf draft.
    #[must_use]
    pub const fn leaf(kind: ReservationKind, interval: TimeInterval) -> Self {
        Self {
            kind,
            interval,
            children: Vec::new(),
        }
    }

    /// Draft with children.
    #[must_use]
    pub const fn with_children(
        kind: ReservationKind,
        interval: TimeInterval,
        children: Vec<Self>,
    ) -> Self {
        Self {
            kind,
            interval,
            children,
        }
    }

    /// Depth-first walk over this draft and its descendants.
    pub fn walk(&self) -> Box<dyn Iterator<Item = &Self> + '_> {
        Box::new(std::iter::once(self).chain(self.children.iter().flat_map(Self::walk)))
    }
}
