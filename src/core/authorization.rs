//! Permission check consumed by the scheduler, executor and service layer.

use serde::{Deserialize, Serialize};

use crate::util::{ExecutableId, RequestId, ReservationId, ResourceId, UserId};

/// Opaque caller credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityToken(pub String);

impl SecurityToken {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

/// Permission-checkable entity. The set is closed, so an unsupported entity
/// kind cannot reach the check at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    /// A reservation request.
    Request(RequestId),
    /// A reservation.
    Reservation(ReservationId),
    /// An executable.
    Executable(ExecutableId),
    /// A resource.
    Resource(ResourceId),
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request(id) => write!(f, "request:{id}"),
            Self::Reservation(id) => write!(f, "reservation:{id}"),
            Self::Executable(id) => write!(f, "executable:{id}"),
            Self::Resource(id) => write!(f, "resource:{id}"),
        }
    }
}

/// Operation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Inspect.
    Read,
    /// Modify.
    Write,
    /// Delete.
    Delete,
    /// Control running devices.
    ControlResource,
}

/// Role granted to a user on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full control.
    Owner,
    /// May control running devices and read.
    Operator,
    /// Read only.
    Reader,
}

impl Role {
    /// Whether the role grants `permission`.
    #[must_use]
    pub const fn grants(self, permission: Permission) -> bool {
        match self {
            Self::Owner => true,
            Self::Operator => matches!(permission, Permission::Read | Permission::ControlResource),
            Self::Reader => matches!(permission, Permission::Read),
        }
    }
}

/// `(user, entity, role)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclRecord {
    /// User.
    pub user_id: UserId,
    /// Entity.
    pub entity: EntityRef,
    /// Role.
    pub role: Role,
}

/// Capability check; the only authorization call the core makes.
pub trait Authorization: Send + Sync {
    /// Whether the token's user holds `permission` on `entity`.
    fn has_permission(&self, token: &SecurityToken, entity: &EntityRef, permission: Permission)
        -> bool;

    /// User behind a token.
    fn user_id(&self, token: &SecurityToken) -> Option<UserId>;
}
