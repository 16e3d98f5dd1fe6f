//! Error types for scheduling, federation and execution.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::util::{ExecutableId, RequestId, ReservationId, ResourceId};

/// Why the scheduler could not satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingErrorKind {
    /// No candidate offers the requested capability (or every value is taken).
    NoAvailableResource,
    /// Candidates exist but are booked in an overlapping interval.
    TimeConflict,
}

impl fmt::Display for SchedulingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAvailableResource => write!(f, "no available resource"),
            Self::TimeConflict => write!(f, "time conflict"),
        }
    }
}

/// Allocation failure reported to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct SchedulingError {
    /// Failure category.
    pub kind: SchedulingErrorKind,
    /// Free-text explanation.
    pub detail: String,
}

impl SchedulingError {
    /// Nothing matched the requested capability.
    pub fn no_available_resource(detail: impl Into<String>) -> Self {
        Self {
            kind: SchedulingErrorKind::NoAvailableResource,
            detail: detail.into(),
        }
    }

    /// Matching candidates were all booked.
    pub fn time_conflict(detail: impl Into<String>) -> Self {
        Self {
            kind: SchedulingErrorKind::TimeConflict,
            detail: detail.into(),
        }
    }
}

impl From<ValueError> for SchedulingError {
    fn from(err: ValueError) -> Self {
        Self::no_available_resource(err.to_string())
    }
}

/// Value allocator failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// Every candidate of the provider sequence is taken in the interval.
    #[error("no value available from provider `{provider}`")]
    NoValueAvailable {
        /// Provider resource.
        provider: ResourceId,
    },
    /// Requested value cannot be produced by the provider pattern.
    #[error("value `{value}` does not match the pattern of provider `{provider}`")]
    InvalidValue {
        /// Provider resource.
        provider: ResourceId,
        /// Rejected value.
        value: String,
    },
    /// Requested value is already allocated in an overlapping interval.
    #[error("value `{value}` of provider `{provider}` is already allocated")]
    ValueInUse {
        /// Provider resource.
        provider: ResourceId,
        /// Conflicting value.
        value: String,
    },
}

/// Failure talking to a foreign domain. Always fatal to the current attempt.
#[derive(Debug, Error)]
#[error("foreign domain `{domain}` failed at {url}: {cause}")]
pub struct ForeignDomainError {
    /// Domain identity.
    pub domain: String,
    /// Address of the attempted action.
    pub url: String,
    /// Underlying cause.
    #[source]
    pub cause: Box<dyn std::error::Error + Send + Sync>,
}

impl ForeignDomainError {
    /// Wrap an underlying error.
    pub fn new(
        domain: impl Into<String>,
        url: impl Into<String>,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            domain: domain.into(),
            url: url.into(),
            cause: cause.into(),
        }
    }
}

/// Device command failures returned by connectors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Operational failure; retried per policy.
    #[error("command `{command}` failed: {reason}")]
    Failed {
        /// Command name.
        command: String,
        /// Connector supplied reason.
        reason: String,
    },
    /// Capability absent on the connector; never retried.
    #[error("command `{command}` is not supported by connector `{connector}`")]
    Unsupported {
        /// Command name.
        command: String,
        /// Connector name.
        connector: String,
    },
    /// No response within the command timeout; retried per policy.
    #[error("command `{command}` timed out after {after:?}")]
    Timeout {
        /// Command name.
        command: String,
        /// Elapsed bound.
        after: Duration,
    },
    /// The command could not be queued or its worker went away.
    #[error("command `{command}` could not be dispatched: {reason}")]
    Dispatch {
        /// Command name.
        command: String,
        /// Reason.
        reason: String,
    },
}

impl CommandError {
    /// Whether the bounded retry policy applies.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unsupported { .. })
    }
}

/// Rejected entity mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Interval is empty or inverted.
    #[error("invalid interval: start {start} is not before end {end}")]
    InvalidInterval {
        /// Start.
        start: DateTime<Utc>,
        /// End.
        end: DateTime<Utc>,
    },
    /// Specification is structurally invalid.
    #[error("invalid specification: {0}")]
    InvalidSpecification(String),
    /// Resource definition is invalid.
    #[error("invalid resource `{id}`: {reason}")]
    InvalidResource {
        /// Resource id.
        id: ResourceId,
        /// Reason.
        reason: String,
    },
    /// Requested state change is not allowed.
    #[error("illegal transition of executable {id} from {from} to {to}")]
    IllegalTransition {
        /// Executable.
        id: ExecutableId,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },
    /// Command cannot be issued through runtime control.
    #[error("invalid control command: {0}")]
    InvalidCommand(String),
    /// Request is not in a state that allows the operation.
    #[error("request {id} cannot be changed in state {state}")]
    RequestState {
        /// Request.
        id: RequestId,
        /// Current state.
        state: String,
    },
}

/// Repository failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// Entity does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind.
        kind: &'static str,
        /// Identifier.
        id: u64,
    },
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Command pool construction failures.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A worker thread could not be spawned.
    #[error("failed to spawn command worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Reservation tree failures.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// A foreign reservation still holds remote ids and cannot be deleted yet.
    #[error("reservation {reservation_id} still holds remote requests {remaining:?}")]
    ForeignReleasePending {
        /// Foreign reservation.
        reservation_id: ReservationId,
        /// Remote ids that could not be cancelled.
        remaining: Vec<String>,
    },
    /// Underlying repository failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Outcome of a failed allocation attempt.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Local scheduling exhausted all candidates.
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    /// A foreign domain failed; the caller decides whether to retry.
    #[error(transparent)]
    ForeignDomain(#[from] ForeignDomainError),
    /// Request data was invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The previous tree could not be released during modification.
    #[error(transparent)]
    Reservation(#[from] ReservationError),
    /// Persistence failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Errors surfaced by the controller-facing service layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Allocation failure.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// Reservation tree failure.
    #[error(transparent)]
    Reservation(#[from] ReservationError),
    /// Validation failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Repository failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// Device command failure.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Command pool failure.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Executable is not running, so it cannot be controlled.
    #[error("executable {0} is not running")]
    NotRunning(ExecutableId),
    /// Caller lacks the permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// Configuration could not be turned into an engine.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_error_wraps_into_no_available_resource() {
        let err: SchedulingError = ValueError::NoValueAvailable {
            provider: "mcu-numbers".into(),
        }
        .into();
        assert_eq!(err.kind, SchedulingErrorKind::NoAvailableResource);
        assert!(err.detail.contains("mcu-numbers"));
    }

    #[test]
    fn test_unsupported_is_not_retryable() {
        let unsupported = CommandError::Unsupported {
            command: "create_room".into(),
            connector: "tcs".into(),
        };
        let failed = CommandError::Failed {
            command: "create_room".into(),
            reason: "busy".into(),
        };
        assert!(!unsupported.is_retryable());
        assert!(failed.is_retryable());
    }

    #[test]
    fn test_foreign_error_keeps_domain_and_url() {
        let err = ForeignDomainError::new("cesnet", "https://cesnet.example/api", "timed out");
        let text = err.to_string();
        assert!(text.contains("cesnet"));
        assert!(text.contains("https://cesnet.example/api"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
