//! Core scheduling, federation and execution.

pub mod audit;
pub mod authorization;
pub mod command_pool;
pub mod connector;
pub mod error;
pub mod executable;
pub mod executor;
pub mod federation;
pub mod notification;
pub mod registry;
pub mod reporter;
pub mod repository;
pub mod reservation;
pub mod resource;
pub mod scheduler;
pub mod store;
pub mod value;

pub use audit::{build_audit_event, AuditEvent, AuditLevel, AuditSink, InMemoryAuditSink};
pub use authorization::{AclRecord, Authorization, EntityRef, Permission, Role, SecurityToken};
pub use command_pool::{CommandOutcome, CommandPool, CommandPoolStats, CommandTicket};
pub use connector::{CommandResponse, Connector, DeviceCommand};
pub use error::{
    AllocationError, AppResult, CommandError, EngineError, ForeignDomainError, PoolError,
    RepositoryError, ReservationError, SchedulingError, SchedulingErrorKind, ValidationError,
    ValueError,
};
pub use executable::{Executable, ExecutableKind, ExecutableState};
pub use executor::{AdvanceReport, Executor};
pub use federation::{
    Federation, ForeignDomain, ForeignDomainClient, ReleaseOutcome, RemoteAllocation,
    RemoteBooking, RemoteBookingRequest,
};
pub use notification::{EventKind, LifecycleEvent, NotificationDispatcher, NotificationExecutor};
pub use registry::{RegistrySnapshot, ResourceRegistry};
pub use reporter::Reporter;
pub use repository::{Entity, Repository};
pub use reservation::{
    Alias, PendingModification, RequestState, Reservation, ReservationDraft, ReservationKind,
    ReservationRequest, ReservationSummary, Specification,
};
pub use resource::{Capability, CapabilityKind, Capacity, Resource, ValueSequence, VALUE_TOKEN};
pub use scheduler::{Scheduler, SchedulerPassReport};
pub use store::Store;
pub use value::ValueAllocator;
