//! Controller-facing service and its request/response models.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{
    Authorization, CommandResponse, DeviceCommand, EngineError, EntityRef, Executable,
    ExecutableKind, ExecutableState, Executor, Permission, RequestState, ReservationRequest,
    ReservationSummary, Scheduler, SecurityToken, Specification,
};
use crate::util::{ExecutableId, RequestId, ReservationId, TimeInterval, UserId};

/// Request creation payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSubmission {
    /// Requested interval.
    pub interval: TimeInterval,
    /// What is wanted.
    pub specification: Specification,
    /// Whether foreign domains may satisfy it.
    #[serde(default)]
    pub allow_foreign: bool,
}

/// Request state with its reservation tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestView {
    /// Identifier.
    pub id: RequestId,
    /// Owner.
    pub owner: UserId,
    /// Requested interval.
    pub interval: TimeInterval,
    /// Specification.
    pub specification: Specification,
    /// Lifecycle state.
    pub state: RequestState,
    /// Last failure detail.
    pub report: Option<String>,
    /// Current reservation tree.
    pub reservation: Option<ReservationSummary>,
}

/// Executable state as reported to controllers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableView {
    /// Identifier.
    pub id: ExecutableId,
    /// Realized reservation.
    pub reservation_id: ReservationId,
    /// Device object.
    pub kind: ExecutableKind,
    /// Lifecycle state.
    pub state: ExecutableState,
    /// Retries consumed in the current transition.
    pub retry_count: u32,
    /// Deletion waits for the device to become idle.
    pub deferred_delete: bool,
    /// Last failure detail.
    pub last_error: Option<String>,
}

impl From<Executable> for ExecutableView {
    fn from(executable: Executable) -> Self {
        Self {
            id: executable.id,
            reservation_id: executable.reservation_id,
            kind: executable.kind,
            state: executable.state,
            retry_count: executable.retry_count,
            deferred_delete: executable.deferred_delete,
            last_error: executable.last_error,
        }
    }
}

/// Permission-gated entry points used by controllers (web, CLI, ...).
///
/// The owner of a request holds every permission on it and on the
/// executables realizing it; everyone else needs an ACL grant.
#[derive(Clone)]
pub struct ReservationService {
    scheduler: Arc<Scheduler>,
    executor: Arc<Executor>,
    authorization: Arc<dyn Authorization>,
}

impl ReservationService {
    /// Service over a scheduler and executor sharing one store.
    pub fn new(
        scheduler: Arc<Scheduler>,
        executor: Arc<Executor>,
        authorization: Arc<dyn Authorization>,
    ) -> Self {
        Self {
            scheduler,
            executor,
            authorization,
        }
    }

    /// Create a request owned by the caller and try to allocate it right away.
    ///
    /// An allocation failure is reported through the returned view.
    ///
    /// # Errors
    ///
    /// Unknown token, invalid specification or repository failure.
    pub async fn create_request(
        &self,
        token: &SecurityToken,
        submission: RequestSubmission,
    ) -> Result<RequestView, EngineError> {
        let owner = self
            .authorization
            .user_id(token)
            .ok_or_else(|| EngineError::PermissionDenied("unknown security token".into()))?;
        let mut request =
            ReservationRequest::new(owner, submission.interval, submission.specification);
        request.allow_foreign = submission.allow_foreign;
        let request = self.scheduler.create_request(request)?;
        if let Err(err) = self.scheduler.allocate(request.id).await {
            debug!(request_id = request.id, error = %err, "initial allocation failed");
        }
        self.view(request.id)
    }

    /// Current state of a request.
    ///
    /// # Errors
    ///
    /// Permission denied or unknown request.
    pub fn get_request(&self, token: &SecurityToken, id: RequestId) -> Result<RequestView, EngineError> {
        self.authorize(token, id, Permission::Read)?;
        self.view(id)
    }

    /// Replace interval and specification and re-allocate. On failure the
    /// previous tree stays in place.
    ///
    /// # Errors
    ///
    /// Permission denied, deleted request or invalid specification.
    pub async fn modify_request(
        &self,
        token: &SecurityToken,
        id: RequestId,
        interval: TimeInterval,
        specification: Specification,
    ) -> Result<RequestView, EngineError> {
        self.authorize(token, id, Permission::Write)?;
        self.scheduler.modify_request(id, interval, specification).await?;
        if let Err(err) = self.scheduler.allocate(id).await {
            debug!(request_id = id, error = %err, "re-allocation failed");
        }
        self.view(id)
    }

    /// Delete a request and its tree.
    ///
    /// # Errors
    ///
    /// Permission denied, or `ForeignReleasePending` while remote bookings
    /// could not be cancelled; retrying is safe.
    pub async fn delete_request(&self, token: &SecurityToken, id: RequestId) -> Result<(), EngineError> {
        self.authorize(token, id, Permission::Delete)?;
        self.scheduler.delete_request(id).await?;
        Ok(())
    }

    /// Executables realizing the request's tree.
    ///
    /// # Errors
    ///
    /// Permission denied or repository failure.
    pub fn list_executables(
        &self,
        token: &SecurityToken,
        id: RequestId,
    ) -> Result<Vec<ExecutableView>, EngineError> {
        self.authorize(token, id, Permission::Read)?;
        let store = self.scheduler.store();
        let request = store.requests.load(id)?;
        let Some(root) = request.reservation_id else {
            return Ok(Vec::new());
        };
        let nodes: Vec<_> = store.tree(root)?.into_iter().map(|n| n.id).collect();
        Ok(store
            .executables
            .find(&|e: &Executable| nodes.contains(&e.reservation_id))
            .into_iter()
            .map(ExecutableView::from)
            .collect())
    }

    /// Issue a runtime control command on a started executable.
    ///
    /// # Errors
    ///
    /// Permission denied, `InvalidCommand`, `NotRunning` or the command failure.
    pub async fn control(
        &self,
        token: &SecurityToken,
        executable_id: ExecutableId,
        command: DeviceCommand,
    ) -> Result<CommandResponse, EngineError> {
        self.authorize_executable(token, executable_id)?;
        self.executor.execute_control(executable_id, command).await
    }

    /// Stop an executable before its slot ends.
    ///
    /// # Errors
    ///
    /// Permission denied or unknown executable.
    pub fn stop_executable(&self, token: &SecurityToken, executable_id: ExecutableId) -> Result<(), EngineError> {
        self.authorize_executable(token, executable_id)?;
        self.executor.request_stop(executable_id)?;
        Ok(())
    }

    fn view(&self, id: RequestId) -> Result<RequestView, EngineError> {
        let store = self.scheduler.store();
        let request = store.requests.load(id)?;
        let reservation = request
            .reservation_id
            .map(|root| store.summary(root))
            .transpose()?;
        Ok(RequestView {
            id: request.id,
            owner: request.owner,
            interval: request.interval,
            specification: request.specification,
            state: request.state,
            report: request.report,
            reservation,
        })
    }

    fn authorize(
        &self,
        token: &SecurityToken,
        id: RequestId,
        permission: Permission,
    ) -> Result<(), EngineError> {
        let request = self.scheduler.store().requests.load(id)?;
        let is_owner = self
            .authorization
            .user_id(token)
            .is_some_and(|user| user == request.owner);
        if is_owner
            || self
                .authorization
                .has_permission(token, &EntityRef::Request(id), permission)
        {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied(format!(
                "{permission:?} on request {id}"
            )))
        }
    }

    fn authorize_executable(&self, token: &SecurityToken, executable_id: ExecutableId) -> Result<(), EngineError> {
        let entity = EntityRef::Executable(executable_id);
        if self
            .authorization
            .has_permission(token, &entity, Permission::ControlResource)
        {
            return Ok(());
        }
        let store = self.scheduler.store();
        let executable = store.executables.load(executable_id)?;
        let request_id = store
            .reservations
            .get(executable.reservation_id)
            .map(|reservation| reservation.request_id);
        match request_id {
            Some(request_id) => self.authorize(token, request_id, Permission::ControlResource),
            None => Err(EngineError::PermissionDenied(format!(
                "ControlResource on {entity}"
            ))),
        }
    }
}
