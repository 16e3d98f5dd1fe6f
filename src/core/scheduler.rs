//! Conflict-free allocation of reservation requests.
//!
//! One allocation builds an in-memory draft tree against a ledger of the
//! committed reservations overlapping the request interval, delegates the
//! parts that cannot be satisfied locally, and persists the result. The
//! conflict check and the commit run under one allocation lock, so two
//! requests can never both win the same exclusive resource.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::CandidateRanking;
use crate::core::audit::AuditLevel;
use crate::core::authorization::EntityRef;
use crate::core::federation::{Federation, RemoteBooking, RemoteBookingRequest};
use crate::core::notification::{EventKind, LifecycleEvent};
use crate::core::registry::ResourceRegistry;
use crate::core::reporter::Reporter;
use crate::core::reservation::{
    Alias, PendingModification, RequestState, Reservation, ReservationDraft, ReservationKind,
    ReservationRequest, Specification,
};
use crate::core::resource::{Capability, CapabilityKind, Capacity, Resource, VALUE_TOKEN};
use crate::core::store::{holds_remote_ids, Store};
use crate::core::value::ValueAllocator;
use crate::core::{
    AllocationError, RepositoryError, ReservationError, SchedulingError, ValidationError,
    ValueError,
};
use crate::util::{AliasType, RequestId, ReservationId, ResourceId, Technology, TimeInterval};

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerPassReport {
    /// Requests that received a reservation tree.
    pub allocated: Vec<RequestId>,
    /// Requests that failed.
    pub failed: Vec<RequestId>,
}

/// Allocates requests into reservation trees.
pub struct Scheduler {
    store: Store,
    registry: Arc<ResourceRegistry>,
    federation: Federation,
    ranking: CandidateRanking,
    reporter: Reporter,
    allocation_lock: Mutex<()>,
}

impl Scheduler {
    /// Scheduler over `store` and `registry` without foreign domains.
    pub fn new(store: Store, registry: Arc<ResourceRegistry>) -> Self {
        Self {
            store,
            registry,
            federation: Federation::disabled(),
            ranking: CandidateRanking::default(),
            reporter: Reporter::new(),
            allocation_lock: Mutex::new(()),
        }
    }

    /// Use `federation` for delegation.
    #[must_use]
    pub fn with_federation(mut self, federation: Federation) -> Self {
        self.federation = federation;
        self
    }

    /// Use `ranking` to order candidates.
    #[must_use]
    pub const fn with_ranking(mut self, ranking: CandidateRanking) -> Self {
        self.ranking = ranking;
        self
    }

    /// Report through `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Underlying store.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Persist a new request in state `New`.
    ///
    /// # Errors
    ///
    /// Invalid specification or repository failure.
    pub fn create_request(
        &self,
        mut request: ReservationRequest,
    ) -> Result<ReservationRequest, AllocationError> {
        request.specification.validate()?;
        request.id = 0;
        request.state = RequestState::New;
        request.reservation_id = None;
        request.report = None;
        request.pending = None;
        request.orphans.clear();
        let request = self.store.requests.create(request)?;
        debug!(request_id = request.id, spec = request.specification.label(), "request created");
        Ok(request)
    }

    /// Allocate one request.
    ///
    /// An already allocated request returns its current root.
    ///
    /// # Errors
    ///
    /// `AllocationError`; the request is `AllocationFailed` afterwards and any
    /// previous tree is untouched.
    #[instrument(skip(self))]
    pub async fn allocate(&self, request_id: RequestId) -> Result<ReservationId, AllocationError> {
        let _guard = self.allocation_lock.lock().await;
        let request = self.store.requests.load(request_id)?;
        self.allocate_locked(request).await
    }

    /// Allocate every `New` request in id order.
    ///
    /// Requests whose interval already ended fail without allocation.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> SchedulerPassReport {
        let mut report = SchedulerPassReport::default();
        let stranded = self
            .store
            .requests
            .find(&|r: &ReservationRequest| !r.orphans.is_empty());
        for mut request in stranded {
            let _guard = self.allocation_lock.lock().await;
            if let Err(err) = self.retry_orphans(&mut request).await {
                warn!(request_id = request.id, error = %err, "orphaned foreign bookings not updated");
            }
        }

        let pending = self
            .store
            .requests
            .find(&|r: &ReservationRequest| r.state == RequestState::New);
        for request in pending {
            let _guard = self.allocation_lock.lock().await;
            let id = request.id;
            let outcome = if request.target_interval().end <= now {
                self.expire(request)
            } else {
                self.allocate_locked(request).await.map(|_| ())
            };
            match outcome {
                Ok(()) => report.allocated.push(id),
                Err(_) => report.failed.push(id),
            }
        }
        if !report.allocated.is_empty() || !report.failed.is_empty() {
            info!(
                allocated = report.allocated.len(),
                failed = report.failed.len(),
                "scheduler pass finished"
            );
        }
        report
    }

    /// Replace interval and specification; the request is re-allocated by
    /// the next [`allocate`](Self::allocate) or pass.
    ///
    /// While a tree is booked the new data is held as a pending modification
    /// and only replaces the request's interval and specification once the
    /// new tree is committed.
    ///
    /// # Errors
    ///
    /// Deleted request, invalid specification or repository failure.
    pub async fn modify_request(
        &self,
        request_id: RequestId,
        interval: TimeInterval,
        specification: Specification,
    ) -> Result<ReservationRequest, AllocationError> {
        specification.validate()?;
        let _guard = self.allocation_lock.lock().await;
        let mut request = self.store.requests.load(request_id)?;
        if request.state == RequestState::Deleted {
            return Err(ValidationError::RequestState {
                id: request_id,
                state: request.state.to_string(),
            }
            .into());
        }
        if request.reservation_id.is_some() {
            request.pending = Some(PendingModification {
                interval,
                specification,
            });
        } else {
            request.interval = interval;
            request.specification = specification;
            request.pending = None;
        }
        request.state = RequestState::New;
        self.store.requests.update(&request)?;
        info!(request_id, "request modified");
        Ok(request)
    }

    /// Delete a request together with its reservation tree.
    ///
    /// Foreign parts are released first. While any remote id remains nothing
    /// local is deleted; calling again retries the cancellation.
    ///
    /// # Errors
    ///
    /// `ForeignReleasePending` or repository failure.
    #[instrument(skip(self))]
    pub async fn delete_request(&self, request_id: RequestId) -> Result<(), ReservationError> {
        let _guard = self.allocation_lock.lock().await;
        let mut request = self.store.requests.load(request_id)?;
        if request.state == RequestState::Deleted {
            return Ok(());
        }
        if !request.orphans.is_empty() {
            self.retry_orphans(&mut request).await?;
            if let Some(&reservation_id) = request.orphans.first() {
                return Err(ReservationError::ForeignReleasePending {
                    reservation_id,
                    remaining: self.remote_ids(reservation_id),
                });
            }
        }
        if let Some(root) = request.reservation_id {
            self.release_tree(&request, root).await?;
        }
        request.state = RequestState::Deleted;
        request.reservation_id = None;
        self.store.requests.update(&request)?;
        let entity = EntityRef::Request(request_id);
        self.reporter
            .audit(entity.clone(), "request_deleted", AuditLevel::Info, None);
        self.reporter.notify(&LifecycleEvent::new(
            EventKind::RequestDeleted,
            entity,
            request.owner.clone(),
        ));
        Ok(())
    }

    async fn allocate_locked(
        &self,
        mut request: ReservationRequest,
    ) -> Result<ReservationId, AllocationError> {
        match (request.state, request.reservation_id) {
            (RequestState::Allocated, Some(root)) => return Ok(root),
            (RequestState::Deleted, _) => {
                return Err(ValidationError::RequestState {
                    id: request.id,
                    state: request.state.to_string(),
                }
                .into())
            }
            _ => {}
        }

        let entity = EntityRef::Request(request.id);
        match self.try_allocate(&mut request).await {
            Ok(root) => {
                if let Some(pending) = request.pending.take() {
                    request.interval = pending.interval;
                    request.specification = pending.specification;
                }
                request.state = RequestState::Allocated;
                request.reservation_id = Some(root);
                request.report = None;
                if let Err(err) = self.store.requests.update(&request) {
                    let orphans = self.discard_tree(root).await;
                    if !orphans.is_empty() {
                        warn!(request_id = request.id, ?orphans, "foreign bookings left without a request record");
                    }
                    return Err(err.into());
                }
                info!(request_id = request.id, root, "request allocated");
                self.reporter
                    .audit(entity.clone(), "allocated", AuditLevel::Info, None);
                self.reporter.notify(&LifecycleEvent::new(
                    EventKind::RequestAllocated,
                    entity,
                    request.owner.clone(),
                ));
                Ok(root)
            }
            Err(err) => {
                let detail = err.to_string();
                request.pending = None;
                request.state = RequestState::AllocationFailed;
                request.report = Some(detail.clone());
                self.store.requests.update(&request)?;
                self.reporter.audit(
                    entity.clone(),
                    "allocation_failed",
                    AuditLevel::Warning,
                    Some(detail.clone()),
                );
                self.reporter.notify(
                    &LifecycleEvent::new(EventKind::AllocationFailed, entity, request.owner.clone())
                        .with_detail(detail),
                );
                Err(err)
            }
        }
    }

    fn expire(&self, mut request: ReservationRequest) -> Result<(), AllocationError> {
        let detail = format!(
            "requested interval {} has already ended",
            request.target_interval()
        );
        request.pending = None;
        request.state = RequestState::AllocationFailed;
        request.report = Some(detail.clone());
        self.store.requests.update(&request)?;
        self.reporter.audit(
            EntityRef::Request(request.id),
            "allocation_failed",
            AuditLevel::Warning,
            Some(detail.clone()),
        );
        Err(SchedulingError::no_available_resource(detail).into())
    }

    async fn try_allocate(
        &self,
        request: &mut ReservationRequest,
    ) -> Result<ReservationId, AllocationError> {
        let interval = request.target_interval();
        let specification = request.target_specification().clone();
        let specification = &specification;
        specification.validate()?;
        let previous = match request.reservation_id {
            Some(root) => self.store.tree(root)?,
            None => Vec::new(),
        };
        let committed = self.store.overlapping(&interval, Some(request.id));
        let allow_foreign = request.allow_foreign && self.federation.is_enabled();

        let mut attempt = Attempt {
            registry: &self.registry,
            store: &self.store,
            ranking: self.ranking,
            ledger: Ledger::from_reservations(&committed),
            interval,
            request_id: request.id,
            allow_foreign,
            foreign_parts: Vec::new(),
            conflict: false,
        };

        let (mut draft, parts, local_error) = match attempt.allocate(specification) {
            Ok(draft) => (draft, std::mem::take(&mut attempt.foreign_parts), None),
            Err(err) if allow_foreign && is_delegable(specification) => {
                debug!(request_id = request.id, error = %err, "no local candidate, delegating whole request");
                let description = specification.label().to_string();
                let part = RemoteBookingRequest {
                    interval,
                    specification: specification.clone(),
                    description: description.clone(),
                };
                (foreign_placeholder(description, interval), vec![part], Some(err))
            }
            Err(err) => return Err(err.into()),
        };

        let bookings = if parts.is_empty() {
            Vec::new()
        } else {
            match self.federation.book_all(&parts).await? {
                Some(bookings) => bookings,
                None => {
                    return Err(local_error
                        .unwrap_or_else(|| {
                            SchedulingError::no_available_resource(
                                "no foreign domain accepted the request",
                            )
                        })
                        .into())
                }
            }
        };
        fill_foreign(&mut draft, &mut bookings.iter());

        let migrate = |kind: &ReservationKind| migration_source(&previous, kind);
        let root = match self.store.persist_tree(request.id, &draft, &migrate) {
            Ok(root) => root,
            Err(err) => {
                self.federation.rollback(&bookings).await;
                return Err(err.into());
            }
        };

        if let Some(old_root) = request.reservation_id {
            if let Err(err) = self.release_tree(request, old_root).await {
                warn!(request_id = request.id, error = %err, "previous tree could not be released, keeping it");
                let orphans = self.discard_tree(root).await;
                request.orphans.extend(orphans);
                return Err(err.into());
            }
        }
        Ok(root)
    }

    /// Release foreign parts, then delete the tree.
    async fn release_tree(
        &self,
        request: &ReservationRequest,
        root: ReservationId,
    ) -> Result<Vec<Reservation>, ReservationError> {
        let nodes = self.store.tree(root)?;
        let mut pending: Option<(ReservationId, Vec<String>)> = None;
        for mut node in nodes {
            if !holds_remote_ids(&node.kind) {
                continue;
            }
            let outcome = self.federation.release(&mut node).await;
            if !outcome.cancelled.is_empty() {
                self.store.reservations.update(&node)?;
            }
            if !outcome.is_complete() {
                let entity = EntityRef::Reservation(node.id);
                for warning in &outcome.warnings {
                    self.reporter.audit(
                        entity.clone(),
                        "foreign_release_failed",
                        AuditLevel::Warning,
                        Some(warning.clone()),
                    );
                }
                self.reporter.notify(
                    &LifecycleEvent::new(
                        EventKind::ForeignReleaseWarning,
                        entity,
                        request.owner.clone(),
                    )
                    .with_detail(outcome.warnings.join("; ")),
                );
                pending.get_or_insert((node.id, outcome.remaining));
            }
        }
        if let Some((reservation_id, remaining)) = pending {
            return Err(ReservationError::ForeignReleasePending {
                reservation_id,
                remaining,
            });
        }
        self.store.delete_tree(root)
    }

    /// Remove a tree that was never handed out.
    ///
    /// Foreign parts are cancelled first; those still holding remote ids are
    /// detached and returned together with any root that could not be
    /// removed, so a later pass can try again.
    async fn discard_tree(&self, root: ReservationId) -> Vec<ReservationId> {
        let nodes = match self.store.tree(root) {
            Ok(nodes) => nodes,
            Err(RepositoryError::NotFound { .. }) => return Vec::new(),
            Err(err) => {
                self.rollback_incomplete(root, &err.to_string());
                return vec![root];
            }
        };
        for mut node in nodes {
            if !holds_remote_ids(&node.kind) {
                continue;
            }
            let outcome = self.federation.release(&mut node).await;
            if !outcome.cancelled.is_empty() {
                if let Err(err) = self.store.reservations.update(&node) {
                    self.rollback_incomplete(root, &err.to_string());
                    return vec![root];
                }
            }
            for warning in &outcome.warnings {
                self.reporter.audit(
                    EntityRef::Reservation(node.id),
                    "foreign_release_failed",
                    AuditLevel::Warning,
                    Some(warning.clone()),
                );
            }
        }
        match self.store.prune_tree(root) {
            Ok(kept) => kept.into_iter().map(|node| node.id).collect(),
            Err(err) => {
                self.rollback_incomplete(root, &err.to_string());
                vec![root]
            }
        }
    }

    /// Retry the cancellation of a request's detached foreign bookings.
    async fn retry_orphans(&self, request: &mut ReservationRequest) -> Result<(), RepositoryError> {
        let mut left = Vec::new();
        for root in std::mem::take(&mut request.orphans) {
            left.extend(self.discard_tree(root).await);
        }
        if left.is_empty() {
            info!(request_id = request.id, "orphaned foreign bookings released");
        }
        request.orphans = left;
        self.store.requests.update(request)
    }

    fn remote_ids(&self, reservation_id: ReservationId) -> Vec<String> {
        match self.store.reservations.get(reservation_id).map(|node| node.kind) {
            Some(ReservationKind::Foreign {
                remote_request_ids, ..
            }) => remote_request_ids.into_iter().collect(),
            _ => Vec::new(),
        }
    }

    fn rollback_incomplete(&self, root: ReservationId, detail: &str) {
        warn!(root, error = detail, "rolled back tree could not be removed");
        self.reporter.audit(
            EntityRef::Reservation(root),
            "rollback_incomplete",
            AuditLevel::Error,
            Some(detail.to_string()),
        );
    }
}

fn is_delegable(specification: &Specification) -> bool {
    !matches!(specification, Specification::Existing { .. })
}

fn foreign_placeholder(description: String, interval: TimeInterval) -> ReservationDraft {
    ReservationDraft::leaf(
        ReservationKind::Foreign {
            domain: String::new(),
            remote_request_ids: BTreeSet::new(),
            description,
        },
        interval,
    )
}

/// Assign bookings to foreign placeholders in draft walk order.
fn fill_foreign<'a>(
    draft: &mut ReservationDraft,
    bookings: &mut impl Iterator<Item = &'a RemoteBooking>,
) {
    if let ReservationKind::Foreign {
        domain,
        remote_request_ids,
        ..
    } = &mut draft.kind
    {
        if let Some(booking) = bookings.next() {
            domain.clone_from(&booking.domain);
            remote_request_ids.insert(booking.remote_request_id.clone());
        }
    }
    for child in &mut draft.children {
        fill_foreign(child, bookings);
    }
}

/// Node of the previous tree that a new node replaces.
fn migration_source(previous: &[Reservation], kind: &ReservationKind) -> Option<ReservationId> {
    previous
        .iter()
        .find(|old| match (&old.kind, kind) {
            (
                ReservationKind::Room { resource_id: a, .. },
                ReservationKind::Room { resource_id: b, .. },
            )
            | (
                ReservationKind::Resource { resource_id: a, .. },
                ReservationKind::Resource { resource_id: b, .. },
            )
            | (
                ReservationKind::Recording { resource_id: a },
                ReservationKind::Recording { resource_id: b },
            ) => a == b,
            _ => false,
        })
        .map(|old| old.id)
}

#[derive(Debug, Clone)]
struct Usage {
    resource_id: ResourceId,
    units: u32,
    interval: TimeInterval,
}

#[derive(Debug, Clone)]
struct ValueUse {
    provider_id: ResourceId,
    value: String,
    interval: TimeInterval,
}

/// Capacity, value and reuse bookkeeping of committed reservations plus the
/// drafts produced so far.
#[derive(Debug, Clone, Default)]
struct Ledger {
    usage: Vec<Usage>,
    values: Vec<ValueUse>,
    reused: Vec<(ReservationId, TimeInterval)>,
}

type LedgerMark = (usize, usize, usize);

impl Ledger {
    fn from_reservations(reservations: &[Reservation]) -> Self {
        let mut ledger = Self::default();
        for reservation in reservations {
            ledger.record(&reservation.kind, reservation.interval);
        }
        ledger
    }

    fn record(&mut self, kind: &ReservationKind, interval: TimeInterval) {
        if let Some((resource_id, units)) = kind.capacity_usage() {
            self.usage.push(Usage {
                resource_id: resource_id.to_string(),
                units,
                interval,
            });
        }
        if let Some((provider_id, value)) = kind.provided_value() {
            self.values.push(ValueUse {
                provider_id: provider_id.to_string(),
                value: value.to_string(),
                interval,
            });
        }
        if let ReservationKind::Existing { reused_id } = kind {
            self.reused.push((*reused_id, interval));
        }
    }

    fn mark(&self) -> LedgerMark {
        (self.usage.len(), self.values.len(), self.reused.len())
    }

    fn rewind(&mut self, (usage, values, reused): LedgerMark) {
        self.usage.truncate(usage);
        self.values.truncate(values);
        self.reused.truncate(reused);
    }

    fn has_overlap(&self, resource_id: &str, interval: &TimeInterval) -> bool {
        self.usage
            .iter()
            .any(|u| u.resource_id == resource_id && u.interval.overlaps(interval))
    }

    /// Peak concurrent units on `resource_id` within `interval`.
    fn peak(&self, resource_id: &str, interval: &TimeInterval) -> u32 {
        let mut events: Vec<(DateTime<Utc>, i64)> = Vec::new();
        for usage in self
            .usage
            .iter()
            .filter(|u| u.resource_id == resource_id && u.interval.overlaps(interval))
        {
            events.push((usage.interval.start.max(interval.start), i64::from(usage.units)));
            events.push((usage.interval.end.min(interval.end), -i64::from(usage.units)));
        }
        // Ends sort before starts at the same instant (half-open intervals).
        events.sort_unstable();
        let mut current = 0_i64;
        let mut peak = 0_i64;
        for (_, delta) in events {
            current += delta;
            peak = peak.max(current);
        }
        u32::try_from(peak).unwrap_or(u32::MAX)
    }

    fn values(&self, provider_id: &str, interval: &TimeInterval) -> BTreeSet<String> {
        self.values
            .iter()
            .filter(|v| v.provider_id == provider_id && v.interval.overlaps(interval))
            .map(|v| v.value.clone())
            .collect()
    }

    fn is_reused(&self, reservation_id: ReservationId, interval: &TimeInterval) -> bool {
        self.reused
            .iter()
            .any(|(id, i)| *id == reservation_id && i.overlaps(interval))
    }
}

/// State of one allocation attempt.
struct Attempt<'a> {
    registry: &'a ResourceRegistry,
    store: &'a Store,
    ranking: CandidateRanking,
    ledger: Ledger,
    interval: TimeInterval,
    request_id: RequestId,
    allow_foreign: bool,
    foreign_parts: Vec<RemoteBookingRequest>,
    /// At least one candidate was rejected because of an overlap.
    conflict: bool,
}

impl Attempt<'_> {
    fn allocate(&mut self, specification: &Specification) -> Result<ReservationDraft, SchedulingError> {
        match specification {
            Specification::Resource { resource_id } => self.resource(resource_id),
            Specification::Value {
                provider_id,
                requested,
            } => self.value(provider_id.as_deref(), requested.as_deref()),
            Specification::Alias {
                technology,
                alias_type,
                requested_value,
            } => self.alias(*technology, *alias_type, requested_value.as_deref(), None),
            Specification::Room {
                technology,
                participant_count,
                aliases,
                recorded,
            } => self.room(*technology, *participant_count, aliases, *recorded),
            Specification::Compartment {
                technology,
                endpoints,
            } => self.compartment(*technology, endpoints),
            Specification::Existing { reservation_id } => self.existing(*reservation_id),
        }
    }

    fn fail(&self, detail: impl Into<String>) -> SchedulingError {
        if self.conflict {
            SchedulingError::time_conflict(detail)
        } else {
            SchedulingError::no_available_resource(detail)
        }
    }

    fn take(&mut self, kind: ReservationKind) -> ReservationDraft {
        self.ledger.record(&kind, self.interval);
        ReservationDraft::leaf(kind, self.interval)
    }

    /// Whether `units` more fit on `resource` in the interval.
    fn admit(&mut self, resource: &Resource, units: u32) -> bool {
        let fits = match resource.capacity {
            Capacity::Unlimited => true,
            Capacity::Exclusive => !self.ledger.has_overlap(&resource.id, &self.interval),
            Capacity::Limited(limit) if units > limit => return false,
            Capacity::Limited(limit) => {
                self.ledger.peak(&resource.id, &self.interval) + units <= limit
            }
        };
        if !fits {
            self.conflict = true;
        }
        fits
    }

    fn rank(&self, mut candidates: Vec<Arc<Resource>>) -> Vec<Arc<Resource>> {
        match self.ranking {
            CandidateRanking::Priority => {
                candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
            }
            CandidateRanking::LeastUtilized => {
                candidates.sort_by_cached_key(|r| {
                    (
                        self.utilization(r),
                        std::cmp::Reverse(r.priority),
                        r.id.clone(),
                    )
                });
            }
        }
        candidates
    }

    /// Peak utilization in per mille.
    fn utilization(&self, resource: &Resource) -> u64 {
        match resource.capacity {
            Capacity::Unlimited => 0,
            Capacity::Exclusive => {
                if self.ledger.has_overlap(&resource.id, &self.interval) {
                    1_000
                } else {
                    0
                }
            }
            Capacity::Limited(limit) => {
                u64::from(self.ledger.peak(&resource.id, &self.interval)) * 1_000
                    / u64::from(limit.max(1))
            }
        }
    }

    fn resource(&mut self, resource_id: &str) -> Result<ReservationDraft, SchedulingError> {
        let Some(resource) = self.registry.get(resource_id) else {
            return Err(SchedulingError::no_available_resource(format!(
                "resource `{resource_id}` does not exist"
            )));
        };
        if !resource.allocatable {
            return Err(SchedulingError::no_available_resource(format!(
                "resource `{resource_id}` is not allocatable"
            )));
        }
        if !self.admit(&resource, 1) {
            return Err(self.fail(format!(
                "resource `{resource_id}` is already booked in {}",
                self.interval
            )));
        }
        Ok(self.take(ReservationKind::Resource {
            resource_id: resource.id.clone(),
            units: 1,
        }))
    }

    fn value(
        &mut self,
        provider_id: Option<&str>,
        requested: Option<&str>,
    ) -> Result<ReservationDraft, SchedulingError> {
        let providers = match provider_id {
            Some(id) => self
                .registry
                .get(id)
                .filter(|r| r.allocatable)
                .into_iter()
                .collect(),
            None => self.rank(self.registry.value_providers()),
        };
        let mut last = None;
        for provider in providers {
            match self.value_from(&provider, requested) {
                Ok(draft) => return Ok(draft),
                Err(err) => last = Some(err),
            }
        }
        Err(match last {
            Some(err) => self.value_failure(err),
            None => SchedulingError::no_available_resource("no value provider available"),
        })
    }

    fn value_from(
        &mut self,
        provider: &Resource,
        requested: Option<&str>,
    ) -> Result<ReservationDraft, ValueError> {
        let Some(allocator) = ValueAllocator::for_resource(provider) else {
            return Err(ValueError::NoValueAvailable {
                provider: provider.id.clone(),
            });
        };
        let used = self.ledger.values(&provider.id, &self.interval);
        let value = allocator.allocate(&used, requested).inspect_err(|err| {
            if matches!(err, ValueError::ValueInUse { .. }) {
                self.conflict = true;
            }
        })?;
        Ok(self.take(ReservationKind::Value {
            provider_id: provider.id.clone(),
            value,
        }))
    }

    fn value_failure(&self, err: ValueError) -> SchedulingError {
        match err {
            ValueError::ValueInUse { .. } => SchedulingError::time_conflict(err.to_string()),
            other => other.into(),
        }
    }

    fn alias(
        &mut self,
        technology: Technology,
        alias_type: Option<AliasType>,
        requested_value: Option<&str>,
        owner: Option<&str>,
    ) -> Result<ReservationDraft, SchedulingError> {
        let mut candidates = self.rank(self.registry.candidates(CapabilityKind::Alias, technology));
        if let Some(owner) = owner {
            candidates.sort_by_key(|r| r.id != owner);
        }
        let mut last = None;
        for candidate in &candidates {
            for capability in &candidate.capabilities {
                let Capability::Alias {
                    technology: t,
                    alias_type: kind,
                    template,
                    ..
                } = capability
                else {
                    continue;
                };
                if *t != technology || alias_type.is_some_and(|wanted| wanted != *kind) {
                    continue;
                }
                let Some(provider) = self.registry.alias_provider(candidate, capability) else {
                    continue;
                };
                let mark = self.ledger.mark();
                match self.value_from(&provider, requested_value) {
                    Ok(value_draft) => {
                        let Some((_, value)) = value_draft.kind.provided_value() else {
                            self.ledger.rewind(mark);
                            continue;
                        };
                        let alias = Alias {
                            technology,
                            alias_type: *kind,
                            value: template.replace(VALUE_TOKEN, value),
                        };
                        return Ok(ReservationDraft::with_children(
                            ReservationKind::Alias {
                                resource_id: candidate.id.clone(),
                                aliases: vec![alias],
                            },
                            self.interval,
                            vec![value_draft],
                        ));
                    }
                    Err(err) => {
                        self.ledger.rewind(mark);
                        last = Some(err);
                    }
                }
            }
        }
        Err(match last {
            Some(err) => self.value_failure(err),
            None => SchedulingError::no_available_resource(format!(
                "no alias provider for {technology}"
            )),
        })
    }

    fn room(
        &mut self,
        technology: Technology,
        participant_count: u32,
        aliases: &[Technology],
        recorded: bool,
    ) -> Result<ReservationDraft, SchedulingError> {
        let candidates = self.rank(self.registry.candidates(CapabilityKind::Room, technology));
        if candidates.is_empty() {
            return Err(SchedulingError::no_available_resource(format!(
                "no room resource supports {technology}"
            )));
        }
        let mut last = None;
        for room in candidates {
            if !self.admit(&room, participant_count) {
                continue;
            }
            let mark = self.ledger.mark();
            let kind = ReservationKind::Room {
                resource_id: room.id.clone(),
                participant_count,
                technology,
            };
            self.ledger.record(&kind, self.interval);
            match self.room_children(&room, technology, aliases, recorded) {
                Ok(children) => {
                    return Ok(ReservationDraft::with_children(kind, self.interval, children))
                }
                Err(err) => {
                    debug!(room = %room.id, error = %err, "room candidate rejected");
                    self.ledger.rewind(mark);
                    last = Some(err);
                }
            }
        }
        Err(last.unwrap_or_else(|| {
            self.fail(format!(
                "no room with {participant_count} free licenses in {}",
                self.interval
            ))
        }))
    }

    fn room_children(
        &mut self,
        room: &Resource,
        technology: Technology,
        aliases: &[Technology],
        recorded: bool,
    ) -> Result<Vec<ReservationDraft>, SchedulingError> {
        let mut children = Vec::with_capacity(aliases.len() + usize::from(recorded));
        for alias_technology in aliases {
            children.push(self.alias(*alias_technology, None, None, Some(&room.id))?);
        }
        if recorded {
            children.push(self.recording(technology)?);
        }
        Ok(children)
    }

    fn recording(&mut self, technology: Technology) -> Result<ReservationDraft, SchedulingError> {
        let candidates = self.rank(self.registry.candidates(CapabilityKind::Recording, technology));
        for candidate in candidates {
            if self.admit(&candidate, 1) {
                return Ok(self.take(ReservationKind::Recording {
                    resource_id: candidate.id.clone(),
                }));
            }
        }
        Err(self.fail(format!("no recording capacity for {technology}")))
    }

    fn compartment(
        &mut self,
        technology: Technology,
        endpoints: &[ResourceId],
    ) -> Result<ReservationDraft, SchedulingError> {
        let mut children = Vec::with_capacity(endpoints.len() + 1);
        for endpoint in endpoints {
            match self.registry.get(endpoint) {
                Some(resource) if resource.offers(CapabilityKind::Terminal, technology) => {
                    if !resource.allocatable || !self.admit(&resource, 1) {
                        return Err(self.fail(format!("endpoint `{endpoint}` is not available")));
                    }
                    children.push(self.take(ReservationKind::Resource {
                        resource_id: endpoint.clone(),
                        units: 1,
                    }));
                }
                Some(_) => {
                    return Err(SchedulingError::no_available_resource(format!(
                        "endpoint `{endpoint}` cannot use {technology}"
                    )))
                }
                None if self.allow_foreign => {
                    let part = self.foreign_part(
                        Specification::Resource {
                            resource_id: endpoint.clone(),
                        },
                        format!("endpoint {endpoint}"),
                    );
                    children.push(part);
                }
                None => {
                    return Err(SchedulingError::no_available_resource(format!(
                        "endpoint `{endpoint}` is unknown"
                    )))
                }
            }
        }

        let participants = u32::try_from(endpoints.len()).unwrap_or(u32::MAX);
        match self.room(technology, participants, &[technology], false) {
            Ok(room) => children.push(room),
            Err(err) if self.allow_foreign => {
                debug!(error = %err, "delegating compartment room");
                let part = self.foreign_part(
                    Specification::Room {
                        technology,
                        participant_count: participants,
                        aliases: vec![technology],
                        recorded: false,
                    },
                    format!("room for {participants} participants"),
                );
                children.push(part);
            }
            Err(err) => return Err(err),
        }
        Ok(ReservationDraft::with_children(
            ReservationKind::Compartment { technology },
            self.interval,
            children,
        ))
    }

    fn foreign_part(&mut self, specification: Specification, description: String) -> ReservationDraft {
        self.foreign_parts.push(RemoteBookingRequest {
            interval: self.interval,
            specification,
            description: description.clone(),
        });
        foreign_placeholder(description, self.interval)
    }

    fn existing(&mut self, reservation_id: ReservationId) -> Result<ReservationDraft, SchedulingError> {
        let Some(reused) = self.store.reservations.get(reservation_id) else {
            return Err(SchedulingError::no_available_resource(format!(
                "reservation {reservation_id} does not exist"
            )));
        };
        if reused.request_id == self.request_id {
            return Err(SchedulingError::no_available_resource(
                "a request cannot reuse its own reservation",
            ));
        }
        if !reused.interval.contains(&self.interval) {
            return Err(SchedulingError::no_available_resource(format!(
                "reservation {reservation_id} does not cover {}",
                self.interval
            )));
        }
        if self.ledger.is_reused(reservation_id, &self.interval) {
            self.conflict = true;
            return Err(SchedulingError::time_conflict(format!(
                "reservation {reservation_id} is already reused in {}",
                self.interval
            )));
        }
        Ok(self.take(ReservationKind::Existing {
            reused_id: reservation_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
    }

    fn usage(units: u32) -> ReservationKind {
        ReservationKind::Resource {
            resource_id: "mcu".into(),
            units,
        }
    }

    #[test]
    fn test_peak_counts_only_concurrent_usage() {
        let mut ledger = Ledger::default();
        let first = TimeInterval::new(at(10, 0), at(11, 0)).unwrap();
        let second = TimeInterval::new(at(11, 0), at(12, 0)).unwrap();
        let third = TimeInterval::new(at(10, 30), at(11, 30)).unwrap();
        ledger.record(&usage(4), first);
        ledger.record(&usage(5), second);
        let whole = TimeInterval::new(at(9, 0), at(13, 0)).unwrap();
        // Back-to-back intervals never add up.
        assert_eq!(ledger.peak("mcu", &whole), 5);
        ledger.record(&usage(2), third);
        assert_eq!(ledger.peak("mcu", &whole), 7);
        assert_eq!(ledger.peak("other", &whole), 0);
    }

    #[test]
    fn test_rewind_drops_draft_usage() {
        let mut ledger = Ledger::default();
        let interval = TimeInterval::new(at(10, 0), at(11, 0)).unwrap();
        let mark = ledger.mark();
        ledger.record(
            &ReservationKind::Value {
                provider_id: "p".into(),
                value: "9501".into(),
            },
            interval,
        );
        assert_eq!(ledger.values("p", &interval).len(), 1);
        ledger.rewind(mark);
        assert!(ledger.values("p", &interval).is_empty());
    }

    #[test]
    fn test_fill_foreign_assigns_bookings_in_walk_order() {
        let interval = TimeInterval::new(at(10, 0), at(11, 0)).unwrap();
        let mut draft = ReservationDraft::with_children(
            ReservationKind::Compartment {
                technology: Technology::Sip,
            },
            interval,
            vec![
                foreign_placeholder("endpoint a".into(), interval),
                foreign_placeholder("room".into(), interval),
            ],
        );
        let bookings = vec![
            RemoteBooking {
                domain: "x".into(),
                remote_request_id: "1".into(),
            },
            RemoteBooking {
                domain: "y".into(),
                remote_request_id: "2".into(),
            },
        ];
        fill_foreign(&mut draft, &mut bookings.iter());
        let ReservationKind::Foreign { domain, remote_request_ids, .. } = &draft.children[1].kind
        else {
            panic!("expected foreign child");
        };
        assert_eq!(domain, "y");
        assert!(remote_request_ids.contains("2"));
    }
}
