//! Executor: turns allocated reservations into live device objects.
//!
//! Every [`Executor::advance`] pass harvests finished commands, creates or
//! migrates executables for reservations about to start, dispatches the
//! commands due at `now`, waits a bounded time for their answers and finally
//! removes executables that reached `Stopped` or `ToDelete`.
//!
//! Time is logical: retries and probes are scheduled relative to the `now`
//! handed to the pass, so tests can drive the state machine deterministically.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::ExecutorConfig;
use crate::core::audit::AuditLevel;
use crate::core::authorization::EntityRef;
use crate::core::command_pool::{CommandOutcome, CommandPool, CommandTicket};
use crate::core::connector::{CommandResponse, DeviceCommand};
use crate::core::executable::{Executable, ExecutableKind, ExecutableState};
use crate::core::notification::{EventKind, LifecycleEvent};
use crate::core::registry::ResourceRegistry;
use crate::core::reporter::Reporter;
use crate::core::reservation::{Alias, Reservation, ReservationKind};
use crate::core::resource::CapabilityKind;
use crate::core::store::Store;
use crate::core::{CommandError, EngineError, RepositoryError, ValidationError};
use crate::util::ExecutableId;

/// Why a command was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    /// Step of the start or stop plan.
    Transition,
    /// Session probe of a running executable.
    Probe,
    /// Live change after migration.
    Update,
}

/// Command awaiting its answer.
struct InFlight {
    purpose: Purpose,
    state: ExecutableState,
    step: usize,
    ticket: CommandTicket,
}

type Flights = HashMap<ExecutableId, InFlight>;

/// Whether the plan may continue within the same pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Continue,
    Wait,
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    /// Executables created.
    pub created: usize,
    /// Running executables handed over to a replacing reservation.
    pub migrated: usize,
    /// Commands submitted to pools.
    pub dispatched: usize,
    /// Executables that reached `Started`.
    pub started: Vec<ExecutableId>,
    /// Executables that reached `Stopped`.
    pub stopped: Vec<ExecutableId>,
    /// Executables that reached `Failed`.
    pub failed: Vec<ExecutableId>,
    /// Executables removed from the store.
    pub deleted: Vec<ExecutableId>,
}

/// Drives executables through their lifecycle.
pub struct Executor {
    store: Store,
    registry: Arc<ResourceRegistry>,
    pools: HashMap<String, Arc<CommandPool>>,
    config: ExecutorConfig,
    reporter: Reporter,
    in_flight: Mutex<Flights>,
}

impl Executor {
    /// Executor without command pools.
    pub fn new(store: Store, registry: Arc<ResourceRegistry>, config: ExecutorConfig) -> Self {
        Self {
            store,
            registry,
            pools: HashMap::new(),
            config,
            reporter: Reporter::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Register the pool serving the connector `pool.name()`.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<CommandPool>) -> Self {
        self.pools.insert(pool.name().to_string(), pool);
        self
    }

    /// Report through `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Registered pools by connector name.
    #[must_use]
    pub const fn pools(&self) -> &HashMap<String, Arc<CommandPool>> {
        &self.pools
    }

    /// Executor settings.
    #[must_use]
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run one pass at logical time `now`.
    ///
    /// # Errors
    ///
    /// Repository failures; the pass stops at the first one.
    #[instrument(skip(self))]
    pub async fn advance(&self, now: DateTime<Utc>) -> Result<AdvanceReport, RepositoryError> {
        let mut flights = self.in_flight.lock().await;
        let mut report = AdvanceReport::default();

        self.harvest(&mut flights, now, &mut report)?;
        self.materialize(&mut flights, now, &mut report)?;
        self.dispatch_due(&mut flights, now, &mut report)?;
        self.settle(&mut flights, now, &mut report).await?;
        self.collect(&mut flights, now, &mut report)?;

        if report != AdvanceReport::default() {
            debug!(
                created = report.created,
                dispatched = report.dispatched,
                started = report.started.len(),
                stopped = report.stopped.len(),
                failed = report.failed.len(),
                "executor pass finished"
            );
        }
        Ok(report)
    }

    /// Ask a running or pending executable to stop on the next pass.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown executable.
    pub fn request_stop(&self, executable_id: ExecutableId) -> Result<(), RepositoryError> {
        let mut executable = self.store.executables.load(executable_id)?;
        if !executable.stop_requested && !executable.state.is_terminal() {
            executable.stop_requested = true;
            self.store.executables.update(&executable)?;
            info!(executable_id, "stop requested");
        }
        Ok(())
    }

    /// Issue a runtime control command on a started executable and wait for
    /// the answer.
    ///
    /// # Errors
    ///
    /// `NotRunning` unless the executable is `Started`, `InvalidCommand` for
    /// lifecycle commands or a command aimed at another device object, and
    /// the command's own failure.
    #[instrument(skip(self, command), fields(command = command.name()))]
    pub async fn execute_control(
        &self,
        executable_id: ExecutableId,
        command: DeviceCommand,
    ) -> Result<CommandResponse, EngineError> {
        let executable = self.store.executables.load(executable_id)?;
        if executable.state != ExecutableState::Started {
            return Err(EngineError::NotRunning(executable_id));
        }
        if !targets(&executable.kind, &command) {
            return Err(ValidationError::InvalidCommand(format!(
                "`{}` cannot be issued on {} {executable_id}",
                command.name(),
                executable.kind.label()
            ))
            .into());
        }
        let pool = self
            .pool_for(&executable)
            .ok_or(EngineError::NotRunning(executable_id))?;
        let name = command.name();
        let response = pool.submit(command)?.wait().await?;
        self.reporter.audit(
            EntityRef::Executable(executable_id),
            name,
            AuditLevel::Info,
            None,
        );
        Ok(response)
    }

    /// Stop every command pool.
    pub fn shutdown(&self) {
        for pool in self.pools.values() {
            pool.shutdown();
        }
    }

    fn pool_for(&self, executable: &Executable) -> Option<&Arc<CommandPool>> {
        executable
            .connector
            .as_deref()
            .and_then(|name| self.pools.get(name))
    }

    /// Apply every command that finished since the last look.
    fn harvest(
        &self,
        flights: &mut Flights,
        now: DateTime<Utc>,
        report: &mut AdvanceReport,
    ) -> Result<(), RepositoryError> {
        let mut finished = Vec::new();
        for (id, flight) in flights.iter_mut() {
            if let Some(outcome) = flight.ticket.try_take() {
                finished.push((*id, outcome));
            }
        }
        for (id, outcome) in finished {
            if let Some(flight) = flights.remove(&id) {
                self.apply(flights, id, &flight, outcome, now, report)?;
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        flights: &mut Flights,
        id: ExecutableId,
        flight: &InFlight,
        outcome: CommandOutcome,
        now: DateTime<Utc>,
        report: &mut AdvanceReport,
    ) -> Result<(), RepositoryError> {
        let Some(mut executable) = self.store.executables.get(id) else {
            debug!(executable_id = id, "result for removed executable discarded");
            return Ok(());
        };
        let stale = executable.state != flight.state
            || (flight.purpose == Purpose::Transition && executable.step != flight.step);
        if stale {
            debug!(
                executable_id = id,
                command = flight.ticket.command(),
                state = %executable.state,
                "late command result discarded"
            );
            return Ok(());
        }

        match flight.purpose {
            Purpose::Transition => {
                if self.apply_step(&mut executable, outcome, now, report) == Next::Continue
                    && executable.state.is_transient()
                {
                    self.dispatch_step(flights, &mut executable, now, report);
                }
            }
            Purpose::Probe => self.apply_probe(flights, &mut executable, outcome, now, report),
            Purpose::Update => {
                if let Err(err) = outcome {
                    executable.last_error = Some(err.to_string());
                    self.reporter.audit(
                        EntityRef::Executable(id),
                        "update_failed",
                        AuditLevel::Warning,
                        Some(err.to_string()),
                    );
                }
            }
        }
        self.store.executables.update(&executable)
    }

    fn apply_step(
        &self,
        executable: &mut Executable,
        outcome: CommandOutcome,
        now: DateTime<Utc>,
        report: &mut AdvanceReport,
    ) -> Next {
        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                self.apply_failure(executable, &err, now, report);
                return Next::Wait;
            }
        };
        match (response, &mut executable.kind) {
            (CommandResponse::RoomCreated { room_id }, ExecutableKind::Room { device_room_id, .. }) => {
                *device_room_id = Some(room_id);
            }
            (CommandResponse::CallEstablished { call_id: id }, ExecutableKind::Connection { call_id, .. }) => {
                *call_id = Some(id);
            }
            (
                CommandResponse::FolderCreated { folder_id: id },
                ExecutableKind::RecordingFolder { folder_id, .. },
            ) => {
                *folder_id = Some(id);
            }
            (CommandResponse::Idle { idle: false }, _) => {
                if !executable.deferred_delete {
                    info!(executable_id = executable.id, "device busy, deletion deferred");
                }
                executable.deferred_delete = true;
                executable.next_attempt_at = None;
                return Next::Wait;
            }
            (CommandResponse::Idle { idle: true }, _) => executable.deferred_delete = false,
            _ => {}
        }
        executable.step += 1;
        executable.next_attempt_at = None;
        executable.last_error = None;
        if command_plan(executable).len() <= executable.step {
            self.complete(executable, now, report);
            return Next::Wait;
        }
        Next::Continue
    }

    fn apply_probe(
        &self,
        flights: &mut Flights,
        executable: &mut Executable,
        outcome: CommandOutcome,
        now: DateTime<Utc>,
        report: &mut AdvanceReport,
    ) {
        executable.next_attempt_at = Some(now + self.config.probe_interval());
        let lost = match outcome {
            Ok(CommandResponse::SessionActive { active: false }) => {
                warn!(executable_id = executable.id, "device session lost, stopping");
                self.reporter.audit(
                    EntityRef::Executable(executable.id),
                    "session_lost",
                    AuditLevel::Warning,
                    None,
                );
                true
            }
            Ok(_) => {
                executable.retry_count = 0;
                executable.last_error = None;
                false
            }
            Err(err) if !err.is_retryable() => {
                // Sessions the connector cannot query are left to the slot end.
                debug!(executable_id = executable.id, error = %err, "session probe unsupported");
                executable.next_attempt_at = Some(executable.slot.end);
                false
            }
            Err(err) => {
                executable.retry_count += 1;
                executable.last_error = Some(err.to_string());
                if executable.retry_count > self.config.max_retries {
                    warn!(
                        executable_id = executable.id,
                        probes = executable.retry_count,
                        error = %err,
                        "device session unreachable, stopping"
                    );
                    self.reporter.audit(
                        EntityRef::Executable(executable.id),
                        "session_unreachable",
                        AuditLevel::Warning,
                        Some(err.to_string()),
                    );
                    true
                } else {
                    let delay = self.config.backoff(executable.retry_count);
                    executable.next_attempt_at = Some(now + delay);
                    debug!(
                        executable_id = executable.id,
                        retry = executable.retry_count,
                        delay_ms = delay.num_milliseconds(),
                        error = %err,
                        "session probe failed"
                    );
                    false
                }
            }
        };
        if lost && self.move_to(executable, ExecutableState::Stopping) {
            self.dispatch_step(flights, executable, now, report);
        }
    }

    fn apply_failure(
        &self,
        executable: &mut Executable,
        err: &CommandError,
        now: DateTime<Utc>,
        report: &mut AdvanceReport,
    ) {
        executable.last_error = Some(err.to_string());
        if !err.is_retryable() {
            self.fail(executable, report);
            return;
        }
        executable.retry_count += 1;
        if executable.retry_count > self.config.max_retries {
            self.fail(executable, report);
            return;
        }
        let delay = self.config.backoff(executable.retry_count);
        executable.next_attempt_at = Some(now + delay);
        warn!(
            executable_id = executable.id,
            state = %executable.state,
            retry = executable.retry_count,
            delay_ms = delay.num_milliseconds(),
            error = %err,
            "command failed, retrying"
        );
    }

    fn fail(&self, executable: &mut Executable, report: &mut AdvanceReport) {
        let detail = executable.last_error.clone().unwrap_or_default();
        let from = executable.state;
        let retries = executable.retry_count;
        if !self.move_to(executable, ExecutableState::Failed) {
            return;
        }
        // Failed keeps the retries consumed so far for inspection.
        executable.retry_count = retries;
        report.failed.push(executable.id);
        self.reporter.audit(
            EntityRef::Executable(executable.id),
            "failed",
            AuditLevel::Error,
            Some(format!("{from}: {detail}")),
        );
        self.notify(EventKind::ExecutableFailed, executable, Some(detail));
    }

    fn complete(&self, executable: &mut Executable, now: DateTime<Utc>, report: &mut AdvanceReport) {
        match executable.state {
            ExecutableState::Starting => {
                if self.move_to(executable, ExecutableState::Started) {
                    executable.next_attempt_at = Some(now + self.config.probe_interval());
                    report.started.push(executable.id);
                    info!(executable_id = executable.id, kind = executable.kind.label(), "executable started");
                    self.reporter.audit(
                        EntityRef::Executable(executable.id),
                        "started",
                        AuditLevel::Info,
                        None,
                    );
                    self.notify(EventKind::ExecutableStarted, executable, None);
                }
            }
            ExecutableState::Stopping => {
                if self.move_to(executable, ExecutableState::Stopped) {
                    report.stopped.push(executable.id);
                    info!(executable_id = executable.id, kind = executable.kind.label(), "executable stopped");
                    self.reporter.audit(
                        EntityRef::Executable(executable.id),
                        "stopped",
                        AuditLevel::Info,
                        None,
                    );
                    self.notify(EventKind::ExecutableStopped, executable, None);
                }
            }
            _ => {}
        }
    }

    /// Checked transition; an illegal one is reported and ignored.
    fn move_to(&self, executable: &mut Executable, next: ExecutableState) -> bool {
        match executable.transition(next) {
            Ok(()) => true,
            Err(err) => {
                self.reporter.audit(
                    EntityRef::Executable(executable.id),
                    "illegal_transition",
                    AuditLevel::Error,
                    Some(err.to_string()),
                );
                false
            }
        }
    }

    fn notify(&self, kind: EventKind, executable: &Executable, detail: Option<String>) {
        self.reporter.notify(&LifecycleEvent {
            kind,
            entity: EntityRef::Executable(executable.id),
            recipients: executable.owner.iter().cloned().collect(),
            detail,
        });
    }

    /// Create executables for reservations entering their start lead and
    /// hand running executables over to replacing reservations.
    ///
    /// A replacement is only taken over once it enters its own start lead.
    /// Until then the replaced reservation is gone, so the old executable is
    /// stopped and a fresh one is created at the new start.
    fn materialize(
        &self,
        flights: &mut Flights,
        now: DateTime<Utc>,
        report: &mut AdvanceReport,
    ) -> Result<(), RepositoryError> {
        let realized: HashMap<_, _> = self
            .store
            .executables
            .find(&|_| true)
            .into_iter()
            .map(|e| (e.reservation_id, e))
            .collect();

        let lead = self.config.start_lead();
        let candidates = self.store.reservations.find(&|r: &Reservation| {
            is_realizable(&r.kind) && r.interval.start - lead <= now && now < r.interval.end
        });

        for node in candidates {
            if realized.contains_key(&node.id) {
                continue;
            }
            let Some(kind) = self.executable_kind(&node) else {
                continue;
            };

            let migrated = node
                .migrate_from
                .and_then(|old| realized.get(&old))
                .filter(|old| old.state.is_live() && old.kind.compatible_with(&kind))
                .cloned();
            if let Some(mut executable) = migrated {
                let resized = participant_count(&executable.kind) != participant_count(&kind);
                let mut kind = kind;
                carry_device_ids(&executable.kind, &mut kind);
                executable.kind = kind;
                executable.reservation_id = node.id;
                executable.slot = node.interval;
                report.migrated += 1;
                info!(executable_id = executable.id, reservation_id = node.id, "executable migrated");
                if resized && executable.state == ExecutableState::Started && !flights.contains_key(&executable.id) {
                    if let ExecutableKind::Room {
                        device_room_id: Some(room_id),
                        participant_count,
                        ..
                    } = &executable.kind
                    {
                        let command = DeviceCommand::ModifyRoom {
                            room_id: room_id.clone(),
                            participant_count: *participant_count,
                        };
                        self.dispatch(flights, &mut executable, Purpose::Update, command, now, report);
                    }
                }
                self.store.executables.update(&executable)?;
                continue;
            }

            let mut executable = Executable::new(node.id, node.interval, kind);
            executable.owner = self.store.requests.get(node.request_id).map(|r| r.owner);
            let executable = self.store.executables.create(executable)?;
            report.created += 1;
            debug!(
                executable_id = executable.id,
                reservation_id = node.id,
                kind = executable.kind.label(),
                "executable created"
            );
        }
        Ok(())
    }

    fn executable_kind(&self, node: &Reservation) -> Option<ExecutableKind> {
        match &node.kind {
            ReservationKind::Room {
                resource_id,
                participant_count,
                technology,
            } => Some(ExecutableKind::Room {
                resource_id: resource_id.clone(),
                participant_count: *participant_count,
                technology: *technology,
                aliases: self.aliases_below(node),
                device_room_id: None,
            }),
            ReservationKind::Recording { resource_id } => Some(ExecutableKind::RecordingFolder {
                resource_id: resource_id.clone(),
                name: format!("request-{}-recordings", node.request_id),
                folder_id: None,
            }),
            ReservationKind::Resource { resource_id, .. } => {
                let parent = self.store.reservations.get(node.parent_id?)?;
                let ReservationKind::Compartment { technology } = parent.kind else {
                    return None;
                };
                let endpoint = self.registry.get(resource_id)?;
                if !endpoint.offers(CapabilityKind::Terminal, technology) {
                    return None;
                }
                let alias = parent
                    .children
                    .iter()
                    .filter_map(|id| self.store.reservations.get(*id))
                    .filter(|sibling| matches!(sibling.kind, ReservationKind::Room { .. }))
                    .flat_map(|room| self.aliases_below(&room))
                    .find(|alias| alias.technology == technology);
                if alias.is_none() {
                    debug!(reservation_id = node.id, "no local room alias to dial, endpoint skipped");
                }
                Some(ExecutableKind::Connection {
                    endpoint_id: resource_id.clone(),
                    alias: alias?,
                    call_id: None,
                })
            }
            _ => None,
        }
    }

    fn aliases_below(&self, node: &Reservation) -> Vec<Alias> {
        node.children
            .iter()
            .filter_map(|id| self.store.reservations.get(*id))
            .flat_map(|child| match child.kind {
                ReservationKind::Alias { aliases, .. } => aliases,
                _ => Vec::new(),
            })
            .collect()
    }

    /// Handle boundaries, cancellations, retries and probes.
    fn dispatch_due(
        &self,
        flights: &mut Flights,
        now: DateTime<Utc>,
        report: &mut AdvanceReport,
    ) -> Result<(), RepositoryError> {
        let live = self
            .store
            .executables
            .find(&|e: &Executable| !e.state.is_terminal());
        for mut executable in live {
            let before = executable.clone();
            let cancelled = executable.stop_requested
                || self.store.reservations.get(executable.reservation_id).is_none();
            let ended = now >= executable.slot.end;
            let due = executable.next_attempt_at.is_none_or(|at| at <= now);
            let busy = flights.contains_key(&executable.id);

            match executable.state {
                ExecutableState::NotAllocated | ExecutableState::Allocated if cancelled || ended => {
                    self.move_to(&mut executable, ExecutableState::ToDelete);
                }
                ExecutableState::NotAllocated => self.bind(&mut executable),
                ExecutableState::Allocated if now >= executable.slot.start => {
                    if self.move_to(&mut executable, ExecutableState::Starting) {
                        self.dispatch_step(flights, &mut executable, now, report);
                    }
                }
                ExecutableState::Starting if cancelled || ended => {
                    // The answer of a dropped ticket is discarded by the worker.
                    flights.remove(&executable.id);
                    self.move_to(&mut executable, ExecutableState::ToDelete);
                }
                ExecutableState::Starting if !busy && due => {
                    self.dispatch_step(flights, &mut executable, now, report);
                }
                ExecutableState::Started if cancelled || ended => {
                    flights.remove(&executable.id);
                    if self.move_to(&mut executable, ExecutableState::Stopping) {
                        self.dispatch_step(flights, &mut executable, now, report);
                    }
                }
                ExecutableState::Started if !busy && due => {
                    match probe_command(&executable.kind) {
                        Some(command) => {
                            self.dispatch(flights, &mut executable, Purpose::Probe, command, now, report);
                        }
                        None => {
                            executable.next_attempt_at = Some(now + self.config.probe_interval());
                        }
                    }
                }
                ExecutableState::Stopping if !busy && (due || executable.deferred_delete) => {
                    self.dispatch_step(flights, &mut executable, now, report);
                }
                _ => {}
            }
            if executable != before {
                self.store.executables.update(&executable)?;
            }
        }
        Ok(())
    }

    fn bind(&self, executable: &mut Executable) {
        let connector = self
            .registry
            .get(executable.kind.resource_id())
            .and_then(|resource| resource.connector.clone())
            .filter(|name| self.pools.contains_key(name));
        match connector {
            Some(name) => {
                executable.connector = Some(name);
                self.move_to(executable, ExecutableState::Allocated);
            }
            None => debug!(
                executable_id = executable.id,
                resource_id = executable.kind.resource_id(),
                "no connector available yet"
            ),
        }
    }

    /// Dispatch the current plan step, or complete the transition when the
    /// plan is exhausted.
    fn dispatch_step(
        &self,
        flights: &mut Flights,
        executable: &mut Executable,
        now: DateTime<Utc>,
        report: &mut AdvanceReport,
    ) {
        match command_plan(executable).into_iter().nth(executable.step) {
            Some(command) => self.dispatch(flights, executable, Purpose::Transition, command, now, report),
            None => self.complete(executable, now, report),
        }
    }

    fn dispatch(
        &self,
        flights: &mut Flights,
        executable: &mut Executable,
        purpose: Purpose,
        command: DeviceCommand,
        now: DateTime<Utc>,
        report: &mut AdvanceReport,
    ) {
        let name = command.name();
        let submitted = match self.pool_for(executable) {
            Some(pool) => pool.submit(command),
            None => Err(CommandError::Dispatch {
                command: name.to_string(),
                reason: "no command pool for the bound connector".into(),
            }),
        };
        match submitted {
            Ok(ticket) => {
                debug!(executable_id = executable.id, command = name, ?purpose, "command dispatched");
                report.dispatched += 1;
                flights.insert(
                    executable.id,
                    InFlight {
                        purpose,
                        state: executable.state,
                        step: executable.step,
                        ticket,
                    },
                );
            }
            Err(err) if purpose == Purpose::Transition => {
                self.apply_failure(executable, &err, now, report);
            }
            Err(err) => {
                debug!(executable_id = executable.id, error = %err, "auxiliary command not dispatched");
                if purpose == Purpose::Probe {
                    executable.next_attempt_at = Some(now + self.config.probe_interval());
                }
            }
        }
    }

    /// Wait up to the settle timeout, applying answers and dispatching the
    /// next plan steps as they arrive.
    async fn settle(
        &self,
        flights: &mut Flights,
        now: DateTime<Utc>,
        report: &mut AdvanceReport,
    ) -> Result<(), RepositoryError> {
        let deadline = tokio::time::Instant::now() + self.config.settle_timeout();
        while !flights.is_empty() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let settled = tokio::time::timeout(
                remaining,
                join_all(flights.values_mut().map(|flight| flight.ticket.settle())),
            )
            .await
            .is_ok();
            self.harvest(flights, now, report)?;
            if !settled {
                break;
            }
        }
        if !flights.is_empty() {
            debug!(pending = flights.len(), "commands still running after settle timeout");
        }
        Ok(())
    }

    /// Remove executables in `Stopped` or `ToDelete`.
    ///
    /// One stopped early stays until its slot ends or its reservation is gone,
    /// so that it is not created again for the same reservation.
    fn collect(
        &self,
        flights: &mut Flights,
        now: DateTime<Utc>,
        report: &mut AdvanceReport,
    ) -> Result<(), RepositoryError> {
        let finished = self.store.executables.find(&|e: &Executable| {
            matches!(e.state, ExecutableState::Stopped | ExecutableState::ToDelete)
                && (now >= e.slot.end || self.store.reservations.get(e.reservation_id).is_none())
        });
        for executable in finished {
            flights.remove(&executable.id);
            self.store.executables.delete(executable.id)?;
            report.deleted.push(executable.id);
        }
        Ok(())
    }
}

fn is_realizable(kind: &ReservationKind) -> bool {
    matches!(
        kind,
        ReservationKind::Room { .. } | ReservationKind::Recording { .. } | ReservationKind::Resource { .. }
    )
}

fn participant_count(kind: &ExecutableKind) -> Option<u32> {
    match kind {
        ExecutableKind::Room {
            participant_count, ..
        } => Some(*participant_count),
        _ => None,
    }
}

fn carry_device_ids(from: &ExecutableKind, into: &mut ExecutableKind) {
    match (from, into) {
        (ExecutableKind::Room { device_room_id: old, .. }, ExecutableKind::Room { device_room_id, .. }) => {
            device_room_id.clone_from(old);
        }
        (ExecutableKind::Connection { call_id: old, .. }, ExecutableKind::Connection { call_id, .. }) => {
            call_id.clone_from(old);
        }
        (
            ExecutableKind::RecordingFolder { folder_id: old, .. },
            ExecutableKind::RecordingFolder { folder_id, .. },
        ) => folder_id.clone_from(old),
        _ => {}
    }
}

/// Commands of the current transition.
///
/// Stop plans skip device objects that were never created.
fn command_plan(executable: &Executable) -> Vec<DeviceCommand> {
    let starting = match executable.state {
        ExecutableState::Starting => true,
        ExecutableState::Stopping => false,
        _ => return Vec::new(),
    };
    match &executable.kind {
        ExecutableKind::Room {
            participant_count,
            technology,
            aliases,
            device_room_id,
            ..
        } => {
            if starting {
                vec![DeviceCommand::CreateRoom {
                    name: format!("reservation-{}", executable.reservation_id),
                    participant_count: *participant_count,
                    technology: *technology,
                    aliases: aliases.clone(),
                }]
            } else {
                device_room_id
                    .iter()
                    .map(|room_id| DeviceCommand::DeleteRoom {
                        room_id: room_id.clone(),
                    })
                    .collect()
            }
        }
        ExecutableKind::Connection { alias, call_id, .. } => {
            if starting {
                vec![DeviceCommand::Dial {
                    alias: alias.clone(),
                }]
            } else {
                call_id
                    .iter()
                    .map(|call_id| DeviceCommand::HangUp {
                        call_id: call_id.clone(),
                    })
                    .collect()
            }
        }
        ExecutableKind::RecordingFolder {
            name, folder_id, ..
        } => match (starting, folder_id) {
            (true, _) => vec![DeviceCommand::CreateRecordingFolder { name: name.clone() }],
            (false, Some(folder_id)) => vec![
                DeviceCommand::IsRecordingFolderIdle {
                    folder_id: folder_id.clone(),
                },
                DeviceCommand::DeleteRecordingFolder {
                    folder_id: folder_id.clone(),
                },
            ],
            (false, None) => Vec::new(),
        },
    }
}

fn probe_command(kind: &ExecutableKind) -> Option<DeviceCommand> {
    match kind {
        ExecutableKind::Room {
            device_room_id: Some(room_id),
            ..
        } => Some(DeviceCommand::GetRoom {
            room_id: room_id.clone(),
        }),
        ExecutableKind::Connection {
            call_id: Some(call_id),
            ..
        } => Some(DeviceCommand::GetCall {
            call_id: call_id.clone(),
        }),
        _ => None,
    }
}

/// Whether `command` is a runtime control command aimed at `kind`'s device object.
fn targets(kind: &ExecutableKind, command: &DeviceCommand) -> bool {
    match (kind, command) {
        (
            ExecutableKind::Room {
                device_room_id: Some(own),
                ..
            },
            DeviceCommand::MuteParticipant { room_id, .. }
            | DeviceCommand::UnmuteParticipant { room_id, .. },
        ) => own == room_id,
        (
            ExecutableKind::RecordingFolder {
                folder_id: Some(own),
                ..
            },
            DeviceCommand::StartRecording { folder_id, .. }
            | DeviceCommand::ListRecordings { folder_id },
        ) => own == folder_id,
        (ExecutableKind::RecordingFolder { .. }, DeviceCommand::StopRecording { .. }) => true,
        _ => false,
    }
}
