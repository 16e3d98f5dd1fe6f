//! Shared fixtures for the integration tests: a scripted device connector, a
//! scripted foreign domain client and a small resource catalogue.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use prometheus_reservations::config::{CommandPoolConfig, ExecutorConfig};
use prometheus_reservations::core::{
    AuditEvent, Capability, Capacity, CommandError, CommandOutcome, CommandPool, CommandResponse,
    Connector, DeviceCommand, EntityRef, Executor, ForeignDomain, ForeignDomainClient,
    ForeignDomainError, InMemoryAuditSink, RemoteAllocation, RemoteBookingRequest, Reporter,
    Resource, ResourceRegistry, Scheduler, Store, ValueSequence,
};
use prometheus_reservations::util::{init_tracing_with_default, AliasType, Technology, TimeInterval};

pub const CONNECTOR: &str = "mcu-connector";

/// 2026-03-02 at `hour:minute` UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
}

pub fn interval(start: (u32, u32), end: (u32, u32)) -> TimeInterval {
    TimeInterval::new(at(start.0, start.1), at(end.0, end.1)).unwrap()
}

/// Multipoint unit hosting up to ten H.323 participants with `95{value}` numbers.
pub fn mcu() -> Resource {
    Resource::new("mcu", Capacity::Limited(10))
        .with_connector(CONNECTOR)
        .with_capability(Capability::Room {
            technologies: vec![Technology::H323],
        })
        .with_capability(Capability::ValueProvider {
            pattern: "95{value}".into(),
            sequence: ValueSequence::Digits { width: 2, start: 1 },
        })
        .with_capability(Capability::Alias {
            technology: Technology::H323,
            alias_type: AliasType::E164,
            template: "+420{value}".into(),
            provider: None,
        })
}

pub fn recorder() -> Resource {
    Resource::new("recorder", Capacity::Limited(2))
        .with_connector(CONNECTOR)
        .with_capability(Capability::Recording {
            technologies: vec![Technology::H323],
        })
}

pub fn endpoint(id: &str) -> Resource {
    Resource::new(id, Capacity::Exclusive)
        .with_connector(CONNECTOR)
        .with_capability(Capability::Terminal {
            technologies: vec![Technology::H323],
        })
}

pub fn registry() -> Arc<ResourceRegistry> {
    let registry = ResourceRegistry::new();
    for resource in [mcu(), recorder(), endpoint("ep-1"), endpoint("ep-2")] {
        registry.register(resource).unwrap();
    }
    Arc::new(registry)
}

/// Shared audit sink plus a reporter writing into it.
pub fn audited() -> (Arc<Mutex<InMemoryAuditSink>>, Reporter) {
    let sink = Arc::new(Mutex::new(InMemoryAuditSink::new(256)));
    let reporter = Reporter::new().with_audit(Box::new(Arc::clone(&sink)));
    (sink, reporter)
}

pub fn actions(sink: &Arc<Mutex<InMemoryAuditSink>>, entity: &EntityRef) -> Vec<String> {
    sink.lock()
        .events_for(entity)
        .into_iter()
        .map(|event: AuditEvent| event.action)
        .collect()
}

/// Connector answering from per-command scripts, with sensible defaults.
pub struct ScriptedConnector {
    name: String,
    log: Mutex<Vec<DeviceCommand>>,
    scripts: Mutex<HashMap<&'static str, VecDeque<CommandOutcome>>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            name: CONNECTOR.to_string(),
            log: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
        })
    }

    /// Answer the next `command` with `outcome`.
    pub fn script(&self, command: &'static str, outcome: CommandOutcome) {
        self.scripts
            .lock()
            .entry(command)
            .or_default()
            .push_back(outcome);
    }

    pub fn log(&self) -> Vec<DeviceCommand> {
        self.log.lock().clone()
    }

    pub fn commands(&self) -> Vec<&'static str> {
        self.log.lock().iter().map(DeviceCommand::name).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().into_iter().filter(|c| *c == command).count()
    }

    fn default_answer(command: &DeviceCommand) -> CommandResponse {
        match command {
            DeviceCommand::CreateRoom { .. } => CommandResponse::RoomCreated {
                room_id: "room-1".into(),
            },
            DeviceCommand::Dial { .. } => CommandResponse::CallEstablished {
                call_id: "call-1".into(),
            },
            DeviceCommand::CreateRecordingFolder { .. } => CommandResponse::FolderCreated {
                folder_id: "folder-1".into(),
            },
            DeviceCommand::IsRecordingFolderIdle { .. } => CommandResponse::Idle { idle: true },
            DeviceCommand::GetRoom { .. } | DeviceCommand::GetCall { .. } => {
                CommandResponse::SessionActive { active: true }
            }
            DeviceCommand::StartRecording { .. } => CommandResponse::RecordingStarted {
                recording_id: "recording-1".into(),
            },
            DeviceCommand::ListRecordings { .. } => CommandResponse::Recordings {
                recording_ids: Vec::new(),
            },
            _ => CommandResponse::Done,
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, command: DeviceCommand) -> Result<CommandResponse, CommandError> {
        let name = command.name();
        self.log.lock().push(command.clone());
        let scripted = self
            .scripts
            .lock()
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(Self::default_answer(&command)))
    }
}

pub fn unsupported(command: &str) -> CommandOutcome {
    Err(CommandError::Unsupported {
        command: command.to_string(),
        connector: CONNECTOR.to_string(),
    })
}

pub fn failed(command: &str) -> CommandOutcome {
    Err(CommandError::Failed {
        command: command.to_string(),
        reason: "device busy".to_string(),
    })
}

pub fn executor_config() -> ExecutorConfig {
    ExecutorConfig {
        start_lead_secs: 300,
        max_retries: 2,
        backoff_base_ms: 1_000,
        backoff_max_ms: 8_000,
        settle_timeout_ms: 2_000,
        probe_interval_secs: 30,
        ..ExecutorConfig::default()
    }
}

/// Scheduler and executor over one in-memory store.
pub struct Harness {
    pub store: Store,
    pub scheduler: Scheduler,
    pub executor: Executor,
    pub connector: Arc<ScriptedConnector>,
    pub audit: Arc<Mutex<InMemoryAuditSink>>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing_with_default("prometheus_reservations=debug");
        let store = Store::in_memory();
        let registry = registry();
        let connector = ScriptedConnector::new();
        let (audit, reporter) = audited();
        let pool = CommandPool::new(
            CommandPoolConfig::new()
                .with_worker_count(2)
                .with_command_timeout(Duration::from_secs(2)),
            connector.clone(),
        )
        .unwrap();
        let scheduler = Scheduler::new(store.clone(), Arc::clone(&registry))
            .with_reporter(reporter.clone());
        let executor = Executor::new(store.clone(), registry, executor_config())
            .with_pool(Arc::new(pool))
            .with_reporter(reporter);
        Self {
            store,
            scheduler,
            executor,
            connector,
            audit,
        }
    }
}

/// How a scripted foreign domain answers bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainBehavior {
    Accept,
    Unavailable,
    Hang,
    Fail,
}

/// Foreign domain client with per-domain behavior.
#[derive(Default)]
pub struct ScriptedDomains {
    behavior: Mutex<HashMap<String, DomainBehavior>>,
    failing_cancels: Mutex<HashSet<String>>,
    pub booked: Mutex<Vec<RemoteBookingRequest>>,
    pub cancelled: Mutex<Vec<String>>,
    counter: AtomicU64,
}

impl ScriptedDomains {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, domain: &str, behavior: DomainBehavior) {
        self.behavior.lock().insert(domain.to_string(), behavior);
    }

    pub fn fail_cancel(&self, remote_id: &str) {
        self.failing_cancels.lock().insert(remote_id.to_string());
    }

    pub fn heal_cancel(&self, remote_id: &str) {
        self.failing_cancels.lock().remove(remote_id);
    }
}

#[async_trait]
impl ForeignDomainClient for ScriptedDomains {
    async fn allocate(
        &self,
        domain: &ForeignDomain,
        request: &RemoteBookingRequest,
    ) -> Result<RemoteAllocation, ForeignDomainError> {
        let behavior = self
            .behavior
            .lock()
            .get(&domain.name)
            .copied()
            .unwrap_or(DomainBehavior::Accept);
        match behavior {
            DomainBehavior::Accept => {
                self.booked.lock().push(request.clone());
                let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
                Ok(RemoteAllocation::Allocated(format!("{}-{n}", domain.name)))
            }
            DomainBehavior::Unavailable => Ok(RemoteAllocation::Unavailable("fully booked".into())),
            DomainBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3_600)).await;
                Ok(RemoteAllocation::Unavailable("too late".into()))
            }
            DomainBehavior::Fail => Err(ForeignDomainError::new(
                domain.name.clone(),
                domain.url.clone(),
                "malformed answer",
            )),
        }
    }

    async fn cancel(&self, domain: &ForeignDomain, remote_request_id: &str) -> Result<(), ForeignDomainError> {
        if self.failing_cancels.lock().contains(remote_request_id) {
            return Err(ForeignDomainError::new(
                domain.name.clone(),
                domain.url.clone(),
                "connection refused",
            ));
        }
        self.cancelled.lock().push(remote_request_id.to_string());
        Ok(())
    }
}

pub fn domain(name: &str, timeout: Duration) -> ForeignDomain {
    ForeignDomain {
        name: name.to_string(),
        url: format!("https://{name}.example/api"),
        timeout,
    }
}
