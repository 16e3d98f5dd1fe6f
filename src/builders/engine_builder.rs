//! Assemble an [`Engine`] from configuration and collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::EngineConfig;
use crate::core::{
    Authorization, CommandPool, Connector, EngineError, Executor, Federation, ForeignDomain,
    ForeignDomainClient, ResourceRegistry, Reporter, Scheduler, Store,
};
use crate::infra::InMemoryAcl;
use crate::runtime::{spawn_control_loops, ControlHandle, ReservationService, Spawn};

/// Builder collecting everything an engine needs.
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Store>,
    registry: Arc<ResourceRegistry>,
    connectors: Vec<Arc<dyn Connector>>,
    foreign_client: Option<Arc<dyn ForeignDomainClient>>,
    authorization: Option<Arc<dyn Authorization>>,
    reporter: Reporter,
}

impl EngineBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            registry: Arc::new(ResourceRegistry::new()),
            connectors: Vec::new(),
            foreign_client: None,
            authorization: None,
            reporter: Reporter::new(),
        }
    }

    /// Configuration being built.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Use `store` instead of in-memory repositories.
    #[must_use]
    pub fn with_store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a prepared resource registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ResourceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Add a device connector; it gets its own command pool.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connectors.push(connector);
        self
    }

    /// Client used to talk to the configured foreign domains.
    #[must_use]
    pub fn with_foreign_client(mut self, client: Arc<dyn ForeignDomainClient>) -> Self {
        self.foreign_client = Some(client);
        self
    }

    /// Permission check used by the service layer.
    #[must_use]
    pub fn with_authorization(mut self, authorization: Arc<dyn Authorization>) -> Self {
        self.authorization = Some(authorization);
        self
    }

    /// Audit and notification handle shared by scheduler and executor.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Validate the configuration, start one command pool per connector and
    /// wire scheduler, executor and service together.
    ///
    /// # Errors
    ///
    /// `EngineError::Config` for invalid configuration, duplicate connector
    /// names or domains without a client; `EngineError::Pool` when a pool
    /// cannot start.
    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate().map_err(EngineError::Config)?;
        let store = self.store.unwrap_or_else(Store::in_memory);

        let federation = match (self.foreign_client, self.config.domains.is_empty()) {
            (_, true) => Federation::disabled(),
            (Some(client), false) => Federation::new(
                self.config.domains.iter().map(ForeignDomain::from).collect(),
                client,
            ),
            (None, false) => {
                return Err(EngineError::Config(
                    "foreign domains configured without a domain client".into(),
                ))
            }
        };

        let scheduler = Scheduler::new(store.clone(), Arc::clone(&self.registry))
            .with_ranking(self.config.scheduler.ranking)
            .with_federation(federation)
            .with_reporter(self.reporter.clone());

        let mut pools: HashMap<String, Arc<CommandPool>> = HashMap::new();
        for connector in self.connectors {
            let name = connector.name().to_string();
            if pools.contains_key(&name) {
                return Err(EngineError::Config(format!("connector `{name}` registered twice")));
            }
            let pool = CommandPool::new(self.config.commands.clone(), connector)?;
            pools.insert(name, Arc::new(pool));
        }
        let mut executor = Executor::new(store, Arc::clone(&self.registry), self.config.executor.clone())
            .with_reporter(self.reporter);
        for pool in pools.into_values() {
            executor = executor.with_pool(pool);
        }

        let authorization = self
            .authorization
            .unwrap_or_else(|| Arc::new(InMemoryAcl::new()));

        info!(
            connectors = executor.pools().len(),
            domains = self.config.domains.len(),
            "engine built"
        );
        Ok(Engine {
            scheduler: Arc::new(scheduler),
            executor: Arc::new(executor),
            authorization,
            config: self.config,
        })
    }
}

/// Scheduler, executor and service sharing one store.
pub struct Engine {
    scheduler: Arc<Scheduler>,
    executor: Arc<Executor>,
    authorization: Arc<dyn Authorization>,
    config: EngineConfig,
}

impl Engine {
    /// Scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Executor.
    #[must_use]
    pub const fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Shared store.
    #[must_use]
    pub fn store(&self) -> &Store {
        self.scheduler.store()
    }

    /// Resource registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        self.scheduler.registry()
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Permission-gated service over this engine.
    #[must_use]
    pub fn service(&self) -> ReservationService {
        ReservationService::new(
            Arc::clone(&self.scheduler),
            Arc::clone(&self.executor),
            Arc::clone(&self.authorization),
        )
    }

    /// Start the periodic scheduler and executor loops.
    pub fn start<S: Spawn>(&self, spawner: &S) -> ControlHandle {
        spawn_control_loops(
            spawner,
            Arc::clone(&self.scheduler),
            Arc::clone(&self.executor),
            Duration::from_millis(self.config.scheduler.pass_interval_ms),
            Duration::from_millis(self.config.executor.pass_interval_ms),
        )
    }

    /// Stop every command pool.
    pub fn shutdown(&self) {
        self.executor.shutdown();
    }
}
