//! Engine configuration structures.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::AppResult;

/// Environment variable naming an optional JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "PROMETHEUS_RESERVATIONS_CONFIG";

/// Prefix of individual environment overrides.
pub const ENV_PREFIX: &str = "PROMETHEUS_RESERVATIONS_";

/// Order in which scheduling candidates are tried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateRanking {
    /// Priority descending, then resource id.
    #[default]
    Priority,
    /// Peak utilization in the interval ascending, then priority, then id.
    LeastUtilized,
}

impl std::str::FromStr for CandidateRanking {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" => Ok(Self::Priority),
            "least_utilized" => Ok(Self::LeastUtilized),
            other => Err(format!("unknown candidate ranking `{other}`")),
        }
    }
}

/// Scheduler loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Candidate ranking strategy.
    pub ranking: CandidateRanking,
    /// Period of the scheduler loop in milliseconds.
    pub pass_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ranking: CandidateRanking::Priority,
            pass_interval_ms: 1_000,
        }
    }
}

/// Executor loop and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Period of the executor loop in milliseconds.
    pub pass_interval_ms: u64,
    /// How long before its start an executable is created, in seconds.
    pub start_lead_secs: i64,
    /// Retries of a failing command before the transition fails.
    pub max_retries: u32,
    /// Backoff after the first failure in milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff cap in milliseconds.
    pub backoff_max_ms: u64,
    /// How long one pass waits for dispatched commands, in milliseconds.
    pub settle_timeout_ms: u64,
    /// Period between session probes of a running executable, in seconds.
    pub probe_interval_secs: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pass_interval_ms: 1_000,
            start_lead_secs: 60,
            max_retries: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            settle_timeout_ms: 5_000,
            probe_interval_secs: 30,
        }
    }
}

impl ExecutorConfig {
    /// Exponential backoff before retry number `retry` (1-based), capped.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> chrono::Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let delay = self
            .backoff_base_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.backoff_max_ms);
        chrono::Duration::milliseconds(i64::try_from(delay).unwrap_or(i64::MAX))
    }

    /// Settle wait as a std duration.
    #[must_use]
    pub const fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }

    /// Start lead as a chrono duration.
    #[must_use]
    pub fn start_lead(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.start_lead_secs)
    }

    /// Probe interval as a chrono duration.
    #[must_use]
    pub fn probe_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.probe_interval_secs)
    }

    /// Validate executor settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.pass_interval_ms == 0 {
            return Err("pass_interval_ms must be greater than 0".into());
        }
        if self.start_lead_secs < 0 {
            return Err("start_lead_secs must not be negative".into());
        }
        if self.backoff_base_ms == 0 || self.backoff_max_ms < self.backoff_base_ms {
            return Err("backoff_max_ms must be at least backoff_base_ms > 0".into());
        }
        if self.probe_interval_secs <= 0 {
            return Err("probe_interval_secs must be greater than 0".into());
        }
        Ok(())
    }
}

/// Per-connector command pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandPoolConfig {
    /// Worker threads per connector.
    pub worker_count: usize,
    /// Commands queued before submission is rejected.
    pub max_queue_depth: usize,
    /// Bound on a single command in milliseconds.
    pub command_timeout_ms: u64,
    /// Stack size of worker threads in bytes.
    pub thread_stack_size: usize,
}

impl Default for CommandPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().clamp(1, 4),
            max_queue_depth: 256,
            command_timeout_ms: 30_000,
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl CommandPoolConfig {
    /// Defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker count.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the queue depth.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }

    /// Set the per-command timeout.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Per-command timeout.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Validate pool settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.command_timeout_ms == 0 {
            return Err("command_timeout_ms must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }
}

/// A cooperating foreign domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Domain identity.
    pub name: String,
    /// Administrative API address.
    pub url: String,
    /// Bound on each call in milliseconds.
    #[serde(default = "default_domain_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_domain_timeout_ms() -> u64 {
    10_000
}

/// Root engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Executor settings.
    pub executor: ExecutorConfig,
    /// Command pool settings applied to every connector.
    pub commands: CommandPoolConfig,
    /// Foreign domains in delegation order.
    pub domains: Vec<DomainConfig>,
}

impl EngineConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        if self.scheduler.pass_interval_ms == 0 {
            return Err("scheduler.pass_interval_ms must be greater than 0".into());
        }
        self.executor
            .validate()
            .map_err(|e| format!("executor invalid: {e}"))?;
        self.commands
            .validate()
            .map_err(|e| format!("commands invalid: {e}"))?;
        let mut seen = std::collections::HashSet::new();
        for domain in &self.domains {
            if domain.name.trim().is_empty() || domain.url.trim().is_empty() {
                return Err("domain name and url must not be empty".into());
            }
            if domain.timeout_ms == 0 {
                return Err(format!("domain `{}` timeout_ms must be greater than 0", domain.name));
            }
            if !seen.insert(domain.name.as_str()) {
                return Err(format!("domain `{}` is defined twice", domain.name));
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `PROMETHEUS_RESERVATIONS_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), String> {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, String> {
            raw.trim()
                .parse()
                .map_err(|_| format!("{ENV_PREFIX}{key} has invalid value `{raw}`"))
        }
        let get = |key: &str| lookup(&format!("{ENV_PREFIX}{key}"));

        if let Some(raw) = get("RANKING") {
            self.scheduler.ranking = raw.parse()?;
        }
        if let Some(raw) = get("SCHEDULER_INTERVAL_MS") {
            self.scheduler.pass_interval_ms = parse("SCHEDULER_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = get("EXECUTOR_INTERVAL_MS") {
            self.executor.pass_interval_ms = parse("EXECUTOR_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = get("MAX_RETRIES") {
            self.executor.max_retries = parse("MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = get("WORKER_COUNT") {
            self.commands.worker_count = parse("WORKER_COUNT", &raw)?;
        }
        if let Some(raw) = get("COMMAND_TIMEOUT_MS") {
            self.commands.command_timeout_ms = parse("COMMAND_TIMEOUT_MS", &raw)?;
        }
        Ok(())
    }

    /// Load configuration: `.env`, then the optional JSON file, then overrides.
    ///
    /// # Errors
    ///
    /// Unreadable or invalid files and malformed overrides.
    pub fn load() -> AppResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        let mut cfg = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading configuration file {path}"))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing configuration file {path}"))?
            }
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())
            .map_err(anyhow::Error::msg)?;
        cfg.validate().map_err(anyhow::Error::msg)?;
        info!(
            domains = cfg.domains.len(),
            workers = cfg.commands.worker_count,
            ranking = ?cfg.scheduler.ranking,
            "engine configuration loaded"
        );
        Ok(cfg)
    }
}
