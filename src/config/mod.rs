//! Configuration models for the scheduler, executor, command pools and domains.

pub mod engine;

pub use engine::{
    CandidateRanking, CommandPoolConfig, DomainConfig, EngineConfig, ExecutorConfig,
    SchedulerConfig, CONFIG_PATH_ENV, ENV_PREFIX,
};
