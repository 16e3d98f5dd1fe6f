//! # Prometheus Reservations
//!
//! Scheduling and execution engine for shared, time-bounded audiovisual
//! resources: virtual rooms, endpoint devices, dial-in aliases and numeric
//! identifiers.
//!
//! The engine has three cooperating parts:
//!
//! - **Scheduler**: maps a request (interval + specification) onto a
//!   conflict-free allocation, producing a typed reservation tree. Exclusive
//!   resources never overlap, limited resources never exceed their peak
//!   capacity and provider values stay unique per interval.
//! - **Executor**: turns allocated reservations into live executables by
//!   issuing idempotent commands to device connectors, with bounded
//!   exponential retries and cooperative cancellation.
//! - **Federation**: delegates what cannot be satisfied locally to cooperating
//!   foreign domains and releases it again on deletion.
//!
//! ## Allocating a room
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use prometheus_reservations::builders::EngineBuilder;
//! use prometheus_reservations::config::EngineConfig;
//! use prometheus_reservations::core::{Capability, Capacity, Resource, ReservationRequest, Specification};
//! use prometheus_reservations::util::{Technology, TimeInterval};
//!
//! let engine = EngineBuilder::new(EngineConfig::load()?)
//!     .with_connector(Arc::new(my_mcu_connector))
//!     .build()?;
//! engine.registry().register(
//!     Resource::new("mcu", Capacity::Limited(20))
//!         .with_connector("mcu")
//!         .with_capability(Capability::Room { technologies: vec![Technology::H323] }),
//! )?;
//!
//! let request = engine.scheduler().create_request(ReservationRequest::new(
//!     "alice",
//!     TimeInterval::new(start, end)?,
//!     Specification::Room {
//!         technology: Technology::H323,
//!         participant_count: 4,
//!         aliases: vec![],
//!         recorded: false,
//!     },
//! ))?;
//! let root = engine.scheduler().allocate(request.id).await?;
//!
//! // Periodic scheduler and executor passes.
//! let loops = engine.start(&TokioSpawner::current());
//! ```
//!
//! For complete flows, see the integration tests under `tests/`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling, federation and execution.
pub mod core;
/// Configuration models for scheduler, executor, command pools and domains.
pub mod config;
/// Builders to construct the engine from configuration.
pub mod builders;
/// Infrastructure adapters for repositories and access control.
pub mod infra;
/// Runtime adapters: spawner, control loops and service API.
pub mod runtime;
/// Shared utilities.
pub mod util;
