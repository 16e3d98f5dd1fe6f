//! Runtime adapters: spawner, control loops and the controller-facing API.

pub mod api;
pub mod control_loop;
pub mod tokio_spawner;

pub use api::{ExecutableView, RequestSubmission, RequestView, ReservationService};
pub use control_loop::{spawn_control_loops, ControlHandle};
pub use tokio_spawner::{Spawn, TokioSpawner};
