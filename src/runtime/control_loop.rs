//! Periodic scheduler and executor loops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::core::{Executor, Scheduler};
use crate::runtime::tokio_spawner::Spawn;
use crate::util;

/// Stops the loops started by [`spawn_control_loops`] when told to or dropped.
pub struct ControlHandle {
    shutdown: watch::Sender<bool>,
}

impl ControlHandle {
    /// Signal every loop to stop after its current pass.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Whether a stop was signalled.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the scheduler loop and the executor loop on `spawner`.
pub fn spawn_control_loops<S: Spawn>(
    spawner: &S,
    scheduler: Arc<Scheduler>,
    executor: Arc<Executor>,
    scheduler_period: Duration,
    executor_period: Duration,
) -> ControlHandle {
    let (shutdown, signal) = watch::channel(false);
    spawner.spawn(scheduler_loop(scheduler, scheduler_period, signal.clone()));
    spawner.spawn(executor_loop(executor, executor_period, signal));
    info!(
        scheduler_period_ms = scheduler_period.as_millis(),
        executor_period_ms = executor_period.as_millis(),
        "control loops started"
    );
    ControlHandle { shutdown }
}

async fn scheduler_loop(
    scheduler: Arc<Scheduler>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = scheduler.run_pass(util::now()).await;
                if !report.allocated.is_empty() || !report.failed.is_empty() {
                    debug!(
                        allocated = report.allocated.len(),
                        failed = report.failed.len(),
                        "scheduler pass"
                    );
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("scheduler loop stopped");
}

async fn executor_loop(
    executor: Arc<Executor>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match executor.advance(util::now()).await {
                    Ok(report) if report.dispatched > 0 => {
                        debug!(
                            dispatched = report.dispatched,
                            started = report.started.len(),
                            stopped = report.stopped.len(),
                            failed = report.failed.len(),
                            "executor pass"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => error!(error = %err, "executor pass aborted"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("executor loop stopped");
}
