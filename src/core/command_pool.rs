//! Per-connector command queue served by dedicated OS threads.
//!
//! Each worker thread owns a single-threaded tokio runtime and blocks on a
//! bounded crossbeam channel, so slow device I/O never stalls the scheduling
//! runtime. Responses travel back through a oneshot channel held by a
//! [`CommandTicket`]. Dropping the ticket is cooperative cancellation: the
//! command still runs to completion and its late result is discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::CommandPoolConfig;
use crate::core::connector::{CommandResponse, Connector, DeviceCommand};
use crate::core::{CommandError, PoolError};

/// Result of one device command.
pub type CommandOutcome = Result<CommandResponse, CommandError>;

/// A command waiting in the queue.
struct CommandJob {
    id: u64,
    command: DeviceCommand,
    reply: oneshot::Sender<CommandOutcome>,
}

/// Handle to the response of a submitted command.
#[derive(Debug)]
pub struct CommandTicket {
    id: u64,
    command: &'static str,
    rx: oneshot::Receiver<CommandOutcome>,
    outcome: Option<CommandOutcome>,
}

impl CommandTicket {
    /// Pool-local command id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Protocol name of the command.
    #[must_use]
    pub const fn command(&self) -> &'static str {
        self.command
    }

    /// Take the outcome if the command has finished, without waiting.
    pub fn try_take(&mut self) -> Option<CommandOutcome> {
        if self.outcome.is_none() {
            match self.rx.try_recv() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.outcome = Some(Err(self.worker_gone()));
                }
            }
        }
        self.outcome.take()
    }

    /// Wait until the command finished. The outcome stays in the ticket.
    pub async fn settle(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let outcome = match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(self.worker_gone()),
        };
        self.outcome = Some(outcome);
    }

    /// Wait for the outcome.
    pub async fn wait(mut self) -> CommandOutcome {
        self.settle().await;
        self.outcome.take().unwrap_or_else(|| Err(self.worker_gone()))
    }

    fn worker_gone(&self) -> CommandError {
        CommandError::Dispatch {
            command: self.command.to_string(),
            reason: "command worker dropped the reply".into(),
        }
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandPoolStats {
    /// Worker threads.
    pub worker_count: usize,
    /// Commands accepted.
    pub submitted: u64,
    /// Commands waiting in the queue.
    pub queued: u64,
    /// Commands executing.
    pub active: u64,
    /// Commands that returned a response.
    pub completed: u64,
    /// Commands that returned an error (timeouts included).
    pub failed: u64,
    /// Commands that hit the command timeout.
    pub timed_out: u64,
    /// Results nobody was waiting for any more.
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    queued: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    discarded: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, worker_count: usize) -> CommandPoolStats {
        CommandPoolStats {
            worker_count,
            submitted: self.submitted.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Command queue and worker threads for one connector.
pub struct CommandPool {
    name: String,
    config: CommandPoolConfig,
    job_tx: Mutex<Option<Sender<CommandJob>>>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl CommandPool {
    /// Spawn `config.worker_count` workers serving `connector`.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` for a rejected configuration,
    /// `PoolError::Spawn` when a worker thread cannot be started.
    pub fn new(config: CommandPoolConfig, connector: Arc<dyn Connector>) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let name = connector.name().to_string();
        let (job_tx, job_rx) = bounded::<CommandJob>(config.max_queue_depth);
        let counters = Arc::new(PoolCounters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let worker = spawn_worker(
                &name,
                worker_id,
                job_rx.clone(),
                Arc::clone(&connector),
                Arc::clone(&counters),
                Arc::clone(&shutdown),
                &config,
            );
            match worker {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    shutdown.store(true, Ordering::Release);
                    drop(job_tx);
                    return Err(PoolError::Spawn(err));
                }
            }
        }

        info!(
            connector = %name,
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            command_timeout_ms = config.command_timeout_ms,
            "command pool started"
        );

        Ok(Self {
            name,
            config,
            job_tx: Mutex::new(Some(job_tx)),
            counters,
            shutdown,
            workers: Mutex::new(workers),
            next_id: AtomicU64::new(1),
        })
    }

    /// Connector served by this pool.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-command timeout.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        self.config.command_timeout()
    }

    /// Queue a command without blocking.
    ///
    /// # Errors
    ///
    /// `CommandError::Dispatch` when the queue is full or the pool is shut down.
    pub fn submit(&self, command: DeviceCommand) -> Result<CommandTicket, CommandError> {
        let name = command.name();
        let rejected = |reason: &str| CommandError::Dispatch {
            command: name.to_string(),
            reason: reason.to_string(),
        };
        if self.shutdown.load(Ordering::Acquire) {
            return Err(rejected("command pool is shut down"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        let job = CommandJob { id, command, reply };

        let guard = self.job_tx.lock();
        let Some(job_tx) = guard.as_ref() else {
            return Err(rejected("command pool is shut down"));
        };
        match job_tx.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                debug!(connector = %self.name, command_id = id, command = name, "command queued");
                Ok(CommandTicket {
                    id,
                    command: name,
                    rx,
                    outcome: None,
                })
            }
            Err(crossbeam_channel::TrySendError::Full(_)) => {
                warn!(connector = %self.name, command = name, "command queue is full");
                Err(rejected("command queue is full"))
            }
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                Err(rejected("command pool is shut down"))
            }
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CommandPoolStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Stop accepting commands and join workers, detaching any that do not
    /// exit within two seconds.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(connector = %self.name, "shutting down command pool");
        *self.job_tx.lock() = None;

        let mut workers = self.workers.lock();
        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let joiner = thread::spawn(move || {
                let _ = tx.send(worker.join().is_ok());
            });
            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(true) => debug!(worker_id = idx, "command worker joined"),
                Ok(false) => warn!(worker_id = idx, "command worker panicked"),
                Err(_) => warn!(worker_id = idx, "command worker did not exit in time, detaching"),
            }
            drop(joiner);
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            *self.job_tx.lock() = None;
            debug!(connector = %self.name, "command pool dropped without shutdown, workers detached");
        }
    }
}

fn spawn_worker(
    pool: &str,
    worker_id: usize,
    job_rx: Receiver<CommandJob>,
    connector: Arc<dyn Connector>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
    config: &CommandPoolConfig,
) -> std::io::Result<JoinHandle<()>> {
    let timeout = config.command_timeout();
    let pool = pool.to_string();
    thread::Builder::new()
        .name(format!("cmd-{pool}-{worker_id}"))
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(connector = %pool, worker_id, error = %e, "failed to create worker runtime");
                    return;
                }
            };

            // recv() fails once every sender is gone, which is the shutdown signal.
            while let Ok(job) = job_rx.recv() {
                counters.queued.fetch_sub(1, Ordering::Relaxed);
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                if job.reply.is_closed() {
                    counters.discarded.fetch_add(1, Ordering::Relaxed);
                    debug!(connector = %pool, command_id = job.id, "command cancelled before start");
                    continue;
                }

                counters.active.fetch_add(1, Ordering::Relaxed);
                let name = job.command.name();
                let outcome = rt.block_on(async {
                    tokio::time::timeout(timeout, connector.execute(job.command)).await
                });
                let outcome = match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        counters.timed_out.fetch_add(1, Ordering::Relaxed);
                        Err(CommandError::Timeout {
                            command: name.to_string(),
                            after: timeout,
                        })
                    }
                };
                counters.active.fetch_sub(1, Ordering::Relaxed);
                if outcome.is_ok() {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }

                if job.reply.send(outcome).is_err() {
                    counters.discarded.fetch_add(1, Ordering::Relaxed);
                    debug!(connector = %pool, command_id = job.id, command = name, "late result discarded");
                }
            }
            debug!(connector = %pool, worker_id, "command worker exiting");
        })
}
