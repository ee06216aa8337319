//! Sync scheduling: on-demand, periodic and reconnect triggers.

use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use offsync_common::{Error, Result};

/// Why a sync cycle started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Requested by the host.
    Manual,
    /// The sync interval elapsed.
    Periodic,
    /// The network came back online.
    Reconnect,
}

/// Summary of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub tasks_retried: usize,
    pub conflicts_detected: usize,
    pub conflicts_resolved: usize,
    pub awaiting_user_choice: usize,
    /// The cycle did nothing because the network was offline.
    pub skipped_offline: bool,
    pub duration: Duration,
}

/// Commands understood by the scheduler loop.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a cycle now and report back.
    Sync {
        trigger: SyncTrigger,
        reply: oneshot::Sender<Result<CycleReport>>,
    },
    /// Re-arm the periodic trigger, or disarm it with `None`.
    SetInterval(Option<Duration>),
    Shutdown,
}

/// Front end of the scheduler loop. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SyncScheduler {
    command_tx: mpsc::Sender<SchedulerCommand>,
}

impl SyncScheduler {
    /// Create a scheduler firing every `interval` (if any) and on reconnect.
    pub fn new(interval: Option<Duration>, mut network: watch::Receiver<bool>) -> (Self, SyncSchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(100);
        let online = *network.borrow_and_update();

        let scheduler = Self { command_tx };
        let handle = SyncSchedulerHandle {
            command_rx,
            interval,
            network,
            online,
        };

        (scheduler, handle)
    }

    /// Run a cycle through the loop and wait for its report.
    pub async fn request_sync(&self, trigger: SyncTrigger) -> Result<CycleReport> {
        let (reply, response) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::Sync { trigger, reply })
            .await
            .map_err(|_| Error::InvalidState("Scheduler not running".to_string()))?;

        response
            .await
            .map_err(|_| Error::InvalidState("Failed to receive sync result".to_string()))?
    }

    /// Change the periodic interval. `None` stops periodic syncs.
    pub async fn set_interval(&self, interval: Option<Duration>) -> Result<()> {
        self.command_tx
            .send(SchedulerCommand::SetInterval(interval))
            .await
            .map_err(|_| Error::InvalidState("Scheduler not running".to_string()))
    }

    /// Ask the loop to exit after the current cycle.
    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(SchedulerCommand::Shutdown).await;
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}

/// Receiving end of the scheduler, consumed by [`SyncSchedulerHandle::run`].
pub struct SyncSchedulerHandle {
    command_rx: mpsc::Receiver<SchedulerCommand>,
    interval: Option<Duration>,
    network: watch::Receiver<bool>,
    /// Reachability when the scheduler was created.
    online: bool,
}

impl SyncSchedulerHandle {
    /// Run the scheduler loop until shutdown.
    ///
    /// Spawn this in a tokio task. `sync_fn` runs one cycle; cycles never
    /// overlap because the loop awaits each one before polling again.
    /// Periodic ticks are skipped while offline, and an offline to online
    /// transition triggers a cycle right away.
    pub async fn run<F, Fut>(self, sync_fn: F)
    where
        F: Fn(SyncTrigger) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CycleReport>> + Send,
    {
        let Self {
            mut command_rx,
            interval,
            mut network,
            mut online,
        } = self;

        let mut ticker = interval.map(periodic_ticker);
        let mut watching_network = true;

        info!("Sync scheduler started");

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(SchedulerCommand::Sync { trigger, reply }) => {
                        debug!("Processing sync request ({:?})", trigger);
                        let _ = reply.send(sync_fn(trigger).await);
                    }
                    Some(SchedulerCommand::SetInterval(interval)) => {
                        debug!("Periodic interval set to {:?}", interval);
                        ticker = interval.map(periodic_ticker);
                    }
                    Some(SchedulerCommand::Shutdown) | None => {
                        info!("Sync scheduler shutting down");
                        break;
                    }
                },

                _ = wait_for_tick(&mut ticker) => {
                    if *network.borrow() {
                        debug!("Triggering periodic sync");
                        log_cycle(SyncTrigger::Periodic, sync_fn(SyncTrigger::Periodic).await);
                    } else {
                        debug!("Offline, skipping periodic sync");
                    }
                }

                changed = network.changed(), if watching_network => {
                    if changed.is_err() {
                        // Monitor dropped; keep the last known value.
                        watching_network = false;
                    } else {
                        let now_online = *network.borrow_and_update();
                        let reconnected = now_online && !online;
                        online = now_online;
                        if reconnected {
                            info!("Network reconnected, triggering sync");
                            log_cycle(SyncTrigger::Reconnect, sync_fn(SyncTrigger::Reconnect).await);
                        }
                    }
                }
            }
        }
    }
}

fn periodic_ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn wait_for_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn log_cycle(trigger: SyncTrigger, result: Result<CycleReport>) {
    match result {
        Ok(report) => info!(
            "{:?} sync completed: {} completed, {} retried, {} failed, {} conflicts",
            trigger,
            report.tasks_completed,
            report.tasks_retried,
            report.tasks_failed,
            report.conflicts_detected
        ),
        Err(e) => error!("{:?} sync failed: {}", trigger, e),
    }
}
