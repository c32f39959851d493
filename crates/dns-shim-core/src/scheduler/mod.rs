//! Trigger scheduler
//!
//! Decides when reconciliation passes run.
//!
//! ## Tasks
//!
//! ```text
//!                 ┌───────────────┐
//!  interval ─────▶│ full passes   │──────────────┐
//!                 └───────────────┘              │
//!                                                ▼
//!  ┌──────────┐  ids  ┌──────────┐  batch   ┌────────────┐
//!  │ listener │──────▶│ drainer  │─────────▶│ Reconciler │
//!  └──────────┘       └──────────┘          └────────────┘
//! ```
//!
//! In interval mode only the full-pass task runs. In event mode the same
//! task runs at the longer safety-net period next to the listener and the
//! drainer. The drainer owns the pending set; the listener hands ids over an
//! unbounded channel so it never waits for a running pass.
//!
//! Every task observes the shared stop flag at its wait points. Ids still
//! pending at shutdown are dropped, the next start runs a full pass anyway.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::{TriggerConfig, TriggerMode, WindowPolicy};
use crate::engine::Reconciler;
use crate::error::{Error, Result};
use crate::traits::{WorkloadAction, WorkloadInventory};

/// Drives the reconciler from timers and workload events
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    inventory: Arc<dyn WorkloadInventory>,
    config: TriggerConfig,
}

impl Scheduler {
    /// Create a scheduler
    pub fn new(
        reconciler: Arc<Reconciler>,
        inventory: Arc<dyn WorkloadInventory>,
        config: TriggerConfig,
    ) -> Self {
        Self {
            reconciler,
            inventory,
            config,
        }
    }

    /// Run until the stop flag is raised
    ///
    /// Performs one full pass before starting the trigger tasks; a stop
    /// request abandons that pass. Dropping the sender side of `shutdown`
    /// counts as a stop request.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Invalid configuration, or a task died unexpectedly
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.config.validate()?;

        if *shutdown.borrow() {
            return Ok(());
        }

        info!("Running initial full sync");
        tokio::select! {
            _ = stopped(&mut shutdown) => {
                info!("Stop requested during initial full sync");
                return Ok(());
            }
            _ = self.reconciler.full_pass(self.inventory.as_ref()) => {}
        }

        let mut tasks = JoinSet::new();
        tasks.spawn(run_full_passes(
            self.reconciler.clone(),
            self.inventory.clone(),
            self.config.full_pass_period(),
            shutdown.clone(),
        ));

        if self.config.mode == TriggerMode::Events {
            let (tx, rx) = mpsc::unbounded_channel();
            tasks.spawn(listen(
                self.inventory.clone(),
                self.config.actions.clone(),
                self.config.reconnect_backoff(),
                tx,
                shutdown.clone(),
            ));
            tasks.spawn(drain(
                self.reconciler.clone(),
                self.inventory.clone(),
                self.config.window,
                self.config.window(),
                rx,
                shutdown.clone(),
            ));
            info!(
                "Event-driven sync enabled ({:?}, {}ms window), full sync every {}s",
                self.config.window, self.config.window_ms, self.config.safety_net_secs
            );
        } else {
            info!("Full sync every {}s", self.config.interval_secs);
        }

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                Some(joined) = tasks.join_next() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    tasks.abort_all();
                    return Err(match joined {
                        Err(e) if e.is_panic() => Error::Other(format!("Scheduler task panicked: {}", e)),
                        _ => Error::Other("Scheduler task exited unexpectedly".to_string()),
                    });
                }
            }
        }

        info!("Stopping scheduler");
        let grace = self.config.shutdown_grace();
        let joined = tokio::time::timeout(grace, async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    error!("Scheduler task panicked during shutdown: {}", e);
                }
            }
        })
        .await;

        if joined.is_err() {
            warn!("Tasks still running after {:?}, aborting them", grace);
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        Ok(())
    }
}

/// Resolves once the stop flag is raised or its sender is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn run_full_passes(
    reconciler: Arc<Reconciler>,
    inventory: Arc<dyn WorkloadInventory>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            _ = ticker.tick() => {
                reconciler.full_pass(inventory.as_ref()).await;
            }
        }
    }
    debug!("Full sync task stopped");
}

async fn listen(
    inventory: Arc<dyn WorkloadInventory>,
    actions: Vec<WorkloadAction>,
    backoff: Duration,
    tx: mpsc::UnboundedSender<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let allowed: HashSet<WorkloadAction> = actions.iter().copied().collect();

    loop {
        let mut events = inventory.subscribe(&actions);
        info!("Listening for workload events");

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => return,
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        if !allowed.contains(&event.action) {
                            continue;
                        }
                        debug!("Workload {} {}", event.workload_id, event.action);
                        if tx.send(event.workload_id).is_err() {
                            debug!("Event drainer is gone, listener exiting");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Workload event stream failed: {}", e);
                        break;
                    }
                    None => {
                        warn!("Workload event stream ended");
                        break;
                    }
                }
            }
        }

        info!("Reconnecting to workload events in {:?}", backoff);
        tokio::select! {
            _ = stopped(&mut shutdown) => return,
            _ = sleep(backoff) => {}
        }
    }
}

/// Collects changed workload ids and flushes them into incremental passes
///
/// With [`WindowPolicy::Debounce`] the flush happens once `window` has passed
/// since the latest event. With [`WindowPolicy::Batch`] it happens `window`
/// after the first event of the batch, however busy the stream is.
async fn drain(
    reconciler: Arc<Reconciler>,
    inventory: Arc<dyn WorkloadInventory>,
    policy: WindowPolicy,
    window: Duration,
    mut rx: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pending: HashSet<String> = HashSet::new();
    let mut first_event = Instant::now();
    let mut last_event = Instant::now();

    loop {
        let deadline = match policy {
            WindowPolicy::Debounce => last_event + window,
            WindowPolicy::Batch => first_event + window,
        };

        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            received = rx.recv() => match received {
                Some(id) => {
                    let now = Instant::now();
                    if pending.is_empty() {
                        first_event = now;
                    }
                    last_event = now;
                    pending.insert(id);
                }
                None => break,
            },
            _ = sleep_until(deadline), if !pending.is_empty() => {
                let batch = std::mem::take(&mut pending);
                info!("Syncing {} changed workloads", batch.len());
                reconciler.incremental_pass(inventory.as_ref(), &batch).await;
            }
        }
    }

    if !pending.is_empty() {
        debug!("Discarding {} pending workloads", pending.len());
    }
    debug!("Event drainer stopped");
}
