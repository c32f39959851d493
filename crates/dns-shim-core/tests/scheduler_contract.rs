//! Contract Test: Trigger Scheduler
//!
//! These tests run the scheduler against in-memory collaborators with short
//! real-time windows.
//!
//! Constraints verified:
//! - A full pass runs before any trigger fires
//! - Bursts of events for one workload collapse into one incremental pass
//! - Batch windows flush even while events keep arriving
//! - Only allow-listed actions mark a workload as changed
//! - A broken event stream is re-subscribed
//! - Shutdown is prompt and drops pending work, even during the startup pass
//!
//! If these tests fail, someone has added:
//! - Tasks that ignore the stop flag
//! - A listener that blocks on a running pass
//! - Per-event passes instead of windowed ones

mod common;

use common::*;
use dns_shim_core::traits::WorkloadAction;
use dns_shim_core::{Scheduler, TriggerConfig, TriggerMode, WindowPolicy};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

fn event_config(window: WindowPolicy, window_ms: u64) -> TriggerConfig {
    TriggerConfig {
        mode: TriggerMode::Events,
        interval_secs: 3_600,
        window,
        window_ms,
        safety_net_secs: 3_600,
        reconnect_backoff_secs: 0,
        shutdown_grace_secs: 2,
        ..TriggerConfig::default()
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<dns_shim_core::Result<()>>,
}

impl Running {
    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("scheduler should stop within 5 seconds")
            .unwrap();
        assert!(result.is_ok(), "scheduler should stop cleanly: {:?}", result);
    }
}

fn spawn(h: &Harness, inventory: &std::sync::Arc<MockInventory>, config: TriggerConfig) -> Running {
    let (shutdown, rx) = watch::channel(false);
    let scheduler = Scheduler::new(h.reconciler.clone(), inventory.clone(), config);
    let handle = tokio::spawn(scheduler.run(rx));
    Running { shutdown, handle }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn startup_runs_a_full_pass() {
    let h = Harness::new(300).await;
    let inventory = MockInventory::new();
    inventory.start(workload("c1", &[("a.lan", "10.0.0.5")]));

    let config = TriggerConfig {
        interval_secs: 3_600,
        ..TriggerConfig::default()
    };
    let running = spawn(&h, &inventory, config);
    settle().await;

    assert!(h.directory.holds(&record("a.lan", "10.0.0.5")));
    assert_eq!(inventory.subscribe_count(), 0, "interval mode must not subscribe");

    running.stop().await;
}

#[tokio::test]
async fn event_burst_is_debounced_into_one_pass() {
    let h = Harness::new(300).await;
    let inventory = MockInventory::new();
    let running = spawn(&h, &inventory, event_config(WindowPolicy::Debounce, 100));
    settle().await;

    inventory.start(workload("c1", &[("a.lan", "10.0.0.5")]));
    for action in [WorkloadAction::Create, WorkloadAction::Start, WorkloadAction::Restart] {
        inventory.emit("c1", action);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(inventory.inspect_count(), 1);
    assert!(h.directory.holds(&record("a.lan", "10.0.0.5")));

    running.stop().await;
}

#[tokio::test]
async fn debounce_waits_for_quiet() {
    let h = Harness::new(300).await;
    let inventory = MockInventory::new();
    let running = spawn(&h, &inventory, event_config(WindowPolicy::Debounce, 150));
    settle().await;

    inventory.start(workload("c1", &[("a.lan", "10.0.0.5")]));
    for _ in 0..10 {
        inventory.emit("c1", WorkloadAction::Start);
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    assert_eq!(inventory.inspect_count(), 0, "no flush while events keep coming");

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(inventory.inspect_count(), 1);

    running.stop().await;
}

#[tokio::test]
async fn batch_flushes_during_a_steady_stream() {
    let h = Harness::new(300).await;
    let inventory = MockInventory::new();
    let running = spawn(&h, &inventory, event_config(WindowPolicy::Batch, 100));
    settle().await;

    inventory.start(workload("c1", &[("a.lan", "10.0.0.5")]));
    for _ in 0..15 {
        inventory.emit("c1", WorkloadAction::Start);
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    assert!(
        inventory.inspect_count() >= 2,
        "batch mode should flush on its own clock, got {}",
        inventory.inspect_count()
    );
    assert!(h.directory.holds(&record("a.lan", "10.0.0.5")));

    running.stop().await;
}

#[tokio::test]
async fn actions_outside_the_allow_list_are_ignored() {
    let h = Harness::new(300).await;
    let inventory = MockInventory::new();
    let config = TriggerConfig {
        actions: vec![WorkloadAction::Start],
        ..event_config(WindowPolicy::Debounce, 50)
    };
    let running = spawn(&h, &inventory, config);
    settle().await;

    inventory.start(workload("c1", &[("a.lan", "10.0.0.5")]));
    inventory.emit("c1", WorkloadAction::Pause);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(inventory.inspect_count(), 0);

    inventory.emit("c1", WorkloadAction::Start);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(inventory.inspect_count(), 1);

    running.stop().await;
}

#[tokio::test]
async fn broken_stream_is_resubscribed() {
    let h = Harness::new(300).await;
    let inventory = MockInventory::new();
    let running = spawn(&h, &inventory, event_config(WindowPolicy::Debounce, 50));
    settle().await;
    assert_eq!(inventory.subscribe_count(), 1);

    inventory.break_stream();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(inventory.subscribe_count(), 2);

    // Events flow again on the new subscription
    inventory.start(workload("c1", &[("a.lan", "10.0.0.5")]));
    inventory.emit("c1", WorkloadAction::Start);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.directory.holds(&record("a.lan", "10.0.0.5")));

    running.stop().await;
}

#[tokio::test]
async fn shutdown_discards_pending_workloads() {
    let h = Harness::new(300).await;
    let inventory = MockInventory::new();
    let running = spawn(&h, &inventory, event_config(WindowPolicy::Debounce, 10_000));
    settle().await;

    inventory.start(workload("c1", &[("a.lan", "10.0.0.5")]));
    inventory.emit("c1", WorkloadAction::Start);
    settle().await;

    running.stop().await;

    assert_eq!(inventory.inspect_count(), 0);
    assert!(!h.directory.holds(&record("a.lan", "10.0.0.5")));
}

#[tokio::test]
async fn dropping_the_stop_sender_stops_the_scheduler() {
    let h = Harness::new(300).await;
    let inventory = MockInventory::new();
    let Running { shutdown, handle } = spawn(&h, &inventory, event_config(WindowPolicy::Batch, 50));
    settle().await;

    drop(shutdown);

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler should stop within 5 seconds")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn raised_flag_before_start_skips_everything() {
    let h = Harness::new(300).await;
    let inventory = MockInventory::new();
    inventory.start(workload("c1", &[("a.lan", "10.0.0.5")]));

    let (_shutdown, rx) = watch::channel(true);
    let scheduler = Scheduler::new(h.reconciler.clone(), inventory.clone(), TriggerConfig::default());
    scheduler.run(rx).await.unwrap();

    assert!(h.directory.calls().is_empty());
}

#[tokio::test]
async fn stop_during_a_hung_startup_pass_is_prompt() {
    let h = Harness::new(300).await;
    h.directory.set_listing_hangs(true);
    let inventory = MockInventory::new();
    inventory.start(workload("c1", &[("a.lan", "10.0.0.5")]));

    let (shutdown, rx) = watch::channel(false);
    let scheduler = Scheduler::new(h.reconciler.clone(), inventory.clone(), TriggerConfig::default());
    let handle = tokio::spawn(scheduler.run(rx));
    settle().await;

    shutdown.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("scheduler should not wait for the hung pass")
        .unwrap();

    assert!(result.is_ok());
    assert!(h.directory.calls().is_empty());
    assert_eq!(h.store.persist_count(), 0);
}
