//! Contract Test: Reconciliation Algorithm
//!
//! These tests verify the diff-and-apply pass against an in-memory directory.
//!
//! Constraints verified:
//! - A converged pass makes no directory calls
//! - Stale records survive exactly one grace period
//! - Drifted records are re-created
//! - Creates are applied before deletes
//! - Records the reconciler does not own are never touched
//! - The owned set is persisted once per pass, whatever fails
//!
//! If these tests fail, someone has:
//! - Changed how ownership is gained or released
//! - Broken the reap boundary
//! - Made a failed call fatal or lossy

mod common;

use common::*;
use dns_shim_core::error::{Error, Result};
use dns_shim_core::traits::StateStore;
use dns_shim_core::{ActualRecords, MemoryStateStore, OwnedSet, Reconciler};
use std::collections::HashSet;
use std::sync::Arc;

fn owned_at(entries: &[(&str, &str, i64)]) -> OwnedSet {
    entries
        .iter()
        .map(|(n, t, secs)| (record(n, t), Some(at(*secs))))
        .collect()
}

#[tokio::test]
async fn new_address_record_is_created_and_owned() {
    let h = Harness::new(300).await;
    let a = record("a.lan", "10.0.0.5");

    let summary = h.reconcile(&records(&[("a.lan", "10.0.0.5")])).await;

    assert_eq!(h.directory.calls(), vec![DirectoryCall::CreateAddress(a.clone())]);
    assert_eq!(summary.created, 1);

    let owned = h.reconciler.owned().await;
    assert_eq!(owned.sorted_records(), vec![a.clone()]);
    assert_eq!(owned.last_seen(&a), Some(at(T0)));
}

#[tokio::test]
async fn stale_alias_is_deleted_after_grace() {
    let x = record("x.lan", "y.lan");
    let store = MemoryStateStore::with_owned(owned_at(&[("x.lan", "y.lan", T0)]));
    let h = Harness::with_store(100, store).await;
    h.directory.seed(x.clone());
    h.advance(150);

    let summary = h.reconcile(&HashSet::new()).await;

    assert_eq!(h.directory.calls(), vec![DirectoryCall::DeleteAlias(x)]);
    assert_eq!(summary.deleted, 1);
    assert!(h.reconciler.owned().await.is_empty());
    assert!(h.store.snapshot().await.is_empty());
}

#[tokio::test]
async fn second_pass_makes_no_calls() {
    let h = Harness::new(300).await;
    let desired = records(&[
        ("a.lan", "10.0.0.5"),
        ("b.lan", "10.0.0.6"),
        ("www.lan", "a.lan"),
    ]);

    h.reconcile(&desired).await;
    assert_eq!(h.directory.calls().len(), 3);
    h.directory.clear_calls();

    h.advance(10);
    let summary = h.reconcile(&desired).await;

    assert!(h.directory.calls().is_empty(), "converged pass must not call the directory");
    assert!(summary.is_noop());
}

#[tokio::test]
async fn owned_set_converges_to_desired_in_one_pass() {
    let store = MemoryStateStore::with_owned(owned_at(&[("a.lan", "10.0.0.5", T0 - 5)]));
    let h = Harness::with_store(300, store).await;
    h.directory.seed(record("a.lan", "10.0.0.5"));

    let desired = records(&[
        ("a.lan", "10.0.0.5"),
        ("b.lan", "10.0.0.6"),
        ("c.lan", "b.lan"),
    ]);
    h.reconcile(&desired).await;

    let owned: HashSet<_> = h.reconciler.owned().await.sorted_records().into_iter().collect();
    assert_eq!(owned, desired);
    for r in &desired {
        assert!(h.directory.holds(r), "{} should be published", r);
    }
}

#[tokio::test]
async fn reap_boundary_is_exclusive() {
    let store = MemoryStateStore::with_owned(owned_at(&[
        ("kept.lan", "10.0.0.1", T0 - 99),
        ("gone.lan", "10.0.0.2", T0 - 101),
    ]));
    let h = Harness::with_store(100, store).await;
    h.directory.seed(record("kept.lan", "10.0.0.1"));
    h.directory.seed(record("gone.lan", "10.0.0.2"));

    let summary = h.reconcile(&HashSet::new()).await;

    assert_eq!(
        h.directory.calls(),
        vec![DirectoryCall::DeleteAddress(record("gone.lan", "10.0.0.2"))]
    );
    assert_eq!(summary.deferred, 1);

    let owned = h.reconciler.owned().await;
    assert!(owned.contains(&record("kept.lan", "10.0.0.1")));
    assert!(!owned.contains(&record("gone.lan", "10.0.0.2")));
    // Deferral leaves the timestamp frozen
    assert_eq!(owned.last_seen(&record("kept.lan", "10.0.0.1")), Some(at(T0 - 99)));
}

#[tokio::test]
async fn brief_restart_does_not_flap() {
    let h = Harness::new(100).await;
    let desired = records(&[("svc.lan", "10.0.0.9")]);

    h.reconcile(&desired).await;
    h.directory.clear_calls();

    // Workload gone for a moment
    h.advance(30);
    h.reconcile(&HashSet::new()).await;

    // And back again
    h.advance(30);
    h.reconcile(&desired).await;

    assert!(h.directory.calls().is_empty());
    assert_eq!(
        h.reconciler.owned().await.last_seen(&record("svc.lan", "10.0.0.9")),
        Some(at(T0 + 60))
    );
}

#[tokio::test]
async fn drifted_record_is_recreated() {
    let h = Harness::new(300).await;
    let a = record("a.lan", "10.0.0.5");
    let desired = records(&[("a.lan", "10.0.0.5")]);

    h.reconcile(&desired).await;
    h.directory.remove_externally(&a);
    h.directory.clear_calls();

    let summary = h.reconcile(&desired).await;

    assert_eq!(h.directory.calls(), vec![DirectoryCall::CreateAddress(a.clone())]);
    assert_eq!(summary.created, 1);
    assert!(h.directory.holds(&a));
}

#[tokio::test]
async fn deferred_stale_record_is_not_reasserted() {
    let store = MemoryStateStore::with_owned(owned_at(&[("old.lan", "10.0.0.3", T0 - 10)]));
    let h = Harness::with_store(300, store).await;

    h.reconcile(&HashSet::new()).await;

    assert!(h.directory.calls().is_empty());
    assert!(h.reconciler.owned().await.contains(&record("old.lan", "10.0.0.3")));
}

#[tokio::test]
async fn existing_remote_record_is_taken_over_without_a_call() {
    let h = Harness::new(300).await;
    let a = record("a.lan", "10.0.0.5");
    h.directory.seed(a.clone());

    let summary = h.reconcile(&records(&[("a.lan", "10.0.0.5")])).await;

    assert!(h.directory.calls().is_empty());
    assert_eq!(summary.adopted, 1);
    assert!(h.reconciler.owned().await.contains(&a));
}

#[tokio::test]
async fn already_present_on_create_counts_as_success() {
    let h = Harness::new(300).await;
    let alias = record("www.lan", "a.lan");
    h.directory.seed(alias.clone());

    // Snapshot taken before the record appeared
    let summary = h
        .reconciler
        .reconcile(&records(&[("www.lan", "a.lan")]), &ActualRecords::default())
        .await;

    assert_eq!(h.directory.calls(), vec![DirectoryCall::CreateAlias(alias.clone())]);
    assert_eq!(summary.failed, 0);
    assert!(h.reconciler.owned().await.contains(&alias));
}

#[tokio::test]
async fn failed_create_is_retried_next_pass() {
    let h = Harness::new(300).await;
    let b = record("b.lan", "10.0.0.6");
    let desired = records(&[("a.lan", "10.0.0.5"), ("b.lan", "10.0.0.6")]);
    h.directory.fail_on(b.clone());

    let summary = h.reconcile(&desired).await;
    assert_eq!(summary.created, 1);
    assert_eq!(summary.failed, 1);
    assert!(!h.reconciler.owned().await.contains(&b));

    h.directory.heal(&b);
    h.directory.clear_calls();
    h.reconcile(&desired).await;

    assert_eq!(h.directory.calls(), vec![DirectoryCall::CreateAddress(b.clone())]);
    assert!(h.reconciler.owned().await.contains(&b));
}

#[tokio::test]
async fn failed_delete_keeps_ownership() {
    let old = record("old.lan", "10.0.0.3");
    let store = MemoryStateStore::with_owned(owned_at(&[("old.lan", "10.0.0.3", T0 - 500)]));
    let h = Harness::with_store(300, store).await;
    h.directory.seed(old.clone());
    h.directory.fail_on(old.clone());

    let summary = h.reconcile(&HashSet::new()).await;
    assert_eq!(summary.failed, 1);
    assert!(h.reconciler.owned().await.contains(&old));

    h.directory.heal(&old);
    h.reconcile(&HashSet::new()).await;
    assert!(!h.reconciler.owned().await.contains(&old));
    assert!(!h.directory.holds(&old));
}

#[tokio::test]
async fn stale_record_already_gone_is_released_without_a_call() {
    let store = MemoryStateStore::with_owned(owned_at(&[("old.lan", "10.0.0.3", T0 - 500)]));
    let h = Harness::with_store(300, store).await;

    let summary = h.reconcile(&HashSet::new()).await;

    assert!(h.directory.calls().is_empty());
    assert_eq!(summary.released, 1);
    assert!(h.reconciler.owned().await.is_empty());
}

#[tokio::test]
async fn not_found_on_delete_counts_as_success() {
    let old = record("old.lan", "gone.lan");
    let store = MemoryStateStore::with_owned(owned_at(&[("old.lan", "gone.lan", T0 - 500)]));
    let h = Harness::with_store(300, store).await;

    // Snapshot still lists the record, the directory already lost it
    let actual = ActualRecords::new(HashSet::new(), [old.clone()].into_iter().collect());
    let summary = h.reconciler.reconcile(&HashSet::new(), &actual).await;

    assert_eq!(h.directory.calls(), vec![DirectoryCall::DeleteAlias(old)]);
    assert_eq!(summary.failed, 0);
    assert!(h.reconciler.owned().await.is_empty());
}

#[tokio::test]
async fn target_change_creates_before_deleting() {
    let old = record("web.lan", "10.0.0.1");
    let new = record("web.lan", "10.0.0.2");
    let store = MemoryStateStore::with_owned(owned_at(&[("web.lan", "10.0.0.1", T0 - 500)]));
    let h = Harness::with_store(300, store).await;
    h.directory.seed(old.clone());

    h.reconcile(&records(&[("web.lan", "10.0.0.2")])).await;

    assert_eq!(
        h.directory.calls(),
        vec![
            DirectoryCall::CreateAddress(new.clone()),
            DirectoryCall::DeleteAddress(old),
        ]
    );
    assert_eq!(h.reconciler.owned().await.sorted_records(), vec![new]);
}

#[tokio::test]
async fn unowned_records_are_never_touched() {
    let h = Harness::new(0).await;
    let foreign = record("router.lan", "192.168.1.1");
    h.directory.seed(foreign.clone());

    h.advance(1_000);
    h.reconcile(&HashSet::new()).await;

    assert!(h.directory.calls().is_empty());
    assert!(h.directory.holds(&foreign));
}

#[tokio::test]
async fn state_is_persisted_once_per_pass() {
    let h = Harness::new(300).await;
    h.directory.fail_on(record("b.lan", "10.0.0.6"));
    let desired = records(&[("a.lan", "10.0.0.5"), ("b.lan", "10.0.0.6")]);

    h.reconcile(&desired).await;
    assert_eq!(h.store.persist_count(), 1);

    h.reconcile(&desired).await;
    assert_eq!(h.store.persist_count(), 2);

    let persisted = h.store.snapshot().await;
    assert_eq!(persisted, h.reconciler.owned().await);
}

#[tokio::test]
async fn record_with_unknown_timestamp_gets_a_full_grace_period() {
    let x = record("x.lan", "y.lan");
    let store = MemoryStateStore::with_owned([(x.clone(), None)].into_iter().collect());
    let h = Harness::with_store(100, store).await;
    h.directory.seed(x.clone());

    h.reconcile(&HashSet::new()).await;
    assert!(h.directory.calls().is_empty());
    assert_eq!(h.reconciler.owned().await.last_seen(&x), Some(at(T0)));

    h.advance(100);
    h.reconcile(&HashSet::new()).await;
    assert!(h.directory.calls().is_empty());

    h.advance(1);
    h.reconcile(&HashSet::new()).await;
    assert_eq!(h.directory.calls(), vec![DirectoryCall::DeleteAlias(x)]);
}

struct BrokenStateStore;

#[async_trait::async_trait]
impl StateStore for BrokenStateStore {
    async fn load(&self) -> Result<OwnedSet> {
        Err(Error::state_store("disk on fire"))
    }

    async fn persist(&self, _owned: &OwnedSet) -> Result<()> {
        Err(Error::state_store("disk on fire"))
    }
}

#[tokio::test]
async fn unreadable_state_starts_empty_and_keeps_working() {
    let directory = MockDirectory::new();
    let reconciler = Reconciler::open(
        directory.clone(),
        Arc::new(BrokenStateStore),
        &engine_config(300),
    )
    .await;

    assert!(reconciler.owned().await.is_empty());

    let actual = directory.actual();
    let summary = reconciler
        .reconcile(&records(&[("a.lan", "10.0.0.5")]), &actual)
        .await;

    assert_eq!(summary.created, 1);
    assert!(reconciler.owned().await.contains(&record("a.lan", "10.0.0.5")));
}
