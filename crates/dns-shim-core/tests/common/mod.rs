//! Test doubles and common utilities for contract tests
//!
//! This module provides in-memory stand-ins for the directory API and the
//! workload inventory. They record every mutating call so tests can assert
//! exactly what the reconciler asked for.

#![allow(dead_code)]

use dns_shim_core::error::{Error, Result};
use dns_shim_core::traits::{
    DirectoryClient, Workload, WorkloadAction, WorkloadEvent, WorkloadEventStream,
    WorkloadInventory,
};
use dns_shim_core::{
    ActualRecords, EngineConfig, ManualClock, MemoryStateStore, Reconciler, Record, RecordKind,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Unix time every test clock starts at
pub const T0: i64 = 1_700_000_000;

/// A mutating call observed by [`MockDirectory`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    CreateAddress(Record),
    DeleteAddress(Record),
    CreateAlias(Record),
    DeleteAlias(Record),
}

/// An in-memory directory that behaves like the real API
///
/// Creating a record that exists fails with "already present"; deleting a
/// record that does not exist fails with "not found".
#[derive(Default)]
pub struct MockDirectory {
    addresses: Mutex<HashSet<Record>>,
    aliases: Mutex<HashSet<Record>>,
    calls: Mutex<Vec<DirectoryCall>>,
    failing: Mutex<HashSet<Record>>,
    listing_fails: AtomicBool,
    listing_hangs: AtomicBool,
    list_count: AtomicUsize,
}

impl MockDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish a record without going through the reconciler
    pub fn seed(&self, record: Record) {
        self.set_for(&record).lock().unwrap().insert(record);
    }

    /// Delete a record behind the reconciler's back
    pub fn remove_externally(&self, record: &Record) {
        self.set_for(record).lock().unwrap().remove(record);
    }

    /// Make every create/delete of `record` fail
    pub fn fail_on(&self, record: Record) {
        self.failing.lock().unwrap().insert(record);
    }

    /// Stop failing calls for `record`
    pub fn heal(&self, record: &Record) {
        self.failing.lock().unwrap().remove(record);
    }

    /// Make listing calls fail
    pub fn set_listing_fails(&self, fails: bool) {
        self.listing_fails.store(fails, Ordering::SeqCst);
    }

    /// Make listing calls never complete
    pub fn set_listing_hangs(&self, hangs: bool) {
        self.listing_hangs.store(hangs, Ordering::SeqCst);
    }

    /// Current content as a snapshot
    pub fn actual(&self) -> ActualRecords {
        ActualRecords::new(
            self.addresses.lock().unwrap().clone(),
            self.aliases.lock().unwrap().clone(),
        )
    }

    /// Whether the record is currently published
    pub fn holds(&self, record: &Record) -> bool {
        self.set_for(record).lock().unwrap().contains(record)
    }

    /// All mutating calls so far, in order
    pub fn calls(&self) -> Vec<DirectoryCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Number of list calls made
    pub fn list_count(&self) -> usize {
        self.list_count.load(Ordering::SeqCst)
    }

    fn set_for(&self, record: &Record) -> &Mutex<HashSet<Record>> {
        match record.kind() {
            RecordKind::Address => &self.addresses,
            RecordKind::Alias => &self.aliases,
        }
    }

    fn list(&self, set: &Mutex<HashSet<Record>>) -> Result<HashSet<Record>> {
        self.list_count.fetch_add(1, Ordering::SeqCst);
        if self.listing_fails.load(Ordering::SeqCst) {
            return Err(Error::directory("listing unavailable"));
        }
        Ok(set.lock().unwrap().clone())
    }

    fn create(&self, record: &Record, call: DirectoryCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(record) {
            return Err(Error::directory("injected create failure"));
        }
        if !self.set_for(record).lock().unwrap().insert(record.clone()) {
            return Err(Error::already_present(record.to_string()));
        }
        Ok(())
    }

    fn delete(&self, record: &Record, call: DirectoryCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(record) {
            return Err(Error::directory("injected delete failure"));
        }
        if !self.set_for(record).lock().unwrap().remove(record) {
            return Err(Error::not_found(record.to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DirectoryClient for MockDirectory {
    async fn list_address_records(&self) -> Result<HashSet<Record>> {
        if self.listing_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.list(&self.addresses)
    }

    async fn list_alias_records(&self) -> Result<HashSet<Record>> {
        self.list(&self.aliases)
    }

    async fn create_address_record(&self, record: &Record) -> Result<()> {
        self.create(record, DirectoryCall::CreateAddress(record.clone()))
    }

    async fn delete_address_record(&self, record: &Record) -> Result<()> {
        self.delete(record, DirectoryCall::DeleteAddress(record.clone()))
    }

    async fn create_alias_record(&self, record: &Record) -> Result<()> {
        self.create(record, DirectoryCall::CreateAlias(record.clone()))
    }

    async fn delete_alias_record(&self, record: &Record) -> Result<()> {
        self.delete(record, DirectoryCall::DeleteAlias(record.clone()))
    }

    fn directory_name(&self) -> &'static str {
        "mock"
    }
}

/// An in-memory workload inventory with a controllable event stream
#[derive(Default)]
pub struct MockInventory {
    running: Mutex<BTreeMap<String, Workload>>,
    inspect_failures: Mutex<HashSet<String>>,
    listing_fails: AtomicBool,
    event_tx: Mutex<Option<mpsc::UnboundedSender<Result<WorkloadEvent>>>>,
    subscribe_count: AtomicUsize,
    inspect_count: AtomicUsize,
}

impl MockInventory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start (or update) a workload
    pub fn start(&self, workload: Workload) {
        self.running
            .lock()
            .unwrap()
            .insert(workload.id.clone(), workload);
    }

    /// Stop a workload
    pub fn stop(&self, id: &str) {
        self.running.lock().unwrap().remove(id);
    }

    /// Make inspection of `id` fail
    pub fn fail_inspect(&self, id: &str) {
        self.inspect_failures.lock().unwrap().insert(id.to_string());
    }

    /// Make listing fail
    pub fn set_listing_fails(&self, fails: bool) {
        self.listing_fails.store(fails, Ordering::SeqCst);
    }

    /// Emit an event on the current subscription
    pub fn emit(&self, id: &str, action: WorkloadAction) {
        if let Some(tx) = self.event_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(WorkloadEvent::new(id, action)));
        }
    }

    /// Break the current subscription with an error item
    pub fn break_stream(&self) {
        if let Some(tx) = self.event_tx.lock().unwrap().take() {
            let _ = tx.send(Err(Error::inventory("event stream reset")));
        }
    }

    /// Number of subscriptions opened
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    /// Number of inspections performed
    pub fn inspect_count(&self) -> usize {
        self.inspect_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl WorkloadInventory for MockInventory {
    async fn list_running(&self) -> Result<Vec<Workload>> {
        if self.listing_fails.load(Ordering::SeqCst) {
            return Err(Error::inventory("runtime unavailable"));
        }
        Ok(self.running.lock().unwrap().values().cloned().collect())
    }

    async fn inspect(&self, workload_id: &str) -> Result<Option<Workload>> {
        self.inspect_count.fetch_add(1, Ordering::SeqCst);
        if self.inspect_failures.lock().unwrap().contains(workload_id) {
            return Err(Error::inventory("inspect failed"));
        }
        Ok(self.running.lock().unwrap().get(workload_id).cloned())
    }

    fn subscribe(&self, _actions: &[WorkloadAction]) -> WorkloadEventStream {
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.event_tx.lock().unwrap() = Some(tx);
        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }
}

pub fn record(name: &str, target: &str) -> Record {
    Record::new(name, target)
}

pub fn records(pairs: &[(&str, &str)]) -> HashSet<Record> {
    pairs.iter().map(|(n, t)| record(n, t)).collect()
}

/// A workload declaring `pairs` under the default label
pub fn workload(id: &str, pairs: &[(&str, &str)]) -> Workload {
    let value = serde_json::to_string(
        &pairs
            .iter()
            .map(|(n, t)| vec![n.to_string(), t.to_string()])
            .collect::<Vec<_>>(),
    )
    .unwrap();

    let mut labels = HashMap::new();
    labels.insert(dns_shim_core::config::DEFAULT_LABEL_KEY.to_string(), value);
    Workload::new(id, format!("{}-name", id), labels)
}

pub fn engine_config(grace_secs: u64) -> EngineConfig {
    EngineConfig {
        reap_grace_secs: grace_secs,
        ..EngineConfig::default()
    }
}

/// Everything a reconciler test needs, wired together
pub struct Harness {
    pub directory: Arc<MockDirectory>,
    pub store: MemoryStateStore,
    pub clock: Arc<ManualClock>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub async fn new(grace_secs: u64) -> Self {
        Self::with_store(grace_secs, MemoryStateStore::new()).await
    }

    pub async fn with_store(grace_secs: u64, store: MemoryStateStore) -> Self {
        let directory = MockDirectory::new();
        Self::with_parts(grace_secs, directory, store).await
    }

    pub async fn with_parts(
        grace_secs: u64,
        directory: Arc<MockDirectory>,
        store: MemoryStateStore,
    ) -> Self {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let reconciler = Reconciler::open_with_clock(
            directory.clone(),
            Arc::new(store.clone()),
            &engine_config(grace_secs),
            clock.clone(),
        )
        .await;

        Self {
            directory,
            store,
            clock,
            reconciler: Arc::new(reconciler),
        }
    }

    /// Advance the clock by whole seconds
    pub fn advance(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }

    /// Run the bare algorithm against a fresh directory snapshot
    pub async fn reconcile(&self, desired: &HashSet<Record>) -> dns_shim_core::PassSummary {
        let actual = self.directory.actual();
        self.reconciler.reconcile(desired, &actual).await
    }
}

pub fn at(secs: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(secs, 0).unwrap()
}
