//! Reconciliation engine
//!
//! The [`Reconciler`] is responsible for:
//! - Diffing desired records against the owned set and the directory contents
//! - Applying creates before deletes, one record at a time
//! - Holding back stale records until their grace period has elapsed
//! - Persisting the owned set once per pass
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐   desired   ┌──────────────┐   create/delete   ┌─────────────────┐
//! │ WorkloadInventory │────────────▶│  Reconciler  │──────────────────▶│ DirectoryClient │
//! └───────────────────┘             └──────────────┘◀──────────────────└─────────────────┘
//!                                          │             actual
//!                                          ▼
//!                                   ┌──────────────┐
//!                                   │  StateStore  │
//!                                   │  (persist)   │
//!                                   └──────────────┘
//! ```
//!
//! ## Pass Flow
//!
//! 1. Refresh `lastSeen` for every desired record that is already owned
//! 2. Split owned records into still-desired and stale
//! 3. Run the reap policy over stale records
//! 4. Create missing and drifted records, then delete reaped ones
//! 5. Persist the owned set

pub mod reap;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::owned::OwnedSet;
use crate::record::{ActualRecords, Record, RecordKind};
use crate::traits::{DirectoryClient, StateStore, Workload, WorkloadInventory};

pub use reap::{ReapDecision, ReapPolicy};

/// Outcome counters of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Records created through the directory API
    pub created: usize,
    /// Records found already published and taken over without a call
    pub adopted: usize,
    /// Records deleted through the directory API
    pub deleted: usize,
    /// Owned records that had already vanished and were dropped
    pub released: usize,
    /// Stale records kept for the rest of their grace period
    pub deferred: usize,
    /// Create or delete calls that failed and will be retried
    pub failed: usize,
}

impl PassSummary {
    /// True when the pass changed nothing
    pub fn is_noop(&self) -> bool {
        self.created == 0
            && self.adopted == 0
            && self.deleted == 0
            && self.released == 0
            && self.failed == 0
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} adopted={} deleted={} released={} deferred={} failed={}",
            self.created, self.adopted, self.deleted, self.released, self.deferred, self.failed
        )
    }
}

/// Mutable state guarded by the reconciliation mutex
#[derive(Debug, Default)]
pub struct ReconcilerState {
    /// Records this reconciler created and is responsible for removing
    pub owned: OwnedSet,
    /// Records each workload declared when it was last observed
    pub workloads: HashMap<String, HashSet<Record>>,
}

impl ReconcilerState {
    /// Whether any tracked workload still declares `record`
    fn is_declared(&self, record: &Record) -> bool {
        self.workloads.values().any(|records| records.contains(record))
    }
}

/// Core reconciliation engine
///
/// All passes, full or incremental, serialize on one internal mutex. The
/// engine is shared between scheduler tasks through an `Arc`.
///
/// ## Lifecycle
///
/// 1. Create with [`Reconciler::open()`], which loads the owned set
/// 2. Drive passes with [`Reconciler::full_pass()`] and
///    [`Reconciler::incremental_pass()`]
///
/// ## Failure Handling
///
/// No pass ever returns an error. Failed directory calls leave the owned set
/// as it was so the next pass retries them. A pass whose inputs cannot be
/// gathered is skipped entirely.
pub struct Reconciler {
    directory: Arc<dyn DirectoryClient>,
    state_store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    reap: ReapPolicy,
    label_key: String,
    state: Mutex<ReconcilerState>,
}

impl Reconciler {
    /// Create a reconciler using the system clock
    ///
    /// The owned set is loaded from `state_store`; a load failure is logged
    /// and the reconciler starts with nothing owned.
    pub async fn open(
        directory: Arc<dyn DirectoryClient>,
        state_store: Arc<dyn StateStore>,
        config: &EngineConfig,
    ) -> Self {
        Self::open_with_clock(directory, state_store, config, Arc::new(SystemClock)).await
    }

    /// Create a reconciler with an explicit clock
    pub async fn open_with_clock(
        directory: Arc<dyn DirectoryClient>,
        state_store: Arc<dyn StateStore>,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let owned = match state_store.load().await {
            Ok(owned) => {
                info!("Loaded {} owned records", owned.len());
                owned
            }
            Err(e) => {
                error!("Failed to load owned records, starting empty: {}", e);
                OwnedSet::new()
            }
        };

        Self {
            directory,
            state_store,
            clock,
            reap: ReapPolicy::new(config.reap_grace()),
            label_key: config.label_key.clone(),
            state: Mutex::new(ReconcilerState {
                owned,
                workloads: HashMap::new(),
            }),
        }
    }

    /// Snapshot of the owned set
    pub async fn owned(&self) -> OwnedSet {
        self.state.lock().await.owned.clone()
    }

    /// Records a workload declared when last observed
    pub async fn workload_records(&self, workload_id: &str) -> Option<HashSet<Record>> {
        self.state.lock().await.workloads.get(workload_id).cloned()
    }

    /// Ids of all tracked workloads
    pub async fn tracked_workloads(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().await.workloads.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Converge the owned set towards `desired` given the directory contents
    pub async fn reconcile(&self, desired: &HashSet<Record>, actual: &ActualRecords) -> PassSummary {
        let mut state = self.state.lock().await;
        self.converge(&mut state.owned, desired, actual, None).await
    }

    /// Run a full reconciliation over every running workload
    ///
    /// Returns `None` when the pass was skipped because the inventory or the
    /// directory could not be read.
    pub async fn full_pass(&self, inventory: &dyn WorkloadInventory) -> Option<PassSummary> {
        let mut state = self.state.lock().await;
        debug!("Running full sync");

        let workloads = match inventory.list_running().await {
            Ok(workloads) => workloads,
            Err(e) => {
                error!("Failed to list running workloads, skipping sync: {}", e);
                return None;
            }
        };

        let actual = match self.directory.fetch_actual().await {
            Ok(actual) => actual,
            Err(e) => {
                error!(
                    "Failed to fetch {} records, skipping sync: {}",
                    self.directory.directory_name(),
                    e
                );
                return None;
            }
        };

        state.workloads.clear();
        for workload in &workloads {
            let records = self.declared_records(workload);
            if !records.is_empty() {
                state.workloads.insert(workload.id.clone(), records);
            }
        }

        let desired: HashSet<Record> = state.workloads.values().flatten().cloned().collect();
        debug!(
            "{} running workloads declare {} records",
            workloads.len(),
            desired.len()
        );

        let summary = self.converge(&mut state.owned, &desired, &actual, None).await;
        log_summary("Full sync", &summary);
        Some(summary)
    }

    /// Reconcile only the records touched by the given workloads
    ///
    /// Each workload is re-inspected. Its previous and current records form
    /// the scope of the pass, so a record that one workload stops declaring
    /// survives while another tracked workload still declares it. Records a
    /// workload stops declaring have their grace period counted from this
    /// pass, not from the last full pass.
    pub async fn incremental_pass(
        &self,
        inventory: &dyn WorkloadInventory,
        workload_ids: &HashSet<String>,
    ) -> Option<PassSummary> {
        if workload_ids.is_empty() {
            return Some(PassSummary::default());
        }

        let mut state = self.state.lock().await;
        debug!("Running incremental sync for {} workloads", workload_ids.len());

        let actual = match self.directory.fetch_actual().await {
            Ok(actual) => actual,
            Err(e) => {
                error!(
                    "Failed to fetch {} records, skipping incremental sync: {}",
                    self.directory.directory_name(),
                    e
                );
                return None;
            }
        };

        let mut ids: Vec<&String> = workload_ids.iter().collect();
        ids.sort();

        let now = self.clock.now();
        let mut scope: HashSet<Record> = HashSet::new();
        for id in ids {
            let previous = state.workloads.get(id).cloned().unwrap_or_default();
            scope.extend(previous.iter().cloned());

            let current = match inventory.inspect(id).await {
                Ok(Some(workload)) => self.declared_records(&workload),
                Ok(None) => {
                    debug!("Workload {} is gone", id);
                    HashSet::new()
                }
                Err(e) => {
                    warn!("Failed to inspect workload {}, keeping its records: {}", id, e);
                    continue;
                }
            };

            // Declared until this event: the grace period starts now
            for record in previous.difference(&current) {
                state.owned.touch(record, now);
            }

            scope.extend(current.iter().cloned());
            if current.is_empty() {
                state.workloads.remove(id);
            } else {
                state.workloads.insert(id.clone(), current);
            }
        }

        let desired: HashSet<Record> = scope
            .iter()
            .filter(|record| state.is_declared(record))
            .cloned()
            .collect();

        let summary = self
            .converge(&mut state.owned, &desired, &actual, Some(&scope))
            .await;
        log_summary("Incremental sync", &summary);
        Some(summary)
    }

    fn declared_records(&self, workload: &Workload) -> HashSet<Record> {
        match workload.declared_records(&self.label_key) {
            Ok(records) => records.into_iter().collect(),
            Err(e) => {
                warn!(
                    "Ignoring records of workload {} ({}): {}",
                    workload.name, workload.id, e
                );
                HashSet::new()
            }
        }
    }

    /// One pass of the diff-and-apply algorithm
    ///
    /// With a `scope`, only owned records inside it are considered for
    /// removal or re-assertion.
    async fn converge(
        &self,
        owned: &mut OwnedSet,
        desired: &HashSet<Record>,
        actual: &ActualRecords,
        scope: Option<&HashSet<Record>>,
    ) -> PassSummary {
        let now = self.clock.now();
        let mut summary = PassSummary::default();

        for record in desired {
            owned.touch(record, now);
        }

        let mut to_add: Vec<Record> = desired
            .iter()
            .filter(|record| !owned.contains(record))
            .cloned()
            .collect();
        to_add.sort();

        let mut to_sync = Vec::new();
        let mut candidates = Vec::new();
        for record in owned.sorted_records() {
            if scope.is_some_and(|scope| !scope.contains(&record)) {
                continue;
            }
            if !desired.contains(&record) {
                candidates.push(record);
            } else if !actual.contains_any(&record) {
                to_sync.push(record);
            }
        }

        let mut to_remove = Vec::new();
        for record in candidates {
            match self.reap.evaluate(owned, &record, now) {
                ReapDecision::Remove => to_remove.push(record),
                ReapDecision::Defer { remaining } => {
                    debug!(
                        "Not removing {} record {} for another {}s",
                        record.kind(),
                        record,
                        remaining.num_seconds()
                    );
                    summary.deferred += 1;
                }
            }
        }

        if !to_sync.is_empty() {
            info!("{} owned records are missing remotely, re-creating", to_sync.len());
        }

        for record in to_add.iter().chain(to_sync.iter()) {
            self.create(owned, record, actual, now, &mut summary).await;
        }

        for record in &to_remove {
            self.delete(owned, record, actual, &mut summary).await;
        }

        if let Err(e) = self.state_store.persist(owned).await {
            error!("Failed to persist owned records: {}", e);
        }

        summary
    }

    async fn create(
        &self,
        owned: &mut OwnedSet,
        record: &Record,
        actual: &ActualRecords,
        now: chrono::DateTime<chrono::Utc>,
        summary: &mut PassSummary,
    ) {
        let kind = record.kind();

        if actual.contains(record) {
            debug!("{} record {} already present, taking ownership", kind, record);
            owned.adopt(record.clone(), now);
            summary.adopted += 1;
            return;
        }

        info!("Adding {} record: {}", kind, record);
        let result = match kind {
            RecordKind::Address => self.directory.create_address_record(record).await,
            RecordKind::Alias => self.directory.create_alias_record(record).await,
        };

        match result {
            Ok(()) => {
                owned.adopt(record.clone(), now);
                summary.created += 1;
            }
            Err(e) if e.is_already_present() => {
                debug!("{} record {} was created concurrently", kind, record);
                owned.adopt(record.clone(), now);
                summary.adopted += 1;
            }
            Err(e) => {
                error!("Failed to add {} record {}: {}", kind, record, e);
                summary.failed += 1;
            }
        }
    }

    async fn delete(
        &self,
        owned: &mut OwnedSet,
        record: &Record,
        actual: &ActualRecords,
        summary: &mut PassSummary,
    ) {
        let kind = record.kind();

        if !actual.contains(record) {
            info!("{} record {} is already gone, releasing it", kind, record);
            owned.remove(record);
            summary.released += 1;
            return;
        }

        info!("Removing {} record: {}", kind, record);
        let result = match kind {
            RecordKind::Address => self.directory.delete_address_record(record).await,
            RecordKind::Alias => self.directory.delete_alias_record(record).await,
        };

        match result {
            Ok(()) => {
                owned.remove(record);
                summary.deleted += 1;
            }
            Err(e) if e.is_not_found() => {
                debug!("{} record {} vanished before delete", kind, record);
                owned.remove(record);
                summary.released += 1;
            }
            Err(e) => {
                error!("Failed to remove {} record {}: {}", kind, record, e);
                summary.failed += 1;
            }
        }
    }
}

fn log_summary(pass: &str, summary: &PassSummary) {
    if summary.is_noop() {
        debug!("{} finished: {}", pass, summary);
    } else {
        info!("{} finished: {}", pass, summary);
    }
}
