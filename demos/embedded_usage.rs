//! Minimal embedding example for dns-shim-core
//!
//! Runs the reconciler against an in-memory directory and a fixed set of
//! workloads, without Docker or Pi-hole. The application owns the
//! reconciler and decides when passes run.

use dns_shim_core::traits::{
    DirectoryClient, Workload, WorkloadAction, WorkloadEvent, WorkloadEventStream,
    WorkloadInventory,
};
use dns_shim_core::{EngineConfig, MemoryStateStore, Reconciler, Record, RecordKind, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Directory that keeps records in memory
#[derive(Default)]
struct InMemoryDirectory {
    records: Mutex<HashSet<Record>>,
}

impl InMemoryDirectory {
    fn list(&self, kind: RecordKind) -> HashSet<Record> {
        self.records
            .lock()
            .map(|records| records.iter().filter(|r| r.kind() == kind).cloned().collect())
            .unwrap_or_default()
    }

    fn set(&self, record: &Record, present: bool) {
        if let Ok(mut records) = self.records.lock() {
            if present {
                records.insert(record.clone());
            } else {
                records.remove(record);
            }
        }
    }
}

#[async_trait::async_trait]
impl DirectoryClient for InMemoryDirectory {
    async fn list_address_records(&self) -> Result<HashSet<Record>> {
        Ok(self.list(RecordKind::Address))
    }

    async fn list_alias_records(&self) -> Result<HashSet<Record>> {
        Ok(self.list(RecordKind::Alias))
    }

    async fn create_address_record(&self, record: &Record) -> Result<()> {
        self.set(record, true);
        Ok(())
    }

    async fn delete_address_record(&self, record: &Record) -> Result<()> {
        self.set(record, false);
        Ok(())
    }

    async fn create_alias_record(&self, record: &Record) -> Result<()> {
        self.set(record, true);
        Ok(())
    }

    async fn delete_alias_record(&self, record: &Record) -> Result<()> {
        self.set(record, false);
        Ok(())
    }

    fn directory_name(&self) -> &'static str {
        "in-memory"
    }
}

/// Inventory with a fixed list of workloads and no events
struct StaticInventory {
    workloads: Vec<Workload>,
}

#[async_trait::async_trait]
impl WorkloadInventory for StaticInventory {
    async fn list_running(&self) -> Result<Vec<Workload>> {
        Ok(self.workloads.clone())
    }

    async fn inspect(&self, workload_id: &str) -> Result<Option<Workload>> {
        Ok(self.workloads.iter().find(|w| w.id == workload_id).cloned())
    }

    fn subscribe(&self, _actions: &[WorkloadAction]) -> WorkloadEventStream {
        Box::pin(tokio_stream::empty::<Result<WorkloadEvent>>())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = EngineConfig::default();
    let labels = HashMap::from([(
        config.label_key.clone(),
        r#"[["app.lan", "10.0.0.5"], ["www.app.lan", "app.lan"]]"#.to_string(),
    )]);
    let inventory = StaticInventory {
        workloads: vec![Workload::new("c0ffee", "app", labels)],
    };

    let directory = Arc::new(InMemoryDirectory::default());
    let reconciler = Reconciler::open(
        directory.clone(),
        Arc::new(MemoryStateStore::new()),
        &config,
    )
    .await;

    if let Some(summary) = reconciler.full_pass(&inventory).await {
        println!("First pass: {}", summary);
    }
    if let Some(summary) = reconciler.full_pass(&inventory).await {
        println!("Second pass: {}", summary);
    }

    for record in reconciler.owned().await.sorted_records() {
        println!("owned {} record {}", record.kind(), record);
    }

    Ok(())
}
