// # Workload Inventory Trait
//
// Defines the interface to the container runtime that declares records.
//
// ## Implementations
//
// - Docker Engine API: `dns-shim-docker` crate
//
// ## Usage
//
// ```rust,ignore
// use dns_shim_core::{WorkloadInventory, WorkloadAction};
// use tokio_stream::StreamExt;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let inventory = /* WorkloadInventory implementation */;
//
//     for workload in inventory.list_running().await? {
//         println!("{} {:?}", workload.id, workload.labels);
//     }
//
//     let mut events = inventory.subscribe(&WorkloadAction::ALL);
//     while let Some(event) = events.next().await {
//         println!("{:?}", event?);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use tokio_stream::Stream;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::record::{Record, parse_record_label};

/// A running workload and its labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// Runtime identity (container id)
    pub id: String,
    /// Human-readable name, for logs only
    pub name: String,
    /// Labels attached to the workload
    pub labels: HashMap<String, String>,
}

impl Workload {
    /// Create a workload
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        labels: HashMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            labels,
        }
    }

    /// Records declared under `label_key`
    ///
    /// A workload without the label declares nothing. A label that fails
    /// to parse is an error for this workload only.
    pub fn declared_records(&self, label_key: &str) -> Result<Vec<Record>, Error> {
        match self.labels.get(label_key) {
            Some(raw) => parse_record_label(raw),
            None => Ok(Vec::new()),
        }
    }
}

/// Workload lifecycle transition reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadAction {
    Create,
    Start,
    Stop,
    Restart,
    Die,
    Kill,
    Oom,
    Pause,
    Unpause,
    Destroy,
    Rename,
}

impl WorkloadAction {
    /// Every action the scheduler understands
    pub const ALL: [WorkloadAction; 11] = [
        WorkloadAction::Create,
        WorkloadAction::Start,
        WorkloadAction::Stop,
        WorkloadAction::Restart,
        WorkloadAction::Die,
        WorkloadAction::Kill,
        WorkloadAction::Oom,
        WorkloadAction::Pause,
        WorkloadAction::Unpause,
        WorkloadAction::Destroy,
        WorkloadAction::Rename,
    ];

    /// Wire name used by the runtime
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadAction::Create => "create",
            WorkloadAction::Start => "start",
            WorkloadAction::Stop => "stop",
            WorkloadAction::Restart => "restart",
            WorkloadAction::Die => "die",
            WorkloadAction::Kill => "kill",
            WorkloadAction::Oom => "oom",
            WorkloadAction::Pause => "pause",
            WorkloadAction::Unpause => "unpause",
            WorkloadAction::Destroy => "destroy",
            WorkloadAction::Rename => "rename",
        }
    }
}

impl fmt::Display for WorkloadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkloadAction::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| Error::invalid_input(format!("unknown workload action: {}", s)))
    }
}

/// A lifecycle notification for one workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadEvent {
    /// Affected workload
    pub workload_id: String,
    /// What happened
    pub action: WorkloadAction,
}

impl WorkloadEvent {
    /// Create a workload event
    pub fn new(workload_id: impl Into<String>, action: WorkloadAction) -> Self {
        Self {
            workload_id: workload_id.into(),
            action,
        }
    }
}

/// Stream of workload events; an `Err` item means the stream broke
pub type WorkloadEventStream =
    Pin<Box<dyn Stream<Item = Result<WorkloadEvent, Error>> + Send + 'static>>;

/// Trait for workload inventory implementations
///
/// # Task Spawning Rules
///
/// Implementations must not spawn their own reconnect loops. When the
/// event stream fails, yield an `Err` item or end the stream; the
/// scheduler owns reconnection and backoff.
#[async_trait]
pub trait WorkloadInventory: Send + Sync {
    /// Enumerate running workloads
    async fn list_running(&self) -> Result<Vec<Workload>, Error>;

    /// Look up one workload
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Workload))`: the workload exists and is running
    /// - `Ok(None)`: the workload is gone or not running
    /// - `Err(Error)`: the runtime could not be asked
    async fn inspect(&self, workload_id: &str) -> Result<Option<Workload>, Error>;

    /// Subscribe to lifecycle events, restricted to `actions`
    fn subscribe(&self, actions: &[WorkloadAction]) -> WorkloadEventStream;
}
