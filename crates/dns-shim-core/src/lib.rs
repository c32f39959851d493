// # dns-shim-core
//
// Core library for the label-driven DNS shim.
//
// ## Architecture Overview
//
// This library keeps a remote DNS record directory in line with the records
// declared by running workloads:
// - **WorkloadInventory**: Trait for enumerating workloads and watching their lifecycle
// - **DirectoryClient**: Trait for listing, creating and deleting directory records
// - **SessionApi**: Trait for authenticating against the directory
// - **StateStore**: Trait for persisting the set of records this shim owns
// - **Reconciler**: Diffs desired, owned and actual records and converges them
// - **Scheduler**: Runs full passes on a timer and incremental passes on events
//
// ## Design Principles
//
// 1. **Ownership**: Only records the shim created are ever deleted
// 2. **No flapping**: Stale records are kept for a grace period before removal
// 3. **Serialized passes**: One mutex orders every pass, full or incremental
// 4. **Library-First**: Runtime and directory adapters live in their own crates

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod owned;
pub mod record;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DirectoryConfig, EngineConfig, ShimConfig, StateConfig, TriggerConfig, TriggerMode,
    WindowPolicy,
};
pub use engine::{PassSummary, ReapPolicy, Reconciler};
pub use error::{Error, Result};
pub use owned::OwnedSet;
pub use record::{ActualRecords, Record, RecordKind, parse_record_label};
pub use scheduler::Scheduler;
pub use session::open_session;
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{
    DirectoryClient, SessionApi, StateStore, Workload, WorkloadAction, WorkloadEvent,
    WorkloadInventory,
};
