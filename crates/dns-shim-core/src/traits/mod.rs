//! Core traits for the DNS shim
//!
//! This module defines the seams between the engine and its collaborators.
//!
//! - [`DirectoryClient`]: Publish and withdraw records in the remote store
//! - [`SessionApi`]: Authenticate against the remote store
//! - [`WorkloadInventory`]: Enumerate workloads and watch their lifecycle
//! - [`StateStore`]: Persist the owned set

pub mod directory;
pub mod inventory;
pub mod session;
pub mod state_store;

pub use directory::DirectoryClient;
pub use inventory::{
    Workload, WorkloadAction, WorkloadEvent, WorkloadEventStream, WorkloadInventory,
};
pub use session::{SessionApi, SessionInfo};
pub use state_store::StateStore;
