// # State Store Trait
//
// Defines the interface for persisting the owned set.
//
// ## Purpose
//
// The state store is the reconciler's durable memory of what it created.
// Without it, a restart would forget which records are ours and records
// would either leak forever or (worse) unowned records would be touched.
//
// ## Implementations
//
// - File-based: versioned JSON document with legacy migration
// - Memory: tests and ephemeral runs
//
// ## Usage
//
// ```rust,ignore
// use dns_shim_core::StateStore;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = /* StateStore implementation */;
//
//     let mut owned = store.load().await?;
//     // ... reconcile ...
//     store.persist(&owned).await?;
//
//     Ok(())
// }
// ```

use async_trait::async_trait;

use crate::owned::OwnedSet;

/// Trait for state store implementations
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage
/// - ✅ Migrate older document shapes on load
///
/// ## Forbidden Capabilities
/// - ❌ Decide what is owned (owned by `Reconciler`)
/// - ❌ Call the directory API (owned by `DirectoryClient`)
/// - ❌ Spawn background tasks (persist is called once per pass)
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the owned set
    ///
    /// # Returns
    ///
    /// - `Ok(OwnedSet)`: the stored set, empty if nothing was stored yet
    /// - `Err(Error)`: storage unreadable; the caller starts empty
    async fn load(&self) -> Result<OwnedSet, crate::Error>;

    /// Replace the stored owned set
    ///
    /// # Returns
    ///
    /// - `Ok(())`: durably written
    /// - `Err(Error)`: storage error; the in-memory set stays authoritative
    async fn persist(&self, owned: &OwnedSet) -> Result<(), crate::Error>;
}
