// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Purpose
//
// Provides a simple state store that doesn't persist across restarts.
// Useful for testing and for dry deployments.
//
// ## Crash Behavior
//
// - All ownership is forgotten on restart
// - Records created before the restart become unowned and are never removed
//   by the shim again

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::Error;
use crate::owned::OwnedSet;
use crate::traits::state_store::StateStore;

/// In-memory state store implementation
///
/// Clones share the same storage, so a test can keep a handle while the
/// reconciler owns another.
///
/// # Example
///
/// ```rust,no_run
/// use dns_shim_core::state::MemoryStateStore;
/// use dns_shim_core::traits::StateStore;
/// use dns_shim_core::OwnedSet;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStateStore::new();
///     store.persist(&OwnedSet::new()).await?;
///     assert!(store.load().await?.is_empty());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<OwnedSet>>,
    persist_count: Arc<AtomicUsize>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with an owned set
    pub fn with_owned(owned: OwnedSet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(owned)),
            persist_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Snapshot of the last persisted set
    pub async fn snapshot(&self) -> OwnedSet {
        self.inner.read().await.clone()
    }

    /// Number of times `persist` was called
    pub fn persist_count(&self) -> usize {
        self.persist_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<OwnedSet, Error> {
        Ok(self.inner.read().await.clone())
    }

    async fn persist(&self, owned: &OwnedSet) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        *guard = owned.clone();
        self.persist_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
