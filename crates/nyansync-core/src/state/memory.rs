// # Memory Config Store
//
// In-memory implementation of ConfigStore.
//
// ## Purpose
//
// Provides a fast config store that doesn't persist across restarts.
// Useful for testing and for embedding the engine where another layer owns
// persistence.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::model::Snapshot;
use crate::traits::config_store::{ConfigStore, Mutation};

/// In-memory config store implementation
///
/// Clones share the same snapshot.
///
/// # Example
///
/// ```rust,no_run
/// use nyansync_core::state::MemoryConfigStore;
/// use nyansync_core::ConfigStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryConfigStore::new();
///     assert!(store.snapshot().await?.jobs.is_empty());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<Mutex<Snapshot>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryConfigStore {
    /// Create a new empty memory config store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with a snapshot
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(snapshot)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of committed mutations
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.inner.lock().await.clone())
    }

    async fn modify(&self, mutation: Mutation) -> Result<Snapshot> {
        let mut guard = self.inner.lock().await;

        let mut next = guard.clone();
        mutation(&mut next)?;

        *guard = next.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(next)
    }
}
