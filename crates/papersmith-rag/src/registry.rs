//! Index readiness guard.
//!
//! [`IndexRegistry`] owns the handle to the store queries read from. It is
//! created once by the application and shared by `Arc`; nothing looks it up
//! globally. Reads go through [`IndexRegistry::get`], which refuses to hand
//! out a store unless the registry is `Ready`. Rebuilds and swaps take an
//! async lock exclusively and finish with an atomic swap; document writes
//! hold it shared through [`IndexRegistry::writer`], so a write never lands
//! in a store that a running rebuild is about to replace.
use std::future::Future;
use std::sync::Arc;

use papersmith_core::traits::VectorStore;
use papersmith_core::types::{IndexState, IndexStatus};
use papersmith_core::{Error, Result};
use parking_lot::RwLock;
use tokio::sync::{RwLock as AsyncRwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

struct Slot {
    state: IndexState,
    store: Option<Arc<dyn VectorStore>>,
}

pub struct IndexRegistry {
    slot: RwLock<Slot>,
    rebuild_lock: AsyncRwLock<()>,
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self { slot: RwLock::new(Slot { state: IndexState::Empty, store: None }), rebuild_lock: AsyncRwLock::new(()) }
    }

    /// A registry that is `Ready` with `store` from the start.
    pub fn with_store(store: Arc<dyn VectorStore>) -> Self {
        let registry = Self::new();
        registry.install(store);
        registry
    }

    pub fn state(&self) -> IndexState {
        self.slot.read().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == IndexState::Ready
    }

    /// Current store. Fails with [`Error::IndexNotReady`] while the index is
    /// empty or being rebuilt.
    pub fn get(&self) -> Result<Arc<dyn VectorStore>> {
        let slot = self.slot.read();
        match (&slot.state, &slot.store) {
            (IndexState::Ready, Some(store)) => Ok(store.clone()),
            _ => Err(Error::IndexNotReady),
        }
    }

    /// Store handle for a document write. Fails with
    /// [`Error::IndexNotReady`] while a rebuild runs; once granted, rebuilds
    /// and swaps wait until the handle is dropped.
    pub async fn writer(&self) -> Result<StoreWriter<'_>> {
        if self.state() == IndexState::Building {
            return Err(Error::IndexNotReady);
        }
        let permit = self.rebuild_lock.read().await;
        Ok(StoreWriter { store: self.get()?, _permit: permit })
    }

    /// Chunk count of the served store, or 0 when not ready.
    pub async fn size(&self) -> usize {
        let Ok(store) = self.get() else {
            return 0;
        };
        match store.count().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "failed to count indexed chunks");
                0
            }
        }
    }

    pub async fn status(&self) -> IndexStatus {
        let state = self.state();
        IndexStatus { state, chunk_count: self.size().await }
    }

    /// Swap in `store` and mark the registry `Ready`. Waits for a running
    /// rebuild to finish first.
    pub async fn set(&self, store: Arc<dyn VectorStore>) {
        let _rebuild = self.rebuild_lock.write().await;
        self.install(store);
    }

    /// Enter `Building`. Only one rebuild runs at a time; a second caller
    /// waits here until the first guard is committed or dropped. Writes in
    /// progress finish first.
    pub async fn begin_rebuild(&self) -> RebuildGuard<'_> {
        let lock = self.rebuild_lock.write().await;
        self.slot.write().state = IndexState::Building;
        info!("index rebuild started");
        RebuildGuard { registry: self, committed: false, _lock: lock }
    }

    /// Run `build` under a rebuild guard and serve its store on success.
    pub async fn rebuild<F, Fut>(&self, build: F) -> Result<Arc<dyn VectorStore>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn VectorStore>>>,
    {
        let guard = self.begin_rebuild().await;
        let store = build().await?;
        guard.commit(store.clone()).await?;
        Ok(store)
    }

    /// Drop the served store and return to `Empty`.
    pub fn reset(&self) {
        let mut slot = self.slot.write();
        if slot.store.take().is_some() {
            warn!("resetting index");
        }
        slot.state = IndexState::Empty;
    }

    fn install(&self, store: Arc<dyn VectorStore>) {
        let embedder_id = store.embedder_id().to_string();
        let previous = {
            let mut slot = self.slot.write();
            slot.state = IndexState::Ready;
            slot.store.replace(store)
        };
        info!(%embedder_id, replaced = previous.is_some(), "index ready");
    }
}

/// Shared permit to write into the served store.
pub struct StoreWriter<'a> {
    store: Arc<dyn VectorStore>,
    _permit: RwLockReadGuard<'a, ()>,
}

impl StoreWriter<'_> {
    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }
}

/// Exclusive rebuild in progress. Dropping it without [`commit`](Self::commit)
/// puts the registry back to what it served before (`Ready` with the old
/// store, or `Empty`).
pub struct RebuildGuard<'a> {
    registry: &'a IndexRegistry,
    committed: bool,
    _lock: RwLockWriteGuard<'a, ()>,
}

impl RebuildGuard<'_> {
    /// Persist `store` as the active index, then swap it in.
    pub async fn commit(mut self, store: Arc<dyn VectorStore>) -> Result<()> {
        store.commit().await?;
        self.registry.install(store);
        self.committed = true;
        Ok(())
    }
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slot = self.registry.slot.write();
        slot.state = if slot.store.is_some() { IndexState::Ready } else { IndexState::Empty };
        warn!(state = %slot.state, "index rebuild abandoned; previous index restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use papersmith_vector::MemoryStore;

    fn store(id: &str) -> Arc<dyn VectorStore> {
        Arc::new(MemoryStore::new(id, 4))
    }

    #[tokio::test]
    async fn get_fails_unless_ready() {
        let registry = IndexRegistry::new();
        assert!(matches!(registry.get(), Err(Error::IndexNotReady)));
        assert_eq!(registry.size().await, 0);

        let guard = registry.begin_rebuild().await;
        assert_eq!(registry.state(), IndexState::Building);
        assert!(matches!(registry.get(), Err(Error::IndexNotReady)));
        guard.commit(store("a")).await.unwrap();

        assert!(registry.is_ready());
        assert_eq!(registry.get().unwrap().embedder_id(), "a");

        registry.reset();
        assert_eq!(registry.state(), IndexState::Empty);
        assert!(matches!(registry.get(), Err(Error::IndexNotReady)));
    }

    #[tokio::test]
    async fn dropped_guard_restores_previous_state() {
        let registry = IndexRegistry::new();
        drop(registry.begin_rebuild().await);
        assert_eq!(registry.state(), IndexState::Empty);

        registry.set(store("old")).await;
        {
            let _guard = registry.begin_rebuild().await;
            assert!(registry.get().is_err());
        }
        assert!(registry.is_ready());
        assert_eq!(registry.get().unwrap().embedder_id(), "old");
    }

    #[tokio::test]
    async fn failed_build_keeps_old_store() {
        let registry = IndexRegistry::with_store(store("old"));
        let result = registry.rebuild(|| async { Err(Error::InvalidRequest("boom".into())) }).await;
        assert!(result.is_err());
        assert_eq!(registry.get().unwrap().embedder_id(), "old");

        registry.rebuild(|| async { Ok(store("new")) }).await.unwrap();
        assert_eq!(registry.get().unwrap().embedder_id(), "new");
    }

    #[tokio::test]
    async fn handles_outlive_a_swap() {
        let registry = IndexRegistry::with_store(store("old"));
        let held = registry.get().unwrap();
        registry.set(store("new")).await;
        assert_eq!(held.embedder_id(), "old");
        assert_eq!(held.count().await.unwrap(), 0);
        assert_eq!(registry.get().unwrap().embedder_id(), "new");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_fail_during_swaps() {
        let registry = Arc::new(IndexRegistry::with_store(store("s0")));
        let mut readers = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..500 {
                    let s = registry.get().expect("reader saw a non-ready index");
                    s.count().await.unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for i in 1..50 {
            registry.set(store(&format!("s{}", i))).await;
            tokio::task::yield_now().await;
        }
        for r in readers {
            r.await.unwrap();
        }
    }

    #[tokio::test]
    async fn rebuilds_wait_for_writes_in_progress() {
        let registry = Arc::new(IndexRegistry::with_store(store("old")));
        let writer = registry.writer().await.unwrap();
        assert_eq!(writer.store().embedder_id(), "old");

        let other = registry.clone();
        let rebuild = tokio::spawn(async move { other.rebuild(|| async { Ok(store("new")) }).await.map(|_| ()) });
        tokio::task::yield_now().await;
        assert!(!rebuild.is_finished());
        assert!(registry.is_ready());

        drop(writer);
        rebuild.await.unwrap().unwrap();
        assert_eq!(registry.get().unwrap().embedder_id(), "new");
    }

    #[tokio::test]
    async fn writers_are_refused_during_a_rebuild() {
        let registry = IndexRegistry::with_store(store("old"));
        let guard = registry.begin_rebuild().await;
        assert!(matches!(registry.writer().await, Err(Error::IndexNotReady)));
        guard.commit(store("new")).await.unwrap();
        assert_eq!(registry.writer().await.unwrap().store().embedder_id(), "new");
    }

    #[tokio::test]
    async fn rebuilds_are_serialized() {
        let registry = Arc::new(IndexRegistry::new());
        let first = registry.begin_rebuild().await;
        let other = registry.clone();
        let second = tokio::spawn(async move {
            other.rebuild(|| async { Ok(store("second")) }).await.map(|_| ())
        });
        tokio::task::yield_now().await;
        assert!(!second.is_finished());
        first.commit(store("first")).await.unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(registry.get().unwrap().embedder_id(), "second");
    }
}
