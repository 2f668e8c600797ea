//! Swappable indirection over the live `MetaStore`.
//!
//! Every component reaches the store through the handle and never keeps the
//! returned `Arc` past the operation it was loaded for. Writers additionally hold
//! a shared barrier guard (`pin`) for the duration of their write so a full resync
//! can take the barrier exclusively, swap the pointer, and reinitialise the
//! in-memory views without a writer landing in the old store halfway through.

use arc_swap::ArcSwap;
use parking_lot::{RwLock, RwLockReadGuard};
use std::ops::Deref;
use std::sync::Arc;

use super::db::MetaStore;

pub struct StoreHandle {
    current: ArcSwap<MetaStore>,
    barrier: RwLock<()>,
}

/// A store reference that is guaranteed not to be swapped out while held.
pub struct PinnedStore<'a> {
    store: Arc<MetaStore>,
    _guard: RwLockReadGuard<'a, ()>,
}

impl Deref for PinnedStore<'_> {
    type Target = MetaStore;

    fn deref(&self) -> &MetaStore {
        &self.store
    }
}

impl StoreHandle {
    pub fn new(store: MetaStore) -> Arc<Self> {
        Arc::new(Self {
            current: ArcSwap::from_pointee(store),
            barrier: RwLock::new(()),
        })
    }

    /// The store that is live right now. Readers only.
    pub fn current(&self) -> Arc<MetaStore> {
        self.current.load_full()
    }

    /// Shared access for a write. Must not be nested on the same thread.
    pub fn pin(&self) -> PinnedStore<'_> {
        let guard = self.barrier.read();
        PinnedStore {
            store: self.current.load_full(),
            _guard: guard,
        }
    }

    /// Installs `next` as the live store.
    ///
    /// `install` runs under the exclusive barrier before the pointer flips and sees
    /// the outgoing store and `next`. It is where rows that only the live store
    /// carries get copied over and where in-memory views are rebuilt. It must not
    /// call `pin`. If it fails nothing is swapped and `next` is dropped.
    /// Returns the replaced store so the caller can close and delete it.
    pub fn swap_with<R, E>(
        &self,
        next: MetaStore,
        install: impl FnOnce(&MetaStore, &MetaStore) -> Result<R, E>,
    ) -> Result<(Arc<MetaStore>, R), E> {
        let _exclusive = self.barrier.write();
        let next = Arc::new(next);
        let outgoing = self.current.load_full();
        let result = install(&outgoing, &next)?;
        drop(outgoing);
        let previous = self.current.swap(next);

        tracing::info!(
            "Swapped metadata store {} -> {}",
            previous.location().display(),
            self.current.load().location().display()
        );

        Ok((previous, result))
    }
}
