//! Shared handles passed into every updater.
//!
//! [`StateHandle`] is the single owner of the in-memory [`Catalog`]; every
//! mutation goes through [`StateHandle::mutate`], which checkpoints to the
//! store before the change becomes visible. A crash therefore loses at most
//! the in-flight operation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use shelf_core::{Catalog, CatalogStore, ModuleName, ShelfConfig};

use crate::collab::{Clock, Fetcher, Prompter, NOTICE_DURATION};
use crate::SyncError;

// ---------------------------------------------------------------------------
// StateHandle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct StateHandle {
    catalog: Arc<RwLock<Catalog>>,
    store: Arc<dyn CatalogStore>,
}

impl StateHandle {
    /// Load the catalog from `store` and wrap it.
    pub fn load(store: Arc<dyn CatalogStore>) -> Result<Self, SyncError> {
        let catalog = store.load()?;
        Ok(Self {
            catalog: Arc::new(RwLock::new(catalog)),
            store,
        })
    }

    /// Run `f` against the current catalog under a read lock.
    pub async fn read<R>(&self, f: impl FnOnce(&Catalog) -> R) -> R {
        let guard = self.catalog.read().await;
        f(&guard)
    }

    pub async fn snapshot(&self) -> Catalog {
        self.catalog.read().await.clone()
    }

    /// Apply `f` to a copy of the catalog, save the copy, then publish it.
    ///
    /// If the save fails the in-memory catalog is left untouched, so memory
    /// never runs ahead of disk.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut Catalog) -> R) -> Result<R, SyncError> {
        let mut guard = self.catalog.write().await;
        let mut next = guard.clone();
        let out = f(&mut next);

        let store = self.store.clone();
        let to_save = next.clone();
        tokio::task::spawn_blocking(move || store.save(&to_save)).await??;

        *guard = next;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// ModuleLocks
// ---------------------------------------------------------------------------

/// Single-flight guard per module so a manual update cannot race a scheduled
/// one on the same folder.
#[derive(Clone, Default)]
pub struct ModuleLocks {
    inner: Arc<std::sync::Mutex<HashMap<ModuleName, Arc<Mutex<()>>>>>,
}

impl ModuleLocks {
    /// Take the lock for `name`, or `None` if another task holds it.
    pub fn try_acquire(&self, name: &ModuleName) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self
                .inner
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(name.clone()).or_default().clone()
        };
        lock.try_lock_owned().ok()
    }
}

// ---------------------------------------------------------------------------
// SyncContext
// ---------------------------------------------------------------------------

/// Everything an updater needs. Cheap to clone.
#[derive(Clone)]
pub struct SyncContext {
    pub state: StateHandle,
    pub fetcher: Arc<dyn Fetcher>,
    pub prompter: Arc<dyn Prompter>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<ShelfConfig>,
    /// Directory holding one folder per module.
    pub library: PathBuf,
    pub locks: ModuleLocks,
}

impl SyncContext {
    pub fn new(
        state: StateHandle,
        fetcher: Arc<dyn Fetcher>,
        prompter: Arc<dyn Prompter>,
        clock: Arc<dyn Clock>,
        config: ShelfConfig,
        library: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state,
            fetcher,
            prompter,
            clock,
            config: Arc::new(config),
            library: library.into(),
            locks: ModuleLocks::default(),
        }
    }

    /// `<library>/<module>`
    pub fn module_dir(&self, name: &ModuleName) -> PathBuf {
        self.library.join(name.as_str())
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    pub fn notify(&self, message: &str) {
        self.prompter.notify(message, NOTICE_DURATION);
    }
}
