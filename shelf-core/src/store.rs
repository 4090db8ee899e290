//! Catalog persistence.
//!
//! # Storage layout
//!
//! ```text
//! ~/.shelf/
//!   state.json     (Catalog aggregate: mode 0600)
//!   config.yaml    (ShelfConfig, optional)
//!   library/       (one folder per module)
//! ```
//!
//! Saves are atomic: serialize → `state.json.tmp` sibling → `chmod 0600` →
//! `rename`. A crash mid-save leaves the previous state intact.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{io_err, StoreError};
use crate::types::Catalog;

/// Load / checkpoint contract for the [`Catalog`] aggregate.
pub trait CatalogStore: Send + Sync {
    fn load(&self) -> Result<Catalog, StoreError>;
    fn save(&self, catalog: &Catalog) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.shelf`
pub fn shelf_root(home: &Path) -> PathBuf {
    home.join(".shelf")
}

/// `<home>/.shelf/state.json`
pub fn state_path_at(home: &Path) -> PathBuf {
    shelf_root(home).join("state.json")
}

pub(crate) fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// Stores the catalog as pretty-printed JSON at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonCatalogStore {
    path: PathBuf,
}

impl JsonCatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store rooted at `<home>/.shelf/state.json`.
    pub fn at(home: &Path) -> Self {
        Self::new(state_path_at(home))
    }

    /// `at` convenience wrapper using `dirs::home_dir()`.
    pub fn in_home() -> Result<Self, StoreError> {
        Ok(Self::at(&home()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogStore for JsonCatalogStore {
    /// Returns an empty catalog if the file does not yet exist.
    fn load(&self) -> Result<Catalog, StoreError> {
        if !self.path.exists() {
            return Ok(Catalog::default());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        serde_json::from_str(&contents).map_err(|e| StoreError::Parse {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn save(&self, catalog: &Catalog) -> Result<(), StoreError> {
        let Some(dir) = self.path.parent() else {
            return Err(io_err(
                &self.path,
                std::io::Error::other("invalid state path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let json = serde_json::to_string_pretty(catalog)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&self.path, e));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Keeps the last saved catalog in memory. Useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    catalog: Catalog,
    saves: usize,
}

impl MemoryCatalogStore {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            inner: Mutex::new(MemoryInner { catalog, saves: 0 }),
        }
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    /// Snapshot of the last saved catalog.
    pub fn snapshot(&self) -> Catalog {
        self.lock().catalog.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CatalogStore for MemoryCatalogStore {
    fn load(&self) -> Result<Catalog, StoreError> {
        Ok(self.lock().catalog.clone())
    }

    fn save(&self, catalog: &Catalog) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.catalog = catalog.clone();
        inner.saves += 1;
        Ok(())
    }
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
