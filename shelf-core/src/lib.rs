//! Shelf core library: domain types, catalog persistence, configuration.
//!
//! - [`types`]: module names, manifests, installed records, the [`Catalog`] aggregate
//! - [`store`]: [`CatalogStore`] and its JSON / in-memory implementations
//! - [`config`]: [`ShelfConfig`] loaded from `~/.shelf/config.yaml`
//! - [`error`]: [`StoreError`]

pub mod config;
pub mod error;
pub mod store;
pub mod types;

pub use config::ShelfConfig;
pub use error::StoreError;
pub use store::{CatalogStore, JsonCatalogStore, MemoryCatalogStore};
pub use types::{
    Catalog, InstalledRecord, ModuleManifest, ModuleName, PathTrie, Requires, Submodule,
    Timestamps,
};
