//! # shelf-sync
//!
//! Keeps a library of module folders in step with their published manifests.
//!
//! Call [`pipeline::check_for_updates`] for a normal pass (catalog, then
//! manifests, then module folders, each only when stale) or
//! [`pipeline::force_update`] to run every updater. Individual updaters
//! implement [`staleness::Datum`] and can be driven on their own with
//! [`staleness::update`].

pub mod archive;
pub mod collab;
pub mod context;
pub mod error;
pub mod hasher;
pub mod manifest;
pub mod manifest_list;
pub mod memory;
pub mod migrate;
pub mod module;
pub mod pipeline;
pub mod staleness;
pub mod status;
pub mod subscription;

pub use collab::{Clock, Confirmation, Fetcher, Prompter, SystemClock};
pub use context::{ModuleLocks, StateHandle, SyncContext};
pub use error::SyncError;
pub use manifest::ManifestSync;
pub use manifest_list::ManifestListSync;
pub use module::ModuleInstaller;
pub use pipeline::{check_for_updates, force_update, PassReport};
pub use staleness::{Datum, UpdateReport};

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::{Cursor, Write};
    use std::path::PathBuf;
    use std::sync::Arc;

    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    use shelf_core::{Catalog, MemoryCatalogStore, ModuleManifest, ModuleName, ShelfConfig};

    use crate::context::{StateHandle, SyncContext};
    use crate::memory::{ManualClock, ScriptedPrompter, StaticFetcher};

    /// In-memory archive; names ending in `/` become directory entries.
    pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, body) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body).unwrap();
            }
        }
        zip.finish().unwrap().into_inner()
    }

    pub fn manifest(name: &str, version: &str) -> ModuleManifest {
        ModuleManifest {
            name: ModuleName::from(name),
            info_url: format!("https://example.org/{name}"),
            description: format!("{name} notes"),
            version: version.to_string(),
            requires: Default::default(),
            archive_url: format!("https://example.org/{name}-{version}.zip"),
            submodules: vec![],
        }
    }

    /// A context wired to in-memory collaborators and a scratch library.
    pub struct Harness {
        pub ctx: SyncContext,
        pub fetcher: Arc<StaticFetcher>,
        pub prompter: Arc<ScriptedPrompter>,
        pub clock: Arc<ManualClock>,
        pub store: Arc<MemoryCatalogStore>,
        _dir: TempDir,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::build(ScriptedPrompter::answering(true), ShelfConfig::default())
        }

        pub fn with_prompter(prompter: ScriptedPrompter) -> Self {
            Self::build(prompter, ShelfConfig::default())
        }

        pub fn with_config(config: ShelfConfig) -> Self {
            Self::build(ScriptedPrompter::answering(true), config)
        }

        fn build(prompter: ScriptedPrompter, config: ShelfConfig) -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(MemoryCatalogStore::default());
            let fetcher = Arc::new(StaticFetcher::new());
            let prompter = Arc::new(prompter);
            let clock = Arc::new(ManualClock::fixed());
            let state = StateHandle::load(store.clone()).unwrap();
            let ctx = SyncContext::new(
                state,
                fetcher.clone(),
                prompter.clone(),
                clock.clone(),
                config,
                dir.path().join("library"),
            );
            Self {
                ctx,
                fetcher,
                prompter,
                clock,
                store,
                _dir: dir,
            }
        }

        pub async fn seed(&self, f: impl FnOnce(&mut Catalog)) {
            self.ctx.state.mutate(f).await.unwrap();
        }

        pub fn dir(&self, name: &str) -> PathBuf {
            self.ctx.module_dir(&ModuleName::from(name))
        }

        /// Publish `manifest`'s archive with `entries`.
        pub fn publish(&self, manifest: &ModuleManifest, entries: &[(&str, &[u8])]) {
            self.fetcher
                .insert(manifest.archive_url.clone(), zip_bytes(entries));
        }
    }
}
