//! ModuleInstaller: keep one module folder at its manifest's version.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use shelf_core::types::DatumKind;
use shelf_core::{Catalog, InstalledRecord, ModuleName, ShelfConfig};

use crate::archive;
use crate::collab::Confirmation;
use crate::context::SyncContext;
use crate::hasher;
use crate::migrate::exists;
use crate::staleness::{Cadence, Datum, Performed};
use crate::subscription::{excluded_paths, is_subscribed};
use crate::SyncError;

/// Installs or upgrades one module folder from its manifest's archive.
#[derive(Debug, Clone)]
pub struct ModuleInstaller {
    name: ModuleName,
    warn_on_overwrite: bool,
}

impl ModuleInstaller {
    pub fn new(name: ModuleName) -> Self {
        Self {
            name,
            warn_on_overwrite: true,
        }
    }

    /// Skip the local-modification check. Only for first installs into a
    /// folder that did not exist when the install was offered.
    pub fn fresh_install(name: ModuleName) -> Self {
        Self {
            name,
            warn_on_overwrite: false,
        }
    }

    pub fn name(&self) -> &ModuleName {
        &self.name
    }

    pub fn is_installed(&self, catalog: &Catalog) -> bool {
        catalog.installed.contains_key(&self.name)
    }

    pub fn is_current(&self, catalog: &Catalog) -> bool {
        catalog.is_current(&self.name)
    }

    /// Has the folder drifted from the installed baseline?
    ///
    /// A folder with no baseline counts as modified. On constrained
    /// platforms, folders above the item threshold are judged by comparing
    /// the newest file mtime against the last install time plus slack
    /// instead of hashing every file.
    async fn is_modified(
        &self,
        ctx: &SyncContext,
        dir: &Path,
        installed: Option<&InstalledRecord>,
        last_install_ms: Option<i64>,
    ) -> Result<bool, SyncError> {
        let Some(record) = installed else {
            return Ok(true);
        };

        if ctx.config.constrained_platform {
            let stats = hasher::tree_stats(dir).await?;
            if stats.files > ctx.config.fingerprint_item_threshold {
                let Some(installed_at) = last_install_ms else {
                    return Ok(true);
                };
                let cutoff = installed_at + ctx.config.mtime_slack().num_milliseconds();
                let newest = stats
                    .latest_mtime
                    .map(|t| DateTime::<Utc>::from(t).timestamp_millis());
                tracing::debug!(
                    module = %self.name,
                    files = stats.files,
                    "using mtime heuristic for modification check",
                );
                return Ok(newest.is_some_and(|m| m > cutoff));
            }
        }

        Ok(hasher::fingerprint(dir).await? != record.content_hash)
    }
}

#[async_trait]
impl Datum for ModuleInstaller {
    fn id(&self) -> String {
        DatumKind::Module.id(&self.name)
    }

    fn cadence(&self, config: &ShelfConfig) -> Cadence {
        Cadence::RetryWindow(config.module_retry_window())
    }

    fn is_incomplete(&self, catalog: &Catalog) -> bool {
        !self.is_installed(catalog) || !self.is_current(catalog)
    }

    fn is_eligible(&self, catalog: &Catalog) -> bool {
        is_subscribed(catalog, &self.name) && catalog.manifests.contains_key(&self.name)
    }

    async fn perform(&self, ctx: &SyncContext) -> Result<Performed, SyncError> {
        let Some(_guard) = ctx.locks.try_acquire(&self.name) else {
            return Ok(Performed::Busy);
        };

        let id = self.id();
        let (manifest, installed, last_install, excludes) = ctx
            .state
            .read(|c| {
                (
                    c.manifests.get(&self.name).cloned(),
                    c.installed.get(&self.name).cloned(),
                    c.timestamps.last_success(&id),
                    excluded_paths(c, &self.name),
                )
            })
            .await;
        let manifest = manifest.ok_or_else(|| {
            SyncError::Consistency(format!("no manifest known for \"{}\"", self.name))
        })?;

        let dir = ctx.module_dir(&self.name);
        if self.warn_on_overwrite
            && exists(&dir).await?
            && self
                .is_modified(ctx, &dir, installed.as_ref(), last_install)
                .await?
        {
            let overwrite = ctx
                .prompter
                .confirm(Confirmation::new(
                    format!("Overwrite changes to \"{}\"?", self.name),
                    format!(
                        "Files in {} were changed since \"{}\" was installed. \
                         Updating to v{} will overwrite or delete those changes.",
                        dir.display(),
                        self.name,
                        manifest.version
                    ),
                    "Overwrite",
                    "Not now",
                ))
                .await;
            if !overwrite {
                tracing::info!(module = %self.name, "overwrite declined, deferring");
                ctx.notify(&format!(
                    "Skipped updating \"{}\" to protect your changes. Will ask again later.",
                    self.name
                ));
                return Ok(Performed::Deferred);
            }
        }

        let report =
            archive::install(ctx.fetcher.as_ref(), &manifest.archive_url, &dir, &excludes).await?;

        let record = InstalledRecord {
            version: manifest.version.clone(),
            content_hash: report.digest,
        };
        ctx.state
            .mutate(|c| {
                c.installed.insert(self.name.clone(), record);
            })
            .await?;

        tracing::info!(module = %self.name, version = %manifest.version, "module installed");
        ctx.notify(&format!("\"{}\" v{} installed", self.name, manifest.version));
        Ok(Performed::Completed)
    }
}

/// Drop installed records whose folder has disappeared, so those modules
/// install again on the next pass. Returns the affected names.
pub async fn forget_missing_folders(ctx: &SyncContext) -> Result<Vec<ModuleName>, SyncError> {
    let installed: Vec<ModuleName> = ctx.state.read(|c| c.installed.keys().cloned().collect()).await;

    let mut missing = Vec::new();
    for name in installed {
        if !exists(&ctx.module_dir(&name)).await? {
            missing.push(name);
        }
    }
    if missing.is_empty() {
        return Ok(missing);
    }

    ctx.state
        .mutate(|c| {
            for name in &missing {
                c.installed.remove(name);
            }
        })
        .await?;
    for name in &missing {
        tracing::info!(module = %name, "folder missing, will reinstall");
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ScriptedPrompter;
    use crate::staleness::{needs_update, update, UpdateReport};
    use crate::test_support::{manifest, Harness};
    use filetime::FileTime;
    use std::fs;

    const ENTRIES: &[(&str, &[u8])] = &[("a.md", b"alpha"), ("notes/b.md", b"beta")];

    async fn seed(h: &Harness, version: &str) -> shelf_core::ModuleManifest {
        let m = manifest("A", version);
        h.publish(&m, ENTRIES);
        let stored = m.clone();
        h.seed(move |c| {
            c.manifests.insert("A".into(), stored);
        })
        .await;
        m
    }

    #[tokio::test]
    async fn first_install_records_digest() {
        let h = Harness::new();
        seed(&h, "1.0.0").await;

        let installer = ModuleInstaller::new("A".into());
        assert_eq!(update(&installer, &h.ctx).await, UpdateReport::Completed);

        let saved = h.store.snapshot();
        let record = &saved.installed[&ModuleName::from("A")];
        assert_eq!(record.version, "1.0.0");
        assert_eq!(record.content_hash, hasher::fingerprint_blocking(&h.dir("A")).unwrap());
        assert!(h.prompter.asked().is_empty());
        assert_eq!(h.prompter.notices(), vec!["\"A\" v1.0.0 installed"]);
        assert!(!needs_update(&installer, &saved, &h.ctx.config, h.ctx.now_ms()));
    }

    #[tokio::test]
    async fn new_version_waits_for_retry_window() {
        let h = Harness::new();
        seed(&h, "1.0.0").await;
        let installer = ModuleInstaller::new("A".into());
        update(&installer, &h.ctx).await;

        seed(&h, "1.1.0").await;
        let due = |h: &Harness| {
            let catalog = h.store.snapshot();
            needs_update(&installer, &catalog, &h.ctx.config, h.ctx.now_ms())
        };
        assert!(!due(&h));
        h.clock.advance(chrono::Duration::hours(25));
        assert!(due(&h));
    }

    #[tokio::test]
    async fn opted_out_module_is_not_eligible() {
        let h = Harness::new();
        seed(&h, "1.0.0").await;
        h.seed(|c| {
            c.opt_outs.insert("A".to_string());
        })
        .await;
        let catalog = h.store.snapshot();
        let installer = ModuleInstaller::new("A".into());
        assert!(!needs_update(&installer, &catalog, &h.ctx.config, h.ctx.now_ms()));
    }

    #[tokio::test]
    async fn unmodified_folder_upgrades_without_prompt() {
        let h = Harness::new();
        seed(&h, "1.0.0").await;
        update(&ModuleInstaller::new("A".into()), &h.ctx).await;
        seed(&h, "1.1.0").await;

        assert_eq!(
            update(&ModuleInstaller::new("A".into()), &h.ctx).await,
            UpdateReport::Completed
        );
        assert!(h.prompter.asked().is_empty());
        assert_eq!(h.store.snapshot().installed[&ModuleName::from("A")].version, "1.1.0");
    }

    #[tokio::test]
    async fn modified_folder_prompts_once_and_decline_punts() {
        let h = Harness::with_prompter(ScriptedPrompter::answering(true).with_answers([false]));
        seed(&h, "1.0.0").await;
        update(&ModuleInstaller::new("A".into()), &h.ctx).await;
        seed(&h, "1.1.0").await;
        fs::write(h.dir("A").join("a.md"), "my edit").unwrap();

        let report = update(&ModuleInstaller::new("A".into()), &h.ctx).await;
        assert_eq!(report, UpdateReport::Deferred);
        assert_eq!(h.prompter.asked().len(), 1);
        assert_eq!(fs::read_to_string(h.dir("A").join("a.md")).unwrap(), "my edit");
        let saved = h.store.snapshot();
        assert_eq!(saved.installed[&ModuleName::from("A")].version, "1.0.0");
        assert!(saved.timestamps.last_punt("A Module").is_some());
    }

    #[tokio::test]
    async fn folder_without_baseline_counts_as_modified() {
        let h = Harness::with_prompter(ScriptedPrompter::answering(false));
        seed(&h, "1.0.0").await;
        fs::create_dir_all(h.dir("A")).unwrap();
        fs::write(h.dir("A").join("mine.md"), "x").unwrap();

        let report = update(&ModuleInstaller::new("A".into()), &h.ctx).await;
        assert_eq!(report, UpdateReport::Deferred);
        assert!(h.dir("A").join("mine.md").exists());
    }

    #[tokio::test]
    async fn fresh_install_skips_the_check() {
        let h = Harness::with_prompter(ScriptedPrompter::answering(false));
        seed(&h, "1.0.0").await;
        fs::create_dir_all(h.dir("A")).unwrap();

        let report = update(&ModuleInstaller::fresh_install("A".into()), &h.ctx).await;
        assert_eq!(report, UpdateReport::Completed);
        assert!(h.prompter.asked().is_empty());
    }

    #[tokio::test]
    async fn install_failure_is_notified_and_not_stamped() {
        let h = Harness::new();
        let m = seed(&h, "1.0.0").await;
        h.fetcher.remove(&m.archive_url);

        let report = update(&ModuleInstaller::new("A".into()), &h.ctx).await;
        assert!(report.is_failure());
        let saved = h.store.snapshot();
        assert!(saved.installed.is_empty());
        assert!(saved.timestamps.last_success("A Module").is_none());
        assert_eq!(h.prompter.notices().len(), 1);
        assert!(h.prompter.notices()[0].contains("A Module"));
    }

    #[tokio::test]
    async fn busy_module_reports_in_progress() {
        let h = Harness::new();
        seed(&h, "1.0.0").await;
        let _held = h.ctx.locks.try_acquire(&"A".into()).unwrap();

        let report = update(&ModuleInstaller::new("A".into()), &h.ctx).await;
        assert_eq!(report, UpdateReport::InProgress);
        assert!(h.fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn excluded_submodule_paths_are_not_installed() {
        let h = Harness::new();
        let mut m = manifest("A", "1.0.0");
        m.submodules.push(shelf_core::Submodule {
            name: "Notes".to_string(),
            paths: vec!["notes".to_string()],
            requires: Default::default(),
        });
        h.publish(&m, ENTRIES);
        h.seed(move |c| {
            c.manifests.insert("A".into(), m);
            c.opt_outs.insert("A/Notes".to_string());
        })
        .await;

        update(&ModuleInstaller::new("A".into()), &h.ctx).await;
        assert!(h.dir("A").join("a.md").exists());
        assert!(!h.dir("A").join("notes").exists());
    }

    #[tokio::test]
    async fn mtime_heuristic_on_constrained_platforms() {
        let h = Harness::with_config(ShelfConfig {
            constrained_platform: true,
            fingerprint_item_threshold: 1,
            ..ShelfConfig::default()
        });
        seed(&h, "1.0.0").await;
        update(&ModuleInstaller::new("A".into()), &h.ctx).await;
        seed(&h, "1.1.0").await;

        // The clock sits in the past relative to real file mtimes, so pin
        // every file to before the recorded install.
        let dir = h.dir("A");
        let before = FileTime::from_unix_time(h.ctx.clock.now().timestamp() - 3600, 0);
        for rel in ["a.md", "notes/b.md"] {
            filetime::set_file_mtime(dir.join(rel), before).unwrap();
        }
        // Content differs from the baseline, but the heuristic only sees mtimes.
        fs::write(dir.join("a.md"), "edited").unwrap();
        filetime::set_file_mtime(dir.join("a.md"), before).unwrap();

        let installer = ModuleInstaller::new("A".into());
        let catalog = h.store.snapshot();
        let record = catalog.installed.get(&ModuleName::from("A"));
        let last = catalog.timestamps.last_success("A Module");
        assert!(!installer.is_modified(&h.ctx, &dir, record, last).await.unwrap());

        let after = FileTime::from_unix_time(h.ctx.clock.now().timestamp() + 60, 0);
        filetime::set_file_mtime(dir.join("a.md"), after).unwrap();
        assert!(installer.is_modified(&h.ctx, &dir, record, last).await.unwrap());
    }

    #[tokio::test]
    async fn missing_folder_drops_installed_record() {
        let h = Harness::new();
        seed(&h, "1.0.0").await;
        update(&ModuleInstaller::new("A".into()), &h.ctx).await;
        fs::remove_dir_all(h.dir("A")).unwrap();

        let dropped = forget_missing_folders(&h.ctx).await.unwrap();
        assert_eq!(dropped, vec![ModuleName::from("A")]);
        assert!(h.store.snapshot().installed.is_empty());
    }
}
