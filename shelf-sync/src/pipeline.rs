//! Full update pass.
//!
//! ```text
//! ManifestListSync ──▶ ManifestSync (per registered name)
//!        ──▶ forget missing folders ──▶ offer new modules
//!        ──▶ ModuleInstaller (per subscribed module, concurrently)
//! ```
//!
//! [`check_for_updates`] runs each step only when its datum is due;
//! [`force_update`] runs every eligible updater regardless of staleness.

use std::collections::{BTreeMap, BTreeSet};

use tokio::task::JoinSet;

use shelf_core::types::DatumKind;
use shelf_core::{Catalog, ModuleName};

use crate::collab::Confirmation;
use crate::context::SyncContext;
use crate::manifest::ManifestSync;
use crate::manifest_list::ManifestListSync;
use crate::migrate::exists;
use crate::module::{forget_missing_folders, ModuleInstaller};
use crate::staleness::{self, Datum, UpdateReport};
use crate::subscription::is_subscribed;
use crate::SyncError;

/// What one pass did. Updaters that were not due are absent.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub catalog: Option<UpdateReport>,
    pub manifests: BTreeMap<ModuleName, UpdateReport>,
    /// Installed records dropped because the folder was gone.
    pub missing_folders: Vec<ModuleName>,
    /// Newly discovered modules the user declined.
    pub declined: Vec<ModuleName>,
    pub modules: BTreeMap<ModuleName, UpdateReport>,
}

impl PassReport {
    pub fn failures(&self) -> usize {
        self.catalog
            .iter()
            .chain(self.manifests.values())
            .chain(self.modules.values())
            .filter(|r| r.is_failure())
            .count()
    }
}

/// Normal pass: each updater runs only if it needs an update.
pub async fn check_for_updates(ctx: &SyncContext) -> Result<PassReport, SyncError> {
    run_pass(ctx, false).await
}

/// Run every updater regardless of staleness. Opt-outs and overwrite
/// prompts still apply.
pub async fn force_update(ctx: &SyncContext) -> Result<PassReport, SyncError> {
    run_pass(ctx, true).await
}

async fn run_pass(ctx: &SyncContext, force: bool) -> Result<PassReport, SyncError> {
    let mut report = PassReport::default();
    tracing::info!(force, "update pass started");

    let list = ManifestListSync;
    if due(ctx, &list, force).await {
        report.catalog = Some(staleness::update(&list, ctx).await);
    }

    let names = ctx.state.read(Catalog::registered_names).await;
    for name in names {
        let sync = ManifestSync::new(name.clone());
        if due(ctx, &sync, force).await {
            let outcome = staleness::update(&sync, ctx).await;
            report.manifests.insert(name, outcome);
        }
    }

    report.missing_folders = forget_missing_folders(ctx).await?;

    let (fresh, declined) = offer_new_modules(ctx).await?;
    report.declined = declined;

    let candidates: Vec<ModuleName> = ctx.state.read(|c| c.manifests.keys().cloned().collect()).await;
    let mut tasks = JoinSet::new();
    for name in candidates {
        let installer = if fresh.contains(&name) {
            ModuleInstaller::fresh_install(name.clone())
        } else {
            ModuleInstaller::new(name.clone())
        };
        if !due(ctx, &installer, force).await {
            continue;
        }
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let outcome = staleness::update(&installer, &ctx).await;
            (name, outcome)
        });
    }
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, outcome)) => {
                report.modules.insert(name, outcome);
            }
            Err(err) => tracing::error!(error = %err, "module update task panicked"),
        }
    }

    tracing::info!(
        manifests = report.manifests.len(),
        modules = report.modules.len(),
        failures = report.failures(),
        "update pass finished",
    );
    Ok(report)
}

/// `force` skips the staleness check but never the eligibility check.
async fn due<D: Datum>(ctx: &SyncContext, datum: &D, force: bool) -> bool {
    let now = ctx.now_ms();
    ctx.state
        .read(|c| {
            if force {
                datum.is_eligible(c)
            } else {
                staleness::needs_update(datum, c, &ctx.config, now)
            }
        })
        .await
}

/// Modules with a manifest that were never installed, have no folder, are
/// subscribed and were never attempted.
async fn new_modules(ctx: &SyncContext) -> Result<Vec<ModuleName>, SyncError> {
    let candidates: Vec<ModuleName> = ctx
        .state
        .read(|c| {
            c.manifests
                .keys()
                .filter(|name| {
                    let id = DatumKind::Module.id(name);
                    !c.installed.contains_key(*name)
                        && is_subscribed(c, name)
                        && c.timestamps.last_success(&id).is_none()
                        && c.timestamps.last_punt(&id).is_none()
                })
                .cloned()
                .collect()
        })
        .await;

    let mut out = Vec::new();
    for name in candidates {
        if !exists(&ctx.module_dir(&name)).await? {
            out.push(name);
        }
    }
    Ok(out)
}

/// Ask about each new module. Declining opts it out silently. Returns the
/// accepted modules (safe to install without a modification check) and the
/// declined ones.
async fn offer_new_modules(
    ctx: &SyncContext,
) -> Result<(BTreeSet<ModuleName>, Vec<ModuleName>), SyncError> {
    let mut accepted = BTreeSet::new();
    let mut declined = Vec::new();

    for name in new_modules(ctx).await? {
        if ctx.config.prompt_new_modules {
            let (description, info_url) = ctx
                .state
                .read(|c| {
                    c.manifests
                        .get(&name)
                        .map(|m| (m.description.clone(), m.info_url.clone()))
                        .unwrap_or_default()
                })
                .await;
            let install = ctx
                .prompter
                .confirm(Confirmation::new(
                    "A new module is available!",
                    format!("{name}: {description}\n{info_url}\n\nWould you like to install it?"),
                    format!("Download and install \"{name}\""),
                    format!("Don't subscribe to \"{name}\""),
                ))
                .await;
            if !install {
                ctx.state
                    .mutate(|c| {
                        c.opt_outs.insert(name.to_string());
                    })
                    .await?;
                tracing::info!(module = %name, "new module declined");
                declined.push(name);
                continue;
            }
        }
        accepted.insert(name);
    }
    Ok((accepted, declined))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ScriptedPrompter;
    use crate::test_support::{manifest, Harness};
    use serde_json::json;

    const ENTRIES: &[(&str, &[u8])] = &[("a.md", b"alpha")];

    fn publish_module(h: &Harness, name: &str, version: &str) {
        let m = manifest(name, version);
        h.publish(&m, ENTRIES);
        let url = format!("https://example.org/{name}.json");
        h.fetcher.insert_json(
            url,
            &json!({
                "folder": name,
                "more_info": m.info_url,
                "description": m.description,
                "version": version,
                "requires": {},
                "zip": m.archive_url,
            }),
        );
    }

    fn publish_catalog(h: &Harness, names: &[&str]) {
        let map: serde_json::Map<String, serde_json::Value> = names
            .iter()
            .map(|n| (n.to_string(), json!(format!("https://example.org/{n}.json"))))
            .collect();
        h.fetcher
            .insert_json(h.ctx.config.catalog_url.clone(), &serde_json::Value::Object(map));
    }

    #[tokio::test]
    async fn first_pass_installs_everything() {
        let h = Harness::new();
        publish_catalog(&h, &["A", "B"]);
        publish_module(&h, "A", "1.0.0");
        publish_module(&h, "B", "2.0.0");

        let report = check_for_updates(&h.ctx).await.unwrap();
        assert_eq!(report.catalog, Some(UpdateReport::Completed));
        assert_eq!(report.manifests.len(), 2);
        assert_eq!(report.modules.len(), 2);
        assert_eq!(report.failures(), 0);
        assert!(h.dir("A").join("a.md").exists());
        assert!(h.dir("B").join("a.md").exists());
        // One discovery prompt per module, no overwrite prompts.
        assert_eq!(h.prompter.asked().len(), 2);
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let h = Harness::new();
        publish_catalog(&h, &["A"]);
        publish_module(&h, "A", "1.0.0");
        check_for_updates(&h.ctx).await.unwrap();
        let requests = h.fetcher.requests().len();

        let report = check_for_updates(&h.ctx).await.unwrap();
        assert_eq!(report, PassReport::default());
        assert_eq!(h.fetcher.requests().len(), requests);
    }

    #[tokio::test]
    async fn declined_discovery_opts_out_silently() {
        let h = Harness::with_prompter(ScriptedPrompter::answering(false));
        publish_catalog(&h, &["A"]);
        publish_module(&h, "A", "1.0.0");

        let report = check_for_updates(&h.ctx).await.unwrap();
        assert_eq!(report.declined, vec![ModuleName::from("A")]);
        assert!(report.modules.is_empty());
        assert!(!h.dir("A").exists());
        assert!(h.store.snapshot().is_opted_out("A"));
    }

    #[tokio::test]
    async fn force_update_reruns_fresh_updaters() {
        let h = Harness::new();
        publish_catalog(&h, &["A"]);
        publish_module(&h, "A", "1.0.0");
        check_for_updates(&h.ctx).await.unwrap();

        let report = force_update(&h.ctx).await.unwrap();
        assert_eq!(report.catalog, Some(UpdateReport::Completed));
        assert_eq!(report.manifests.len(), 1);
        assert_eq!(report.modules.get("A"), Some(&UpdateReport::Completed));
    }

    #[tokio::test]
    async fn missing_folder_is_reinstalled() {
        let h = Harness::new();
        publish_catalog(&h, &["A"]);
        publish_module(&h, "A", "1.0.0");
        check_for_updates(&h.ctx).await.unwrap();
        std::fs::remove_dir_all(h.dir("A")).unwrap();
        h.clock.advance(chrono::Duration::days(2));

        let report = check_for_updates(&h.ctx).await.unwrap();
        assert_eq!(report.missing_folders, vec![ModuleName::from("A")]);
        assert_eq!(report.modules.get("A"), Some(&UpdateReport::Completed));
        assert!(h.dir("A").join("a.md").exists());
    }
}
