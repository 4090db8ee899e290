//! ManifestListSync: refresh the canonical name → manifest URL map.
//!
//! Before the new map is committed it is diffed against the stored one.
//! A name that disappeared is either a rename (its URL reappears under
//! exactly one new name) or a removal from the catalog.
//!
//! Duplicate URLs make the reverse lookup ambiguous. A rename is recognised
//! only when the pairing is one-to-one: exactly one vanished name had the
//! URL and exactly one newly appeared name has it. Any other shape is
//! treated as removals, which never move user data implicitly.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use shelf_core::types::MODULE_LIST_ID;
use shelf_core::{Catalog, ModuleName, ShelfConfig};

use crate::collab::Confirmation;
use crate::context::SyncContext;
use crate::error::io_err;
use crate::manifest::check_module_name;
use crate::migrate::{self, exists, Migration};
use crate::staleness::{Cadence, Datum, Performed};
use crate::SyncError;

pub type CanonicalMap = BTreeMap<ModuleName, String>;

/// One reconciliation step between two catalog versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogChange {
    Renamed { from: ModuleName, to: ModuleName },
    Removed(ModuleName),
}

/// Validate the canonical catalog document fetched from `url`.
pub fn parse_catalog(url: &str, value: &Value) -> Result<CanonicalMap, SyncError> {
    let invalid = |message: String| SyncError::Validation {
        url: url.to_string(),
        message,
    };
    let obj = value
        .as_object()
        .ok_or_else(|| invalid("catalog is not a JSON object".to_string()))?;

    let mut map = CanonicalMap::new();
    for (name, entry) in obj {
        check_module_name(url, name)?;
        let manifest_url = entry
            .as_str()
            .ok_or_else(|| invalid(format!("URL for {name:?} is not a string")))?;
        map.insert(ModuleName::from(name.as_str()), manifest_url.to_string());
    }
    Ok(map)
}

/// Diff `previous` against `next`.
pub fn reconcile(previous: &CanonicalMap, next: &CanonicalMap) -> Vec<CatalogChange> {
    let vanished: Vec<(&ModuleName, &String)> = previous
        .iter()
        .filter(|(name, _)| !next.contains_key(*name))
        .collect();

    vanished
        .iter()
        .map(|(name, url)| {
            let same_url_vanished = vanished.iter().filter(|(_, u)| u == url).count();
            let mut appeared = next
                .iter()
                .filter(|(n, u)| u == url && !previous.contains_key(*n))
                .map(|(n, _)| n);
            match (same_url_vanished, appeared.next(), appeared.next()) {
                (1, Some(to), None) => CatalogChange::Renamed {
                    from: (*name).clone(),
                    to: to.clone(),
                },
                _ => CatalogChange::Removed((*name).clone()),
            }
        })
        .collect()
}

/// Keeps `Catalog::canonical` in step with the published catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestListSync;

#[async_trait]
impl Datum for ManifestListSync {
    fn id(&self) -> String {
        MODULE_LIST_ID.to_string()
    }

    fn cadence(&self, config: &ShelfConfig) -> Cadence {
        Cadence::Periodic(config.list_interval())
    }

    fn is_incomplete(&self, catalog: &Catalog) -> bool {
        catalog.canonical.is_empty()
    }

    async fn perform(&self, ctx: &SyncContext) -> Result<Performed, SyncError> {
        let url = ctx.config.catalog_url.clone();
        let next = parse_catalog(&url, &ctx.fetcher.fetch_json(&url).await?)?;

        // Diff against whatever is stored now, not a value read earlier.
        let previous = ctx.state.read(|c| c.canonical.clone()).await;

        // An aborted rename keeps the old name registered and the new one
        // out, so the committed map always agrees with the moved state.
        let mut committed = next;
        let mut aborted = 0;
        for change in reconcile(&previous, &committed) {
            match change {
                CatalogChange::Renamed { from, to } => {
                    if migrate::rename_module(ctx, &from, &to).await? == Migration::Aborted {
                        tracing::info!(from = %from, to = %to, "catalog rename aborted");
                        if let Some(url) = committed.remove(&to) {
                            committed.insert(from, url);
                        }
                        aborted += 1;
                    }
                }
                CatalogChange::Removed(name) => remove_module(ctx, &name).await?,
            }
        }

        let count = committed.len();
        ctx.state.mutate(|c| c.canonical = committed).await?;
        tracing::info!(modules = count, aborted, "catalog refreshed");
        if aborted > 0 {
            return Ok(Performed::Deferred);
        }
        Ok(Performed::Completed)
    }
}

/// A module dropped from the catalog. User-added registrations under the
/// same name survive; otherwise its state is forgotten and the user decides
/// whether the folder goes too.
async fn remove_module(ctx: &SyncContext, name: &ModuleName) -> Result<(), SyncError> {
    if ctx.state.read(|c| c.user_added.contains_key(name)).await {
        tracing::debug!(module = %name, "dropped from catalog but registered by the user");
        return Ok(());
    }

    let dir = ctx.module_dir(name);
    if exists(&dir).await? {
        let delete = ctx
            .prompter
            .confirm(Confirmation::new(
                format!("\"{name}\" was removed from the catalog"),
                format!(
                    "\"{name}\" is no longer published and will not receive updates. \
                     Delete its folder at {}?",
                    dir.display()
                ),
                "Delete folder",
                "Keep files",
            ))
            .await;
        if delete {
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| io_err(&dir, e))?;
        }
    }

    ctx.state.mutate(|c| c.forget_module(name)).await?;
    tracing::info!(module = %name, "module removed from catalog");
    Ok(())
}
