//! Subscriptions: which modules and submodules the user wants kept installed.
//!
//! A module is subscribed unless its name is in the opt-out set. Submodules
//! are opted out individually under `"Module/Submodule"` keys.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use shelf_core::types::{is_plain_relative, DatumKind};
use shelf_core::{Catalog, ModuleName, PathTrie};

use crate::collab::Confirmation;
use crate::context::SyncContext;
use crate::error::io_err;
use crate::hasher;
use crate::migrate::exists;
use crate::module::ModuleInstaller;
use crate::staleness::{self, UpdateReport};
use crate::SyncError;

pub fn is_subscribed(catalog: &Catalog, name: &ModuleName) -> bool {
    !catalog.is_opted_out(name.as_str())
}

pub fn is_submodule_subscribed(catalog: &Catalog, name: &ModuleName, submodule: &str) -> bool {
    is_subscribed(catalog, name) && !catalog.is_opted_out(&name.scoped(submodule))
}

/// Owned paths of every opted-out submodule of `name`. Archive entries under
/// these are skipped on install.
pub fn excluded_paths(catalog: &Catalog, name: &ModuleName) -> Vec<String> {
    let Some(manifest) = catalog.manifests.get(name) else {
        return Vec::new();
    };
    manifest
        .submodules
        .iter()
        .filter(|sub| catalog.is_opted_out(&name.scoped(&sub.name)))
        .flat_map(|sub| sub.paths.iter().cloned())
        .collect()
}

// ---------------------------------------------------------------------------
// Requirements
// ---------------------------------------------------------------------------

/// An installed module (or one of its subscribed submodules) that declares a
/// requirement on another module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependent {
    /// `"Module"` or `"Module/Submodule"`.
    pub requirer: String,
    /// Required subpaths; empty means the whole module.
    pub paths: Vec<String>,
}

impl std::fmt::Display for Dependent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.paths.is_empty() {
            write!(f, "{}", self.requirer)
        } else {
            write!(f, "{} (needs {})", self.requirer, self.paths.join(", "))
        }
    }
}

/// Every installed requirer of `target` with the trie it requires.
fn requirers<'a>(catalog: &'a Catalog, target: &ModuleName) -> Vec<(String, &'a PathTrie)> {
    let mut out = Vec::new();
    for name in catalog.installed.keys() {
        if name == target {
            continue;
        }
        let Some(manifest) = catalog.manifests.get(name) else {
            continue;
        };
        if let Some(trie) = manifest.requires.get(target) {
            out.push((name.to_string(), trie));
        }
        for sub in &manifest.submodules {
            if !is_submodule_subscribed(catalog, name, &sub.name) {
                continue;
            }
            if let Some(trie) = sub.requires.get(target) {
                out.push((name.scoped(&sub.name), trie));
            }
        }
    }
    out
}

/// Installed modules that would break if `name` went away.
pub fn dependents_of(catalog: &Catalog, name: &ModuleName) -> Vec<Dependent> {
    requirers(catalog, name)
        .into_iter()
        .map(|(requirer, trie)| Dependent {
            requirer,
            paths: trie.paths(),
        })
        .collect()
}

/// Installed modules whose required subpaths of `name` fall under the
/// owned paths of `submodule`.
pub fn submodule_dependents(catalog: &Catalog, name: &ModuleName, submodule: &str) -> Vec<Dependent> {
    let Some(sub) = catalog
        .manifests
        .get(name)
        .and_then(|m| m.submodule(submodule))
    else {
        return Vec::new();
    };
    requirers(catalog, name)
        .into_iter()
        .filter(|(requirer, _)| *requirer != name.scoped(submodule))
        .filter_map(|(requirer, trie)| {
            let paths: Vec<String> = trie.paths().into_iter().filter(|p| sub.owns(p)).collect();
            (!paths.is_empty()).then_some(Dependent { requirer, paths })
        })
        .collect()
}

/// Modules required by `name` (and its subscribed submodules) that are not
/// installed. Informational only.
pub fn missing_requirements(catalog: &Catalog, name: &ModuleName) -> Vec<ModuleName> {
    let Some(manifest) = catalog.manifests.get(name) else {
        return Vec::new();
    };
    let mut required: BTreeSet<&ModuleName> = manifest.requires.keys().collect();
    for sub in &manifest.submodules {
        if is_submodule_subscribed(catalog, name, &sub.name) {
            required.extend(sub.requires.keys());
        }
    }
    required
        .into_iter()
        .filter(|req| *req != name && !catalog.installed.contains_key(*req))
        .cloned()
        .collect()
}

fn blast_radius(target: &str, dependents: &[Dependent]) -> String {
    if dependents.is_empty() {
        return String::new();
    }
    let list: Vec<String> = dependents.iter().map(|d| format!("  - {d}")).collect();
    format!(
        "\n\nWarning: these installed modules depend on \"{target}\":\n{}",
        list.join("\n")
    )
}

// ---------------------------------------------------------------------------
// Module subscriptions
// ---------------------------------------------------------------------------

pub async fn subscribe(ctx: &SyncContext, name: &ModuleName) -> Result<(), SyncError> {
    ctx.state
        .mutate(|c| {
            c.opt_outs.remove(name.as_str());
        })
        .await?;
    tracing::info!(module = %name, "subscribed");
    Ok(())
}

/// Opt out of `name`. Unless `silent`, offer to delete its folder, listing
/// any installed dependents first.
///
/// Returns true if the folder was deleted.
pub async fn unsubscribe(
    ctx: &SyncContext,
    name: &ModuleName,
    silent: bool,
) -> Result<bool, SyncError> {
    ctx.state
        .mutate(|c| {
            c.opt_outs.insert(name.to_string());
        })
        .await?;
    tracing::info!(module = %name, silent, "unsubscribed");

    let dir = ctx.module_dir(name);
    if silent || !exists(&dir).await? {
        return Ok(false);
    }

    let dependents = ctx.state.read(|c| dependents_of(c, name)).await;
    let delete = ctx
        .prompter
        .confirm(Confirmation::new(
            format!("Delete \"{name}\"?"),
            format!(
                "You will no longer receive updates for \"{name}\". Delete its folder at {} too?{}",
                dir.display(),
                blast_radius(name.as_str(), &dependents)
            ),
            "Delete folder",
            "Keep files",
        ))
        .await;
    if !delete {
        return Ok(false);
    }

    let _guard = ctx.locks.try_acquire(name).ok_or_else(|| {
        SyncError::Consistency(format!("\"{name}\" is being updated; try again later"))
    })?;
    tokio::fs::remove_dir_all(&dir)
        .await
        .map_err(|e| io_err(&dir, e))?;
    ctx.state
        .mutate(|c| {
            c.installed.remove(name);
            c.timestamps.forget(&DatumKind::Module.id(name));
        })
        .await?;
    ctx.notify(&format!("Deleted \"{name}\""));
    Ok(true)
}

// ---------------------------------------------------------------------------
// Submodule subscriptions
// ---------------------------------------------------------------------------

/// Re-include `submodule` of `name`. If the module is installed it is
/// reinstalled straight away so the submodule's files appear.
pub async fn subscribe_submodule(
    ctx: &SyncContext,
    name: &ModuleName,
    submodule: &str,
) -> Result<Option<UpdateReport>, SyncError> {
    require_submodule(ctx, name, submodule).await?;
    ctx.state
        .mutate(|c| {
            c.opt_outs.remove(&name.scoped(submodule));
        })
        .await?;
    tracing::info!(module = %name, submodule, "submodule subscribed");

    let reinstall = ctx
        .state
        .read(|c| c.installed.contains_key(name) && is_subscribed(c, name))
        .await;
    if !reinstall {
        return Ok(None);
    }
    Ok(Some(
        staleness::update(&ModuleInstaller::new(name.clone()), ctx).await,
    ))
}

/// Opt out of `submodule` of `name`. Unless `silent`, offer to delete its
/// owned paths. After deletion the installed baseline is refreshed so the
/// removal does not count as a local edit.
///
/// Returns true if files were deleted.
pub async fn unsubscribe_submodule(
    ctx: &SyncContext,
    name: &ModuleName,
    submodule: &str,
    silent: bool,
) -> Result<bool, SyncError> {
    let owned = require_submodule(ctx, name, submodule).await?;
    let dir = ctx.module_dir(name);
    let targets = owned
        .iter()
        .map(|path| owned_target(&dir, path))
        .collect::<Result<Vec<_>, _>>()?;

    ctx.state
        .mutate(|c| {
            c.opt_outs.insert(name.scoped(submodule));
        })
        .await?;
    tracing::info!(module = %name, submodule, silent, "submodule unsubscribed");

    if silent || !exists(&dir).await? {
        return Ok(false);
    }

    let dependents = ctx
        .state
        .read(|c| submodule_dependents(c, name, submodule))
        .await;
    let scoped = name.scoped(submodule);
    let delete = ctx
        .prompter
        .confirm(Confirmation::new(
            format!("Delete \"{scoped}\"?"),
            format!(
                "Delete these paths from {}?\n  {}{}",
                dir.display(),
                owned.join("\n  "),
                blast_radius(&scoped, &dependents)
            ),
            "Delete files",
            "Keep files",
        ))
        .await;
    if !delete {
        return Ok(false);
    }

    let _guard = ctx.locks.try_acquire(name).ok_or_else(|| {
        SyncError::Consistency(format!("\"{name}\" is being updated; try again later"))
    })?;

    let baseline = ctx
        .state
        .read(|c| c.installed.get(name).map(|r| r.content_hash.clone()))
        .await;
    let was_pristine = match &baseline {
        Some(hash) => hasher::fingerprint(&dir).await? == *hash,
        None => false,
    };

    for target in &targets {
        remove_path(target).await?;
    }

    if was_pristine {
        let refreshed = hasher::fingerprint(&dir).await?;
        ctx.state
            .mutate(|c| {
                if let Some(record) = c.installed.get_mut(name) {
                    record.content_hash = refreshed;
                }
            })
            .await?;
    }
    ctx.notify(&format!("Deleted \"{scoped}\""));
    Ok(true)
}

/// Owned paths of `submodule`, or a consistency error if the manifest does
/// not declare it.
async fn require_submodule(
    ctx: &SyncContext,
    name: &ModuleName,
    submodule: &str,
) -> Result<Vec<String>, SyncError> {
    ctx.state
        .read(|c| {
            c.manifests
                .get(name)
                .and_then(|m| m.submodule(submodule))
                .map(|s| s.paths.clone())
        })
        .await
        .ok_or_else(|| {
            SyncError::Consistency(format!("\"{name}\" has no submodule \"{submodule}\""))
        })
}

/// `dir/path`, provided `path` cannot land outside `dir`.
fn owned_target(dir: &Path, path: &str) -> Result<PathBuf, SyncError> {
    let plain = is_plain_relative(path)
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !plain {
        return Err(SyncError::UnsafeEntry {
            name: path.to_string(),
        });
    }
    Ok(dir.join(path))
}

async fn remove_path(path: &Path) -> Result<(), SyncError> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_err(path, e)),
    };
    let removed = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    removed.map_err(|e| io_err(path, e))
}
