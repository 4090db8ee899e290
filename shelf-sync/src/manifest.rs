//! ManifestSync: fetch and validate one module's manifest.
//!
//! Also home to the user-added module registry, which is the only way a
//! manifest URL outside the canonical catalog enters the catalog.

use async_trait::async_trait;
use serde_json::{Map, Value};

use shelf_core::types::{is_plain_relative, requires_from_json, DatumKind};
use shelf_core::{Catalog, ModuleManifest, ModuleName, Requires, ShelfConfig, Submodule};

use crate::context::SyncContext;
use crate::migrate::{self, Migration};
use crate::staleness::{Cadence, Datum, Performed};
use crate::subscription;
use crate::SyncError;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn invalid(url: &str, message: impl Into<String>) -> SyncError {
    SyncError::Validation {
        url: url.to_string(),
        message: message.into(),
    }
}

/// A module name doubles as a folder name, so it must be a single plain
/// path component.
pub fn check_module_name(url: &str, name: &str) -> Result<(), SyncError> {
    let bad = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(invalid(url, format!("{name:?} is not a usable module name")));
    }
    Ok(())
}

fn string_field(url: &str, obj: &Map<String, Value>, key: &str) -> Result<String, SyncError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| invalid(url, format!("field `{key}` is missing or not a string")))
}

fn requires_field(url: &str, obj: &Map<String, Value>, owner: &str) -> Result<Requires, SyncError> {
    obj.get("requires")
        .and_then(requires_from_json)
        .ok_or_else(|| invalid(url, format!("`requires` of {owner} must be an object")))
}

fn parse_submodule(url: &str, value: &Value) -> Result<Submodule, SyncError> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid(url, "submodule entry is not an object"))?;
    let name = string_field(url, obj, "name")?;
    let paths = obj
        .get("paths")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(url, format!("`paths` of submodule {name:?} must be an array")))?
        .iter()
        .map(|p| {
            p.as_str().map(str::to_owned).ok_or_else(|| {
                invalid(url, format!("`paths` of submodule {name:?} must hold strings"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(bad) = paths.iter().find(|p| !is_plain_relative(p)) {
        return Err(invalid(
            url,
            format!("submodule {name:?} owns {bad:?}, which is not a path inside the module"),
        ));
    }
    let requires = requires_field(url, obj, &format!("submodule {name:?}"))?;
    Ok(Submodule {
        name,
        paths,
        requires,
    })
}

/// Validate a manifest document fetched from `url`.
pub fn parse_manifest(url: &str, value: &Value) -> Result<ModuleManifest, SyncError> {
    let obj = value
        .as_object()
        .ok_or_else(|| invalid(url, "manifest is not a JSON object"))?;

    let name = string_field(url, obj, "folder")?;
    check_module_name(url, &name)?;

    let submodules = match obj.get("submodules") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| parse_submodule(url, item))
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(invalid(url, "`submodules` must be an array")),
    };

    Ok(ModuleManifest {
        info_url: string_field(url, obj, "more_info")?,
        description: string_field(url, obj, "description")?,
        version: string_field(url, obj, "version")?,
        requires: requires_field(url, obj, &format!("{name:?}"))?,
        archive_url: string_field(url, obj, "zip")?,
        name: ModuleName::from(name),
        submodules,
    })
}

// ---------------------------------------------------------------------------
// ManifestSync
// ---------------------------------------------------------------------------

/// Refreshes the stored manifest of one registered module.
#[derive(Debug, Clone)]
pub struct ManifestSync {
    name: ModuleName,
}

impl ManifestSync {
    pub fn new(name: ModuleName) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &ModuleName {
        &self.name
    }
}

#[async_trait]
impl Datum for ManifestSync {
    fn id(&self) -> String {
        DatumKind::Manifest.id(&self.name)
    }

    fn cadence(&self, config: &ShelfConfig) -> Cadence {
        Cadence::Periodic(config.manifest_interval())
    }

    fn is_incomplete(&self, catalog: &Catalog) -> bool {
        !catalog.manifests.contains_key(&self.name)
    }

    fn is_eligible(&self, catalog: &Catalog) -> bool {
        catalog.registered_url(&self.name).is_some()
    }

    async fn perform(&self, ctx: &SyncContext) -> Result<Performed, SyncError> {
        let (url, canonical) = ctx
            .state
            .read(|c| {
                (
                    c.registered_url(&self.name).map(str::to_owned),
                    c.is_canonical(&self.name),
                )
            })
            .await;
        let url = url.ok_or_else(|| {
            SyncError::Consistency(format!("\"{}\" has no registered manifest URL", self.name))
        })?;

        let manifest = parse_manifest(&url, &ctx.fetcher.fetch_json(&url).await?)?;

        if manifest.name == self.name {
            tracing::debug!(module = %self.name, version = %manifest.version, "manifest refreshed");
            ctx.state
                .mutate(|c| {
                    c.manifests.insert(self.name.clone(), manifest);
                })
                .await?;
            return Ok(Performed::Completed);
        }

        let declared = manifest.name.clone();
        if canonical {
            return Err(SyncError::Consistency(format!(
                "the catalog lists {url} as \"{}\" but it declares \"{declared}\"",
                self.name
            )));
        }
        if ctx.state.read(|c| c.registered_url(&declared).is_some()).await {
            return Err(SyncError::Consistency(format!(
                "\"{}\" now declares \"{declared}\", which is already registered",
                self.name
            )));
        }

        match migrate::rename_module(ctx, &self.name, &declared).await? {
            Migration::Aborted => Ok(Performed::Deferred),
            Migration::Moved => {
                ctx.state
                    .mutate(|c| {
                        c.manifests.insert(declared.clone(), manifest);
                    })
                    .await?;
                Ok(Performed::Renamed {
                    id: DatumKind::Manifest.id(&declared),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// User-added modules
// ---------------------------------------------------------------------------

/// Register the manifest at `url` as a user-added module.
///
/// The manifest is fetched and validated first; nothing is stored if that
/// fails. Returns the module's declared name.
pub async fn add_user_module(ctx: &SyncContext, url: &str) -> Result<ModuleName, SyncError> {
    let manifest = parse_manifest(url, &ctx.fetcher.fetch_json(url).await?)?;
    let name = manifest.name.clone();

    if ctx.state.read(|c| c.is_canonical(&name)).await {
        return Err(SyncError::Consistency(format!(
            "\"{name}\" is already published in the catalog"
        )));
    }

    let now = ctx.now_ms();
    ctx.state
        .mutate(|c| {
            c.user_added.insert(name.clone(), url.to_string());
            c.opt_outs.remove(name.as_str());
            c.manifests.insert(name.clone(), manifest);
            c.timestamps
                .record_success(&DatumKind::Manifest.id(&name), now);
        })
        .await?;

    tracing::info!(module = %name, url, "user module added");
    Ok(name)
}

/// Unregister a user-added module.
///
/// The folder is offered for deletion through the normal unsubscribe
/// prompt; all other state for the module is dropped.
pub async fn remove_user_module(ctx: &SyncContext, name: &ModuleName) -> Result<(), SyncError> {
    if !ctx.state.read(|c| c.user_added.contains_key(name)).await {
        return Err(SyncError::Consistency(format!(
            "\"{name}\" is not a user-added module"
        )));
    }

    subscription::unsubscribe(ctx, name, false).await?;

    ctx.state
        .mutate(|c| {
            c.user_added.remove(name);
            c.forget_module(name);
        })
        .await?;

    tracing::info!(module = %name, "user module removed");
    Ok(())
}
