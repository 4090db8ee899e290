//! Read-only status summary of the catalog.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use shelf_core::types::DatumKind;
use shelf_core::{Catalog, ModuleName, ShelfConfig};

use crate::subscription::{is_subscribed, missing_requirements};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    pub name: ModuleName,
    pub installed_version: Option<String>,
    pub available_version: Option<String>,
    pub subscribed: bool,
    pub current: bool,
    pub user_added: bool,
    /// Last successful manifest refresh.
    pub last_checked: Option<DateTime<Utc>>,
    /// Set while a declined overwrite suppresses re-prompting.
    pub punted_until: Option<DateTime<Utc>>,
    pub missing_requirements: Vec<ModuleName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub modules: Vec<ModuleStatus>,
    /// Oldest last-success across every updater: everything has been
    /// refreshed at least this recently.
    pub last_updated: Option<DateTime<Utc>>,
}

fn at(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// One row per module the catalog knows about in any form.
pub fn report(catalog: &Catalog, config: &ShelfConfig, now: DateTime<Utc>) -> StatusReport {
    let names: BTreeSet<ModuleName> = catalog
        .registered_names()
        .into_iter()
        .chain(catalog.manifests.keys().cloned())
        .chain(catalog.installed.keys().cloned())
        .collect();

    let window_ms = config.module_retry_window().num_milliseconds();
    let modules = names
        .into_iter()
        .map(|name| {
            let punted_until = catalog
                .timestamps
                .last_punt(&DatumKind::Module.id(&name))
                .map(|punt| punt + window_ms)
                .filter(|until| *until > now.timestamp_millis())
                .and_then(at);
            ModuleStatus {
                installed_version: catalog.installed.get(&name).map(|r| r.version.clone()),
                available_version: catalog.manifests.get(&name).map(|m| m.version.clone()),
                subscribed: is_subscribed(catalog, &name),
                current: catalog.is_current(&name),
                user_added: catalog.user_added.contains_key(&name),
                last_checked: catalog
                    .timestamps
                    .last_success(&DatumKind::Manifest.id(&name))
                    .and_then(at),
                punted_until,
                missing_requirements: missing_requirements(catalog, &name),
                name,
            }
        })
        .collect();

    StatusReport {
        modules,
        last_updated: catalog.timestamps.updated.values().min().copied().and_then(at),
    }
}
