//! Domain types for the Shelf catalog.
//!
//! All types serialize with serde. Manifest field names follow the publisher's
//! JSON wire format (`folder`, `more_info`, `zip`), everything else is the
//! local state layout written to `~/.shelf/state.json`.

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identity key for a module. Also the name of its folder in the library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleName(pub String);

impl ModuleName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Opt-out key for a submodule of this module: `"Module/Submodule"`.
    pub fn scoped(&self, submodule: &str) -> String {
        format!("{}/{}", self.0, submodule)
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ModuleName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ModuleName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl Borrow<str> for ModuleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Requirements
// ---------------------------------------------------------------------------

/// A trie of required subpaths inside another module.
///
/// An empty trie means "the module as a whole".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathTrie(pub BTreeMap<String, PathTrie>);

impl PathTrie {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build a trie from a JSON value. Non-object leaves (older manifests
    /// mapped module names to version strings) become empty tries.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => PathTrie(
                map.iter()
                    .map(|(key, child)| (key.clone(), PathTrie::from_json(child)))
                    .collect(),
            ),
            _ => PathTrie::default(),
        }
    }

    /// Every root-to-leaf path, joined with `/`.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (segment, child) in &self.0 {
            if child.is_empty() {
                out.push(segment.clone());
            } else {
                for rest in child.paths() {
                    out.push(format!("{segment}/{rest}"));
                }
            }
        }
        out
    }
}

/// Declared requirements: required module → required subpaths inside it.
pub type Requires = BTreeMap<ModuleName, PathTrie>;

/// Parse a `requires` JSON object. Returns `None` if `value` is not an object.
pub fn requires_from_json(value: &Value) -> Option<Requires> {
    let map = value.as_object()?;
    Some(
        map.iter()
            .map(|(name, trie)| (ModuleName::from(name.as_str()), PathTrie::from_json(trie)))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// An independently removable subset of a module's files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submodule {
    pub name: String,
    /// Paths relative to the module root that this submodule owns.
    pub paths: Vec<String>,
    #[serde(default)]
    pub requires: Requires,
}

impl Submodule {
    /// True if `relative` (a `/`-separated path inside the module) is one of
    /// this submodule's owned paths or lies beneath one.
    pub fn owns(&self, relative: &str) -> bool {
        self.paths.iter().any(|owned| path_within(relative, owned))
    }
}

/// Metadata document describing a module's latest published version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    #[serde(rename = "folder")]
    pub name: ModuleName,
    #[serde(rename = "more_info")]
    pub info_url: String,
    pub description: String,
    /// `MAJOR.MINOR.PATCH`
    pub version: String,
    #[serde(default)]
    pub requires: Requires,
    #[serde(rename = "zip")]
    pub archive_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub submodules: Vec<Submodule>,
}

impl ModuleManifest {
    pub fn submodule(&self, name: &str) -> Option<&Submodule> {
        self.submodules.iter().find(|s| s.name == name)
    }
}

/// What was installed for a module: the manifest version and the digest the
/// archive installer returned (not a live recomputation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub version: String,
    #[serde(rename = "hash")]
    pub content_hash: String,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Staleness identifier of the canonical catalog updater.
pub const MODULE_LIST_ID: &str = "ModuleList";

/// Key suffix that distinguishes a punt timestamp from a success timestamp.
pub const PUNT_SUFFIX: &str = " punt";

/// Per-module datum kinds that carry their own staleness timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatumKind {
    Manifest,
    Module,
}

impl DatumKind {
    pub const ALL: [DatumKind; 2] = [DatumKind::Manifest, DatumKind::Module];

    /// Staleness identifier for `name`, e.g. `"Vinaya Manifest"`.
    pub fn id(self, name: &ModuleName) -> String {
        match self {
            DatumKind::Manifest => format!("{name} Manifest"),
            DatumKind::Module => format!("{name} Module"),
        }
    }
}

/// Epoch-millisecond timestamps keyed by staleness identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    /// Last successful update per id.
    #[serde(default)]
    pub updated: BTreeMap<String, i64>,
    /// Last deferred-conflict ("punt") per id, keyed `"<id> punt"`.
    #[serde(default)]
    pub punted: BTreeMap<String, i64>,
}

impl Timestamps {
    pub fn last_success(&self, id: &str) -> Option<i64> {
        self.updated.get(id).copied()
    }

    pub fn record_success(&mut self, id: &str, at_ms: i64) {
        self.updated.insert(id.to_string(), at_ms);
    }

    pub fn last_punt(&self, id: &str) -> Option<i64> {
        self.punted.get(&punt_key(id)).copied()
    }

    pub fn record_punt(&mut self, id: &str, at_ms: i64) {
        self.punted.insert(punt_key(id), at_ms);
    }

    /// Drop both timestamps for `id`.
    pub fn forget(&mut self, id: &str) {
        self.updated.remove(id);
        self.punted.remove(&punt_key(id));
    }

    fn move_id(&mut self, from: &str, to: &str) {
        if let Some(at) = self.updated.remove(from) {
            self.updated.insert(to.to_string(), at);
        }
        if let Some(at) = self.punted.remove(&punt_key(from)) {
            self.punted.insert(punt_key(to), at);
        }
    }
}

fn punt_key(id: &str) -> String {
    format!("{id}{PUNT_SUFFIX}")
}

// ---------------------------------------------------------------------------
// Catalog aggregate
// ---------------------------------------------------------------------------

/// Everything Shelf persists between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Centrally published name → manifest URL.
    #[serde(default)]
    pub canonical: BTreeMap<ModuleName, String>,
    /// Locally registered name → manifest URL.
    #[serde(default)]
    pub user_added: BTreeMap<ModuleName, String>,
    #[serde(default)]
    pub manifests: BTreeMap<ModuleName, ModuleManifest>,
    #[serde(default)]
    pub installed: BTreeMap<ModuleName, InstalledRecord>,
    #[serde(default)]
    pub timestamps: Timestamps,
    /// Opted-out module names and `"Module/Submodule"` keys.
    #[serde(default)]
    pub opt_outs: BTreeSet<String>,
}

impl Catalog {
    /// Manifest URL for `name`: canonical entries win over user-added ones.
    pub fn registered_url(&self, name: &ModuleName) -> Option<&str> {
        self.canonical
            .get(name)
            .or_else(|| self.user_added.get(name))
            .map(String::as_str)
    }

    pub fn is_canonical(&self, name: &ModuleName) -> bool {
        self.canonical.contains_key(name)
    }

    /// Canonical ∪ user-added names, sorted.
    pub fn registered_names(&self) -> BTreeSet<ModuleName> {
        self.canonical
            .keys()
            .chain(self.user_added.keys())
            .cloned()
            .collect()
    }

    pub fn is_opted_out(&self, key: &str) -> bool {
        self.opt_outs.contains(key)
    }

    /// True if the installed version matches the known manifest version.
    pub fn is_current(&self, name: &ModuleName) -> bool {
        match (self.installed.get(name), self.manifests.get(name)) {
            (Some(installed), Some(manifest)) => installed.version == manifest.version,
            _ => false,
        }
    }

    /// Move every piece of state keyed by `from` to `to`: known manifest,
    /// installed record, opt-out flags (module and submodule scoped),
    /// staleness timestamps and a user-added registration.
    ///
    /// The canonical map is left alone; the catalog updater replaces it
    /// wholesale. Anything already stored under `to` is overwritten.
    pub fn rename_module(&mut self, from: &ModuleName, to: &ModuleName) {
        if let Some(mut manifest) = self.manifests.remove(from) {
            manifest.name = to.clone();
            self.manifests.insert(to.clone(), manifest);
        }
        if let Some(record) = self.installed.remove(from) {
            self.installed.insert(to.clone(), record);
        }
        if let Some(url) = self.user_added.remove(from) {
            self.user_added.insert(to.clone(), url);
        }

        let scope = format!("{from}/");
        let moved: Vec<String> = self
            .opt_outs
            .iter()
            .filter(|key| *key == from.as_str() || key.starts_with(&scope))
            .cloned()
            .collect();
        for key in moved {
            self.opt_outs.remove(&key);
            let renamed = match key.strip_prefix(&scope) {
                Some(submodule) => to.scoped(submodule),
                None => to.0.clone(),
            };
            self.opt_outs.insert(renamed);
        }

        for kind in DatumKind::ALL {
            self.timestamps.move_id(&kind.id(from), &kind.id(to));
        }
    }

    /// Remove every trace of `name` except its canonical / user-added
    /// registration.
    pub fn forget_module(&mut self, name: &ModuleName) {
        self.manifests.remove(name);
        self.installed.remove(name);
        let scope = format!("{name}/");
        self.opt_outs
            .retain(|key| key != name.as_str() && !key.starts_with(&scope));
        for kind in DatumKind::ALL {
            self.timestamps.forget(&kind.id(name));
        }
    }
}

/// True if `path` equals `prefix` or lies beneath it (both `/`-separated).
pub fn path_within(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    path == prefix
        || path
            .strip_prefix(prefix)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

/// True if `path` is a `/`-separated path that stays inside whatever folder
/// it is joined onto: no leading `/`, no `.`/`..` or empty segments, no
/// backslashes, drive prefixes or NULs. One trailing `/` is allowed.
pub fn is_plain_relative(path: &str) -> bool {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    !trimmed.is_empty()
        && !trimmed.contains(['\\', '\0', ':'])
        && trimmed
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
