//! `~/.shelf/config.yaml`: tunables for the sync engine.
//!
//! A missing file yields [`ShelfConfig::default`]. Unknown keys are rejected
//! so a typo does not silently fall back to a default.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::store::{home, shelf_root};

/// Publisher's canonical module list.
pub const DEFAULT_CATALOG_URL: &str =
    "https://github.com/obu-labs/vinaya-bookshelf/releases/latest/download/catalog.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShelfConfig {
    pub catalog_url: String,
    /// Directory holding one folder per module. Defaults to `<home>/.shelf/library`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<PathBuf>,
    pub list_check_days: u32,
    pub manifest_check_days: u32,
    /// How long a declined prompt (a punt) holds off the next attempt.
    pub module_retry_days: u32,
    /// Use the mtime heuristic instead of hashing large folders.
    pub constrained_platform: bool,
    /// File count above which a constrained platform skips full hashing.
    pub fingerprint_item_threshold: usize,
    pub mtime_slack_secs: u32,
    /// Ask before the first install of a newly discovered module.
    pub prompt_new_modules: bool,
}

impl Default for ShelfConfig {
    fn default() -> Self {
        Self {
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            library: None,
            list_check_days: 7,
            manifest_check_days: 7,
            module_retry_days: 1,
            constrained_platform: false,
            fingerprint_item_threshold: 2000,
            mtime_slack_secs: 5,
            prompt_new_modules: true,
        }
    }
}

impl ShelfConfig {
    pub fn library_dir(&self, home: &Path) -> PathBuf {
        self.library
            .clone()
            .unwrap_or_else(|| shelf_root(home).join("library"))
    }

    pub fn list_interval(&self) -> Duration {
        Duration::days(i64::from(self.list_check_days))
    }

    pub fn manifest_interval(&self) -> Duration {
        Duration::days(i64::from(self.manifest_check_days))
    }

    pub fn module_retry_window(&self) -> Duration {
        Duration::days(i64::from(self.module_retry_days))
    }

    pub fn mtime_slack(&self) -> Duration {
        Duration::seconds(i64::from(self.mtime_slack_secs))
    }
}

/// `<home>/.shelf/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    shelf_root(home).join("config.yaml")
}

/// Load the config under `home`, or defaults if the file is absent.
pub fn load_at(home: &Path) -> Result<ShelfConfig, StoreError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(ShelfConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(ShelfConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
        path,
        message: e.to_string(),
    })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<ShelfConfig, StoreError> {
    load_at(&home()?)
}

/// Write `config` to `<home>/.shelf/config.yaml` via `.tmp` + rename.
pub fn save_at(home: &Path, config: &ShelfConfig) -> Result<(), StoreError> {
    let path = config_path_at(home);
    let dir = shelf_root(home);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}
