use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;

use shelf_core::{
    config, CatalogStore, Catalog, InstalledRecord, JsonCatalogStore, ModuleManifest, ModuleName,
    ShelfConfig,
};
use tempfile::TempDir;

fn shelf_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("shelf"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG");
    cmd
}

fn manifest(name: &str, version: &str) -> ModuleManifest {
    ModuleManifest {
        name: ModuleName::from(name),
        info_url: format!("https://example.org/{name}"),
        description: format!("{name} texts"),
        version: version.to_string(),
        requires: Default::default(),
        archive_url: format!("https://example.org/{name}-{version}.zip"),
        submodules: Vec::new(),
    }
}

fn seed(home: &Path) -> Catalog {
    let mut catalog = Catalog::default();
    catalog.canonical.insert(
        ModuleName::from("Vinaya"),
        "https://example.org/vinaya.json".to_string(),
    );
    catalog
        .manifests
        .insert(ModuleName::from("Vinaya"), manifest("Vinaya", "2.0.0"));
    catalog.installed.insert(
        ModuleName::from("Vinaya"),
        InstalledRecord {
            version: "1.0.0".to_string(),
            content_hash: "abc".to_string(),
        },
    );
    JsonCatalogStore::at(home).save(&catalog).expect("seed state");
    catalog
}

#[test]
fn status_on_empty_home_points_at_check() {
    let home = TempDir::new().expect("home");

    shelf_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("No modules known yet"))
        .stdout(contains("last updated never"));
}

#[test]
fn status_json_on_empty_home_has_no_modules() {
    let home = TempDir::new().expect("home");

    let output = shelf_cmd(home.path())
        .args(["status", "--json"])
        .output()
        .expect("run shelf");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["modules"], serde_json::json!([]));
    assert!(report["last_updated"].is_null());
}

#[test]
fn status_lists_seeded_modules() {
    let home = TempDir::new().expect("home");
    seed(home.path());

    shelf_cmd(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(contains("Vinaya"))
        .stdout(contains("1.0.0"))
        .stdout(contains("2.0.0"));
}

#[test]
fn home_flag_overrides_environment() {
    let env_home = TempDir::new().expect("env home");
    let flag_home = TempDir::new().expect("flag home");
    seed(flag_home.path());

    let output = shelf_cmd(env_home.path())
        .arg("--home")
        .arg(flag_home.path())
        .args(["status", "--json"])
        .output()
        .expect("run shelf");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["modules"][0]["name"], "Vinaya");
    assert_eq!(report["modules"][0]["installed_version"], "1.0.0");
    assert_eq!(report["modules"][0]["current"], false);
}

#[test]
fn silent_unsubscribe_records_opt_out_and_keeps_files() {
    let home = TempDir::new().expect("home");
    seed(home.path());
    let folder = config::load_at(home.path())
        .expect("default config")
        .library_dir(home.path())
        .join("Vinaya");
    fs::create_dir_all(&folder).expect("module folder");
    fs::write(folder.join("a.md"), "kept").expect("module file");

    shelf_cmd(home.path())
        .args(["unsubscribe", "Vinaya", "--silent"])
        .assert()
        .success()
        .stdout(contains("files kept"));

    let catalog = JsonCatalogStore::at(home.path()).load().expect("reload");
    assert!(catalog.is_opted_out("Vinaya"));
    assert!(folder.join("a.md").exists());

    shelf_cmd(home.path())
        .args(["subscribe", "Vinaya"])
        .assert()
        .success();
    let catalog = JsonCatalogStore::at(home.path()).load().expect("reload");
    assert!(!catalog.is_opted_out("Vinaya"));
}

#[test]
fn removing_a_catalog_module_is_refused() {
    let home = TempDir::new().expect("home");
    seed(home.path());

    shelf_cmd(home.path())
        .args(["remove", "Vinaya"])
        .assert()
        .failure()
        .stderr(contains("Vinaya"));

    let catalog = JsonCatalogStore::at(home.path()).load().expect("reload");
    assert!(catalog.is_canonical(&ModuleName::from("Vinaya")));
}

#[test]
fn check_fails_when_catalog_is_unreachable() {
    let home = TempDir::new().expect("home");
    let cfg = ShelfConfig {
        catalog_url: "http://127.0.0.1:9/catalog.json".to_string(),
        ..ShelfConfig::default()
    };
    config::save_at(home.path(), &cfg).expect("write config");

    shelf_cmd(home.path())
        .arg("check")
        .assert()
        .failure()
        .stdout(contains("catalog"))
        .stderr(contains("failed"));
}

#[test]
fn malformed_config_is_reported() {
    let home = TempDir::new().expect("home");
    let path = config::config_path_at(home.path());
    fs::create_dir_all(path.parent().expect("config dir")).expect("mkdir");
    fs::write(&path, "catalog_ur1: https://typo.example\n").expect("write config");

    shelf_cmd(home.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(contains("config.yaml"));
}
