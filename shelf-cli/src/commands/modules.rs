//! `shelf add` / `shelf remove`: user-added modules.

use anyhow::{Context, Result};
use clap::Args;

use shelf_core::ModuleName;
use shelf_sync::{manifest, subscription};

use crate::session::Session;
use crate::GlobalArgs;

/// Arguments for `shelf add`.
#[derive(Args, Debug)]
pub struct AddArgs {
    /// URL of the module's manifest JSON.
    pub url: String,
}

impl AddArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let ctx = Session::open(global)?.context(global)?;
        let name = manifest::add_user_module(&ctx, &self.url)
            .await
            .with_context(|| format!("failed to add module from {}", self.url))?;

        println!("✓ added '{name}'; run 'shelf check' to install it");
        let missing = ctx
            .state
            .read(|c| subscription::missing_requirements(c, &name))
            .await;
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|n| n.as_str()).collect();
            println!("  note: '{name}' also expects {}", names.join(", "));
        }
        Ok(())
    }
}

/// Arguments for `shelf remove`.
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Name of a module added with `shelf add`.
    pub module: String,
}

impl RemoveArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let ctx = Session::open(global)?.context(global)?;
        let name = ModuleName::from(self.module);
        manifest::remove_user_module(&ctx, &name)
            .await
            .with_context(|| format!("failed to remove '{name}'"))?;
        println!("✓ removed '{name}'");
        Ok(())
    }
}
