//! `shelf subscribe` / `shelf unsubscribe`.

use anyhow::{Context, Result};
use clap::Args;

use shelf_core::ModuleName;
use shelf_sync::{subscription, UpdateReport};

use crate::session::Session;
use crate::GlobalArgs;

/// Arguments for `shelf subscribe`.
#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Module name.
    pub module: String,

    /// Subscribe to one submodule of the module instead.
    #[arg(long)]
    pub submodule: Option<String>,
}

impl SubscribeArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let ctx = Session::open(global)?.context(global)?;
        let name = ModuleName::from(self.module);

        match self.submodule {
            None => {
                subscription::subscribe(&ctx, &name)
                    .await
                    .with_context(|| format!("failed to subscribe to '{name}'"))?;
                println!("✓ subscribed to '{name}'; it installs on the next 'shelf check'");
            }
            Some(sub) => {
                let reinstall = subscription::subscribe_submodule(&ctx, &name, &sub)
                    .await
                    .with_context(|| format!("failed to subscribe to '{name}/{sub}'"))?;
                match reinstall {
                    None | Some(UpdateReport::Completed) => {
                        println!("✓ subscribed to '{name}/{sub}'")
                    }
                    Some(other) => println!("✓ subscribed to '{name}/{sub}' (reinstall: {other:?})"),
                }
            }
        }
        Ok(())
    }
}

/// Arguments for `shelf unsubscribe`.
#[derive(Args, Debug)]
pub struct UnsubscribeArgs {
    /// Module name.
    pub module: String,

    /// Unsubscribe from one submodule of the module instead.
    #[arg(long)]
    pub submodule: Option<String>,

    /// Keep files on disk without asking.
    #[arg(long)]
    pub silent: bool,
}

impl UnsubscribeArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let ctx = Session::open(global)?.context(global)?;
        let name = ModuleName::from(self.module);

        let (label, deleted) = match self.submodule {
            None => (
                name.to_string(),
                subscription::unsubscribe(&ctx, &name, self.silent)
                    .await
                    .with_context(|| format!("failed to unsubscribe from '{name}'"))?,
            ),
            Some(sub) => (
                name.scoped(&sub),
                subscription::unsubscribe_submodule(&ctx, &name, &sub, self.silent)
                    .await
                    .with_context(|| format!("failed to unsubscribe from '{name}/{sub}'"))?,
            ),
        };

        if deleted {
            println!("✓ unsubscribed from '{label}' and deleted its files");
        } else {
            println!("✓ unsubscribed from '{label}'; files kept");
        }
        Ok(())
    }
}
