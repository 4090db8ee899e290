//! `shelf check` / `shelf update`: run an update pass.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use shelf_sync::{check_for_updates, force_update, PassReport, UpdateReport};

use crate::session::Session;
use crate::GlobalArgs;

/// Arguments for `shelf check`.
#[derive(Args, Debug)]
pub struct CheckArgs {}

impl CheckArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let session = Session::open(global)?;
        let ctx = session.context(global)?;
        let report = check_for_updates(&ctx).await.context("update pass failed")?;
        finish(&report)
    }
}

/// Arguments for `shelf update`.
#[derive(Args, Debug)]
pub struct UpdateArgs {}

impl UpdateArgs {
    pub async fn run(self, global: &GlobalArgs) -> Result<()> {
        let session = Session::open(global)?;
        let ctx = session.context(global)?;
        let report = force_update(&ctx).await.context("forced update failed")?;
        finish(&report)
    }
}

fn finish(report: &PassReport) -> Result<()> {
    print_report(report);
    let failures = report.failures();
    if failures > 0 {
        bail!("{failures} update(s) failed");
    }
    Ok(())
}

fn print_report(report: &PassReport) {
    if *report == PassReport::default() {
        println!("✓ everything is up to date");
        return;
    }

    if let Some(outcome) = &report.catalog {
        print_line("catalog", outcome);
    }
    for (name, outcome) in &report.manifests {
        print_line(&format!("{name} manifest"), outcome);
    }
    for name in &report.missing_folders {
        println!("  {}  {name} folder missing, reinstalling", "!".yellow());
    }
    for name in &report.declined {
        println!("  {}  {name} not subscribed", "·".bright_black());
    }
    for (name, outcome) in &report.modules {
        print_line(name.as_str(), outcome);
    }
}

fn print_line(label: &str, outcome: &UpdateReport) {
    match outcome {
        UpdateReport::Completed => println!("  {}  {label}", "✓".green()),
        UpdateReport::Deferred => println!("  {}  {label} (deferred)", "~".yellow()),
        UpdateReport::InProgress => println!("  {}  {label} (already running)", "…".cyan()),
        UpdateReport::Failed(err) => println!("  {}  {label}: {err}", "✗".red()),
    }
}
