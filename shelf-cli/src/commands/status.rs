//! `shelf status`: installed vs. available versions.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use shelf_sync::status::{self, ModuleStatus, StatusReport};

use crate::session::Session;
use crate::GlobalArgs;

/// Arguments for `shelf status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self, global: &GlobalArgs) -> Result<()> {
        let session = Session::open(global)?;
        let catalog = session.catalog()?;
        let now = Utc::now();
        let report = status::report(&catalog, &session.config, now);

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(&report, now, &session.library.display().to_string());
        Ok(())
    }
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "module")]
    module: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "installed")]
    installed: String,
    #[tabled(rename = "available")]
    available: String,
    #[tabled(rename = "checked")]
    checked: String,
    #[tabled(rename = "notes")]
    notes: String,
}

fn print_table(report: &StatusReport, now: DateTime<Utc>, library: &str) {
    println!(
        "Shelf v{} | {} modules | library {} | last updated {}",
        env!("CARGO_PKG_VERSION"),
        report.modules.len(),
        library,
        age(report.last_updated, now),
    );

    if report.modules.is_empty() {
        println!("No modules known yet. Run 'shelf check' to fetch the catalog.");
        return;
    }

    let rows: Vec<StatusTableRow> = report
        .modules
        .iter()
        .map(|m| StatusTableRow {
            module: if m.user_added {
                format!("{} (added)", m.name)
            } else {
                m.name.to_string()
            },
            state: state_label(m),
            installed: m.installed_version.clone().unwrap_or_else(|| "-".to_string()),
            available: m.available_version.clone().unwrap_or_else(|| "-".to_string()),
            checked: age(m.last_checked, now),
            notes: notes(m, now),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn state_label(m: &ModuleStatus) -> String {
    if !m.subscribed {
        "UNSUBSCRIBED".bright_black().to_string()
    } else if m.current {
        "CURRENT".green().to_string()
    } else if m.installed_version.is_some() {
        "OUTDATED".yellow().to_string()
    } else {
        "NOT INSTALLED".magenta().to_string()
    }
}

fn notes(m: &ModuleStatus, now: DateTime<Utc>) -> String {
    let mut notes = Vec::new();
    if let Some(until) = m.punted_until {
        notes.push(format!("deferred for {}", duration((until - now).num_seconds())));
    }
    if !m.missing_requirements.is_empty() {
        let names: Vec<&str> = m.missing_requirements.iter().map(|n| n.as_str()).collect();
        notes.push(format!("needs {}", names.join(", ")));
    }
    notes.join("; ")
}

fn age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match at {
        None => "never".to_string(),
        Some(at) => format!("{} ago", duration((now - at).num_seconds())),
    }
}

fn duration(secs: i64) -> String {
    let secs = secs.max(0);
    match secs {
        0..=59 => format!("{secs}s"),
        60..=3_599 => format!("{}m", secs / 60),
        3_600..=86_399 => format!("{}h", secs / 3_600),
        _ => format!("{}d", secs / 86_400),
    }
}
