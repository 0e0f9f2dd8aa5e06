use crate::output::{print_json, print_table, truncate};
use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use std::path::Path;
use steward_core::audit::{self, AuditLog};
use steward_core::config::Config;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum AuditSubcommand {
    /// Show the entries recorded on one UTC day
    Show {
        /// Day as YYYY-MM-DD (default: today, UTC)
        #[arg(long)]
        date: Option<String>,
    },

    /// Delete day files older than the retention window
    Purge {
        /// Retention in days (default: audit.retention_days from config)
        #[arg(long)]
        days: Option<u32>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcommand: AuditSubcommand, json: bool) -> anyhow::Result<()> {
    let log = AuditLog::new(root);
    match subcommand {
        AuditSubcommand::Show { date } => show(&log, date.as_deref(), json),
        AuditSubcommand::Purge { days } => {
            let days = match days {
                Some(d) => d,
                None => {
                    Config::load(root)
                        .context("failed to load config")?
                        .audit
                        .retention_days
                }
            };
            let removed = log.purge_older_than(days, Utc::now().date_naive())?;
            if json {
                print_json(&serde_json::json!({ "retention_days": days, "removed": removed }))?;
            } else if removed.is_empty() {
                println!("nothing older than {days} days");
            } else {
                for path in &removed {
                    println!("removed {}", path.display());
                }
            }
            Ok(())
        }
    }
}

fn show(log: &AuditLog, date: Option<&str>, json: bool) -> anyhow::Result<()> {
    let day = match date {
        Some(d) => audit::parse_day(d)?,
        None => Utc::now().date_naive(),
    };
    let entries = log.read_day(day)?;

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("no audit entries for {day}");
        return Ok(());
    }
    let rows = entries
        .iter()
        .map(|e| {
            vec![
                e.timestamp.format("%H:%M:%S").to_string(),
                e.action_type.clone(),
                e.result.to_string(),
                e.approval_ref.clone().unwrap_or_else(|| "-".to_string()),
                truncate(e.error.as_deref().unwrap_or(""), 50),
            ]
        })
        .collect();
    print_table(&["TIME", "ACTION", "RESULT", "APPROVAL", "ERROR"], rows);
    Ok(())
}
