use crate::output::{print_json, print_table};
use clap::Subcommand;
use serde::Serialize;
use std::path::{Path, PathBuf};
use steward_core::plan::{self, Plan};
use steward_core::schema;

#[derive(Subcommand)]
pub enum PlanSubcommand {
    /// Parse a plan file and validate every action against the catalog
    Check {
        /// Path to the plan markdown file
        file: PathBuf,
    },

    /// Show which approved plan `execute` would pick for a domain
    Find {
        #[arg(long)]
        domain: String,
    },
}

#[derive(Serialize)]
struct ActionCheck {
    index: usize,
    action: String,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(root: &Path, subcommand: PlanSubcommand, json: bool) -> anyhow::Result<()> {
    match subcommand {
        PlanSubcommand::Check { file } => check(&file, json),
        PlanSubcommand::Find { domain } => {
            let plan = plan::find_approved(root, &domain)?;
            if json {
                print_json(&serde_json::json!({
                    "id": plan.id(),
                    "path": plan.path,
                    "header": plan.header,
                    "actions": plan.actions.len(),
                }))?;
            } else {
                println!("{} ({} actions)", plan.path.display(), plan.actions.len());
            }
            Ok(())
        }
    }
}

fn check(file: &Path, json: bool) -> anyhow::Result<()> {
    let plan = Plan::load(file)?;
    let checks: Vec<ActionCheck> = plan
        .actions
        .iter()
        .enumerate()
        .map(|(index, a)| {
            let result = schema::validate(&a.server, &a.operation, &a.parameters);
            ActionCheck {
                index,
                action: a.action_type(),
                valid: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            }
        })
        .collect();
    let invalid = checks.iter().filter(|c| !c.valid).count();

    if json {
        print_json(&serde_json::json!({
            "id": plan.id(),
            "approved_by": plan.approved_by(),
            "actions": checks,
        }))?;
    } else {
        println!("plan {} approved by {}", plan.id(), plan.approved_by());
        let rows = checks
            .iter()
            .map(|c| {
                vec![
                    c.index.to_string(),
                    c.action.clone(),
                    if c.valid { "ok" } else { "invalid" }.to_string(),
                    c.error.clone().unwrap_or_default(),
                ]
            })
            .collect();
        print_table(&["#", "ACTION", "CHECK", "ERROR"], rows);
    }

    if invalid > 0 {
        anyhow::bail!("{invalid} of {} actions failed validation", checks.len());
    }
    Ok(())
}
