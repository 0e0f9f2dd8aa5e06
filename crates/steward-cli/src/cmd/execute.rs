use crate::output::{print_json, print_table, truncate};
use anyhow::Context;
use std::path::Path;
use steward_core::adapter::AdapterPool;
use steward_core::config::Config;
use steward_core::executor::{ExecutionReport, Executor};

pub fn run(
    root: &Path,
    domain: &str,
    dry_run: bool,
    stop_on_first_error: bool,
    json: bool,
) -> anyhow::Result<()> {
    crate::cmd::require_init(root)?;
    let config = Config::load(root).context("failed to load config")?;

    let mut adapters = AdapterPool::from_config(&config);
    let report = {
        let mut executor = Executor::new(root, &config, &mut adapters)
            .stop_on_first_error(stop_on_first_error || config.executor.stop_on_first_error);
        executor.execute(domain, dry_run)
    };
    adapters.close_all();

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    if !report.success {
        match &report.error {
            Some(e) => anyhow::bail!("execution failed: {e}"),
            None => anyhow::bail!(
                "execution failed: {} of {} actions succeeded",
                report.actions_succeeded,
                report.results.len()
            ),
        }
    }
    Ok(())
}

fn print_report(report: &ExecutionReport) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    match &report.plan_id {
        Some(id) => println!("Plan {id}{mode}"),
        None => println!("No plan{mode}"),
    }
    if !report.results.is_empty() {
        let rows = report
            .results
            .iter()
            .map(|r| {
                vec![
                    r.index.to_string(),
                    format!("{}.{}", r.server, r.operation),
                    serde_json::to_value(r.status)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default(),
                    truncate(r.error.as_deref().unwrap_or(""), 60),
                ]
            })
            .collect();
        print_table(&["#", "ACTION", "STATUS", "ERROR"], rows);
    }
    println!(
        "\nattempted: {}  succeeded: {}",
        report.actions_attempted, report.actions_succeeded
    );
}
