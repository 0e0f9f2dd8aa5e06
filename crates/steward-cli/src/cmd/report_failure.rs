use crate::output::print_json;
use std::path::Path;
use steward_core::remediation;

/// Exit status is 0 once the failure is recorded: the failure itself is
/// the expected input, not an error of this command.
pub fn run(root: &Path, failure_type: &str, server: &str, message: &str, json: bool) -> anyhow::Result<()> {
    let report = remediation::report_failure(root, failure_type, server, message)?;

    if json {
        print_json(&report)?;
        return Ok(());
    }

    println!("recorded {} failure for {}", report.failure_type, report.server);
    match &report.task_path {
        Some(path) => println!("  task: {}", path.display()),
        None => println!("  task: not created"),
    }
    for e in &report.errors {
        eprintln!("  warning: {e}");
    }
    Ok(())
}
