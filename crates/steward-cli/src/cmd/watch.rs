use crate::output::print_json;
use anyhow::Context;
use std::path::Path;
use steward_core::watch;

pub fn run(root: &Path, source: &str, input: &Path, json: bool) -> anyhow::Result<()> {
    crate::cmd::require_init(root)?;
    let items = watch::load_items(input)
        .with_context(|| format!("failed to read items from {}", input.display()))?;
    let report = watch::run_cycle(root, source, &items)?;

    if json {
        return print_json(&report);
    }
    println!(
        "{}: {} seen, {} already processed, {} new",
        report.source,
        report.seen,
        report.already_processed,
        report.created.len()
    );
    for path in &report.created {
        println!("  created: {}", path.display());
    }
    Ok(())
}
