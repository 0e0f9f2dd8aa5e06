use anyhow::Context;
use std::path::Path;
use steward_core::{config::Config, io, paths};

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing steward in: {}", root.display());

    let dirs = [
        paths::STEWARD_DIR,
        paths::CHECKPOINTS_DIR,
        paths::LOCKS_DIR,
        paths::APPROVED_DIR,
        paths::NEEDS_ACTION_DIR,
        paths::LOGS_DIR,
        paths::AUDIT_DIR,
    ];
    for dir in dirs {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let config_path = paths::config_path(root);
    if !config_path.exists() {
        Config::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    println!("\nsteward initialized.");
    println!("Next: add adapters under `adapters:` in {}", paths::CONFIG_FILE);
    Ok(())
}
