pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod execute;
pub mod init;
pub mod mcp;
pub mod plan;
pub mod report_failure;
pub mod watch;

use std::path::Path;
use steward_core::{paths, StewardError};

/// Commands that need a workspace fail early with a pointer to `init`.
pub fn require_init(root: &Path) -> anyhow::Result<()> {
    if !paths::steward_dir(root).is_dir() {
        return Err(StewardError::NotInitialized.into());
    }
    Ok(())
}
