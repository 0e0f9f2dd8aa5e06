use crate::error::{Result, StewardError};
use chrono::NaiveDate;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const STEWARD_DIR: &str = ".steward";
pub const CHECKPOINTS_DIR: &str = ".steward/checkpoints";
pub const LOCKS_DIR: &str = ".steward/locks";
pub const APPROVED_DIR: &str = "approved";
pub const NEEDS_ACTION_DIR: &str = "needs_action";
pub const LOGS_DIR: &str = "logs";
pub const AUDIT_DIR: &str = "logs/audit";

pub const CONFIG_FILE: &str = ".steward/config.yaml";
pub const MCP_FAILURE_LOG: &str = "logs/mcp_failures.jsonl";
pub const REMEDIATION_LOG: &str = "logs/remediation.log";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn steward_dir(root: &Path) -> PathBuf {
    root.join(STEWARD_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn approved_dir(root: &Path) -> PathBuf {
    root.join(APPROVED_DIR)
}

pub fn needs_action_dir(root: &Path) -> PathBuf {
    root.join(NEEDS_ACTION_DIR)
}

pub fn audit_dir(root: &Path) -> PathBuf {
    root.join(AUDIT_DIR)
}

pub fn audit_day_path(root: &Path, day: NaiveDate) -> PathBuf {
    audit_dir(root).join(format!("{}.jsonl", day.format("%Y-%m-%d")))
}

pub fn checkpoint_path(root: &Path, source: &str) -> PathBuf {
    root.join(CHECKPOINTS_DIR).join(format!("{source}.json"))
}

pub fn lock_path(root: &Path, resource: &str) -> PathBuf {
    root.join(LOCKS_DIR).join(format!("{resource}.lock"))
}

pub fn mcp_failure_log_path(root: &Path) -> PathBuf {
    root.join(MCP_FAILURE_LOG)
}

pub fn remediation_log_path(root: &Path) -> PathBuf {
    root.join(REMEDIATION_LOG)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_\-]*$").unwrap())
}

/// Names that end up inside file names (sources, servers, item ids).
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 || !name_re().is_match(name) {
        return Err(StewardError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Replace anything that is not safe inside a file name with `_`.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
