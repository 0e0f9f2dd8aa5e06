//! Failure classification and human remediation tasks.
//!
//! Layout:
//!   logs/mcp_failures.jsonl    structured failure log
//!   logs/remediation.log       one-line summaries
//!   needs_action/remediation__<domain>__<resource>__<YYYYMMDD-HHMM>.md
//!
//! The three writes are independent: one failing does not stop the others,
//! and the returned [`FailureReport`] says which ones landed. Tasks stay
//! `pending` until a human edits or moves the file.

use crate::error::{Result, StewardError};
use crate::{io, paths};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

pub const MCP_DOMAIN: &str = "mcp";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    ConnectionTimeout,
    AuthFailure,
    RateLimit,
    ServerError,
}

impl FailureType {
    pub fn all() -> &'static [FailureType] {
        &[
            FailureType::ConnectionTimeout,
            FailureType::AuthFailure,
            FailureType::RateLimit,
            FailureType::ServerError,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureType::ConnectionTimeout => "connection_timeout",
            FailureType::AuthFailure => "auth_failure",
            FailureType::RateLimit => "rate_limit",
            FailureType::ServerError => "server_error",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            FailureType::ConnectionTimeout => "Connection timeout",
            FailureType::AuthFailure => "Authentication failure",
            FailureType::RateLimit => "Rate limit exceeded",
            FailureType::ServerError => "Server error",
        }
    }

    pub fn priority(self) -> Priority {
        match self {
            FailureType::AuthFailure | FailureType::ServerError => Priority::High,
            FailureType::ConnectionTimeout | FailureType::RateLimit => Priority::Medium,
        }
    }

    /// Diagnostic steps specific to this failure type.
    pub fn checklist(self) -> &'static [&'static str] {
        match self {
            FailureType::ConnectionTimeout => &[
                "Check network connectivity to the server host",
                "Verify the server process is running and listening",
                "Check DNS resolution and firewall rules",
                "Review `timeout_secs` for this adapter in .steward/config.yaml",
                "Retry the call manually once connectivity is confirmed",
            ],
            FailureType::AuthFailure => &[
                "Verify the credential environment variable is set for this adapter",
                "Check whether the access token has expired and refresh it",
                "Confirm the account still has the required permissions or scopes",
                "Check the platform for revoked app access",
                "Re-run the action after refreshing credentials",
            ],
            FailureType::RateLimit => &[
                "Check the platform's current quota and its reset time",
                "Review `retry.max_retries` and `retry.base_delay_secs` in .steward/config.yaml",
                "Reduce batch size or spread actions over a longer window",
                "Look for loops that issue the same call repeatedly",
                "Wait for the quota window to reset before retrying",
            ],
            FailureType::ServerError => &[
                "Query the server's health endpoint",
                "Review the server's error logs around the failure timestamp",
                "Check the platform status page for ongoing incidents",
                "Verify the request payload against the API documentation",
                "Retry once the server reports healthy",
            ],
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureType {
    type Err = StewardError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "connection_timeout" => Ok(FailureType::ConnectionTimeout),
            "auth_failure" => Ok(FailureType::AuthFailure),
            "rate_limit" => Ok(FailureType::RateLimit),
            "server_error" => Ok(FailureType::ServerError),
            _ => Err(StewardError::UnknownFailureType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
}

/// Only `pending` is ever written here; humans advance it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStatus {
    Pending,
}

/// One line of `logs/mcp_failures.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpFailureRecord {
    pub timestamp: DateTime<Utc>,
    pub failure_type: FailureType,
    pub server: String,
    pub error_message: String,
    pub remediation_status: RemediationStatus,
}

/// Front matter of a remediation task file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHeader {
    pub id: String,
    pub source: String,
    pub server: String,
    pub failure_type: FailureType,
    pub created: DateTime<Utc>,
    pub status: RemediationStatus,
    pub priority: Priority,
}

#[derive(Debug, Clone)]
pub struct RemediationTask {
    pub header: TaskHeader,
    pub error: String,
}

impl RemediationTask {
    pub fn new(
        domain: &str,
        server: &str,
        failure_type: FailureType,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let id = format!(
            "remediation__{}__{}__{}",
            paths::sanitize_component(domain),
            paths::sanitize_component(server),
            now.format("%Y%m%d-%H%M")
        );
        Self {
            header: TaskHeader {
                id,
                source: domain.to_string(),
                server: server.to_string(),
                failure_type,
                created: now.trunc_subsecs(0),
                status: RemediationStatus::Pending,
                priority: failure_type.priority(),
            },
            error: error.into(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.md", self.header.id)
    }

    pub fn render(&self) -> Result<String> {
        let h = &self.header;
        let mut out = String::new();
        out.push_str("---\n");
        out.push_str(&serde_yaml::to_string(h)?);
        out.push_str("---\n\n");
        out.push_str(&format!(
            "# Remediation: {} {}\n\n",
            h.server, h.failure_type
        ));
        out.push_str(&format!("- **Server:** {}\n", h.server));
        out.push_str(&format!("- **Failure type:** {}\n", h.failure_type.title()));
        out.push_str(&format!("- **Detected:** {}\n\n", h.created.to_rfc3339()));
        out.push_str("## Error\n\n```\n");
        out.push_str(self.error.trim_end());
        out.push_str("\n```\n\n## Diagnostic checklist\n\n");
        for step in h.failure_type.checklist() {
            out.push_str(&format!("- [ ] {step}\n"));
        }
        out.push_str("\n## Next steps\n\n");
        for (n, step) in NEXT_STEPS.iter().enumerate() {
            out.push_str(&format!("{}. {step}\n", n + 1));
        }
        Ok(out)
    }
}

const NEXT_STEPS: &[&str] = &[
    "Investigate the root cause using the checklist above",
    "Document what you found in this file",
    "Apply the fix",
    "Verify the server responds normally",
    "Archive this file once resolved",
];

/// What the classifier managed to persist for one failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub failure_type: FailureType,
    pub server: String,
    pub record_logged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_path: Option<PathBuf>,
    pub summary_logged: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl FailureReport {
    pub fn fully_recorded(&self) -> bool {
        self.record_logged && self.task_path.is_some() && self.summary_logged
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Classify a failure given by name. Unknown types are rejected before
/// anything is written.
pub fn report_failure(
    root: &Path,
    failure_type: &str,
    server: &str,
    message: &str,
) -> Result<FailureReport> {
    let ft: FailureType = failure_type.parse()?;
    Ok(record_failure(root, ft, server, message))
}

pub fn record_failure(
    root: &Path,
    failure_type: FailureType,
    server: &str,
    message: &str,
) -> FailureReport {
    record_failure_at(root, failure_type, server, message, Utc::now())
}

pub fn record_failure_at(
    root: &Path,
    failure_type: FailureType,
    server: &str,
    message: &str,
    now: DateTime<Utc>,
) -> FailureReport {
    let mut report = FailureReport {
        failure_type,
        server: server.to_string(),
        record_logged: false,
        task_path: None,
        summary_logged: false,
        errors: Vec::new(),
    };

    // 1. Structured failure log.
    let record = McpFailureRecord {
        timestamp: now.trunc_subsecs(0),
        failure_type,
        server: server.to_string(),
        error_message: message.to_string(),
        remediation_status: RemediationStatus::Pending,
    };
    let log_path = paths::mcp_failure_log_path(root);
    match serde_json::to_string(&record)
        .map_err(StewardError::from)
        .and_then(|line| io::append_line(&log_path, &line))
    {
        Ok(()) => report.record_logged = true,
        Err(e) => note(&mut report, "failure log", &log_path, e),
    }

    // 2. Remediation task file.
    let task = RemediationTask::new(MCP_DOMAIN, server, failure_type, message, now);
    let task_path = paths::needs_action_dir(root).join(task.file_name());
    match write_task(&task, &task_path, now) {
        Ok(()) => report.task_path = Some(task_path),
        Err(e) => note(&mut report, "remediation task", &task_path, e),
    }

    // 3. Human-readable running log.
    let summary_path = paths::remediation_log_path(root);
    let target = report
        .task_path
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "(no task file)".to_string());
    let line = format!(
        "{} [{}] {}: {} -> {}",
        now.trunc_subsecs(0).to_rfc3339(),
        failure_type,
        server,
        first_line(message),
        target
    );
    match io::append_line(&summary_path, &line) {
        Ok(()) => report.summary_logged = true,
        Err(e) => note(&mut report, "summary log", &summary_path, e),
    }

    if !report.fully_recorded() {
        warn!(server, failure_type = %failure_type, "failure only partially recorded");
    }
    report
}

/// Write a new task, or append a recurrence note when the same server
/// failed again within the same minute.
fn write_task(task: &RemediationTask, path: &Path, now: DateTime<Utc>) -> Result<()> {
    if path.exists() {
        let note = format!(
            "\n## Recurrence at {}\n\n```\n{}\n```",
            now.trunc_subsecs(0).to_rfc3339(),
            task.error.trim_end()
        );
        return io::append_line(path, &note);
    }
    let body = task.render()?;
    io::atomic_write(path, body.as_bytes())
}

fn note(report: &mut FailureReport, step: &str, path: &Path, e: StewardError) {
    error!(step, path = %path.display(), error = %e, "remediation step failed");
    report.errors.push(format!("{step}: {e}"));
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim()
}

/// Parse every line of the failure log, skipping malformed ones.
pub fn read_failure_log(root: &Path) -> Result<Vec<McpFailureRecord>> {
    let path = paths::mcp_failure_log_path(root);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)?;
    Ok(content
        .lines()
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use regex::Regex;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, h, m, s).unwrap()
    }

    #[test]
    fn rate_limit_on_odoo_writes_all_three_artifacts() {
        let dir = TempDir::new().unwrap();
        let report = record_failure_at(
            dir.path(),
            FailureType::RateLimit,
            "odoo",
            "429 Too Many Requests",
            at(9, 30, 12),
        );
        assert!(report.fully_recorded(), "{:?}", report.errors);

        let records = read_failure_log(dir.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failure_type, FailureType::RateLimit);
        assert_eq!(records[0].server, "odoo");
        assert_eq!(records[0].remediation_status, RemediationStatus::Pending);

        let task_path = report.task_path.unwrap();
        let name = task_path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, "remediation__mcp__odoo__20261016-0930.md");
        let body = std::fs::read_to_string(&task_path).unwrap();
        assert!(body.contains("status: pending"));
        assert!(body.contains("429 Too Many Requests"));
        assert!(body.contains("retry.max_retries"));
        assert!(body.contains("Archive this file once resolved"));

        let summary = std::fs::read_to_string(paths::remediation_log_path(dir.path())).unwrap();
        assert_eq!(summary.lines().count(), 1);
        assert!(summary.contains("[rate_limit] odoo"));
    }

    #[test]
    fn filename_matches_contract_for_every_type() {
        let dir = TempDir::new().unwrap();
        let re = Regex::new(r"^remediation__mcp__gmail__\d{8}-\d{4}\.md$").unwrap();
        for (i, ft) in FailureType::all().iter().enumerate() {
            let report =
                record_failure_at(dir.path(), *ft, "gmail", "boom", at(10, i as u32, 0));
            let name = report.task_path.unwrap();
            assert!(re.is_match(name.file_name().unwrap().to_str().unwrap()));
        }
        let files = std::fs::read_dir(paths::needs_action_dir(dir.path()))
            .unwrap()
            .count();
        assert_eq!(files, 4);
    }

    #[test]
    fn each_type_has_its_own_checklist() {
        let auth = RemediationTask::new("mcp", "linkedin", FailureType::AuthFailure, "401", at(1, 0, 0))
            .render()
            .unwrap();
        assert!(auth.contains("access token has expired"));
        assert!(auth.contains("priority: high"));
        let timeout =
            RemediationTask::new("mcp", "linkedin", FailureType::ConnectionTimeout, "t", at(1, 0, 0))
                .render()
                .unwrap();
        assert!(timeout.contains("network connectivity"));
        let server =
            RemediationTask::new("mcp", "linkedin", FailureType::ServerError, "502", at(1, 0, 0))
                .render()
                .unwrap();
        assert!(server.contains("health endpoint"));
    }

    #[test]
    fn unknown_type_is_rejected_before_writing() {
        let dir = TempDir::new().unwrap();
        let err = report_failure(dir.path(), "cosmic_rays", "odoo", "x").unwrap_err();
        assert!(matches!(err, StewardError::UnknownFailureType(_)));
        assert!(!paths::mcp_failure_log_path(dir.path()).exists());
        assert!(!paths::needs_action_dir(dir.path()).exists());
    }

    #[test]
    fn same_minute_recurrence_appends_to_existing_task() {
        let dir = TempDir::new().unwrap();
        record_failure_at(dir.path(), FailureType::ServerError, "odoo", "first", at(8, 0, 1));
        let report =
            record_failure_at(dir.path(), FailureType::ServerError, "odoo", "second", at(8, 0, 40));
        let body = std::fs::read_to_string(report.task_path.unwrap()).unwrap();
        assert!(body.contains("first"));
        assert!(body.contains("Recurrence at"));
        assert!(body.contains("second"));
        assert_eq!(read_failure_log(dir.path()).unwrap().len(), 2);
    }

    #[test]
    fn blocked_task_dir_does_not_stop_logs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(paths::needs_action_dir(dir.path()), b"not a directory").unwrap();
        let report =
            record_failure_at(dir.path(), FailureType::AuthFailure, "email", "401", at(7, 0, 0));
        assert!(report.record_logged);
        assert!(report.summary_logged);
        assert!(report.task_path.is_none());
        assert_eq!(report.errors.len(), 1);
        assert!(!report.fully_recorded());
    }

    #[test]
    fn failure_type_roundtrip_names() {
        for ft in FailureType::all() {
            assert_eq!(ft.as_str().parse::<FailureType>().unwrap(), *ft);
        }
    }
}
