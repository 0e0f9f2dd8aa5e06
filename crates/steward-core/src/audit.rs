//! Append-only audit trail, one JSON-lines file per UTC day.
//!
//! Layout:
//!   logs/audit/2026-10-16.jsonl
//!
//! Recording never fails from the caller's point of view: a write error is
//! logged through `tracing` and the entry is still returned.

use crate::error::{Result, StewardError};
use crate::paths;
use chrono::{DateTime, Duration, NaiveDate, SubsecRound, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    Pending,
    Rejected,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Partial,
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditResult::Success => f.write_str("success"),
            AuditResult::Failure => f.write_str("failure"),
            AuditResult::Partial => f.write_str("partial"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Redacted copy of the call parameters.
    pub parameters: Value,
    pub approval_status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_ref: Option<String>,
    pub approved_by: String,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything the caller supplies; the log adds the timestamp and redacts.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub action_type: String,
    pub actor: String,
    pub target: Option<String>,
    pub parameters: Value,
    pub approval_status: ApprovalStatus,
    pub approval_ref: Option<String>,
    pub approved_by: String,
    pub result: AuditResult,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(root: &Path) -> Self {
        Self {
            dir: paths::audit_dir(root),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn day_path(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// Append one entry to today's partition.
    pub fn record(&self, draft: EntryDraft) -> AuditEntry {
        let entry = AuditEntry {
            timestamp: Utc::now().trunc_subsecs(0),
            action_type: draft.action_type,
            actor: draft.actor,
            target: draft.target,
            parameters: redact(&draft.parameters),
            approval_status: draft.approval_status,
            approval_ref: draft.approval_ref,
            approved_by: draft.approved_by,
            result: draft.result,
            error: draft.error,
        };
        let path = self.day_path(entry.timestamp.date_naive());
        let written = serde_json::to_string(&entry)
            .map_err(StewardError::from)
            .and_then(|line| crate::io::append_line(&path, &line));
        match written {
            Ok(()) => info!(
                action = %entry.action_type,
                result = %entry.result,
                "audit entry recorded"
            ),
            Err(e) => error!(
                path = %path.display(),
                action = %entry.action_type,
                error = %e,
                "failed to write audit entry"
            ),
        }
        entry
    }

    /// All parseable entries for `day`, in file order.
    pub fn read_day(&self, day: NaiveDate) -> Result<Vec<AuditEntry>> {
        let path = self.day_path(day);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)?;
        let mut entries = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    path = %path.display(),
                    line = n + 1,
                    error = %e,
                    "skipping malformed audit line"
                ),
            }
        }
        Ok(entries)
    }

    /// Delete day files strictly older than `today - days`. Files whose name
    /// is not a `YYYY-MM-DD.jsonl` date are left alone.
    pub fn purge_older_than(&self, days: u32, today: NaiveDate) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        if !self.dir.is_dir() {
            return Ok(removed);
        }
        let cutoff = today - Duration::days(i64::from(days));
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(day) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            else {
                continue;
            };
            if day < cutoff {
                std::fs::remove_file(&path)?;
                info!(path = %path.display(), "purged audit partition");
                removed.push(path);
            }
        }
        removed.sort();
        Ok(removed)
    }
}

/// Parse a `YYYY-MM-DD` CLI argument.
pub fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| StewardError::InvalidDate(s.to_string()))
}

// ---------------------------------------------------------------------------
// Redaction
// ---------------------------------------------------------------------------

const REDACTED: &str = "[REDACTED]";

const SECRET_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "cookie",
    "phone",
    "ssn",
];

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();

fn email_re() -> &'static Regex {
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"([A-Za-z0-9._%+\-])[A-Za-z0-9._%+\-]*@([A-Za-z0-9.\-]+\.[A-Za-z]{2,})")
            .unwrap()
    })
}

/// Copy of `value` with secret-bearing keys blanked and email local parts masked.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let lower = k.to_ascii_lowercase();
                    if SECRET_KEYS.iter().any(|s| lower.contains(s)) {
                        (k.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (k.clone(), redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::String(s) => Value::String(email_re().replace_all(s, "$1***@$2").into_owned()),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
