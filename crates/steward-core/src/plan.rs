//! Approved plan files.
//!
//! A plan is a markdown document in `approved/` with a YAML front-matter
//! header and exactly one fenced `json` (or `yaml`) block holding the action
//! list:
//!
//! ~~~text
//! ---
//! id: 20261016-0900-product-launch
//! operation: social
//! approved_by: alice
//! approved_at: 2026-10-16T09:12:00Z
//! ---
//! # Launch post
//!
//! ```json
//! [{"server": "instagram", "operation": "post_image",
//!   "parameters": {"caption": "We're live", "image_url": "https://…"}}]
//! ```
//! ~~~
//!
//! Plans are read-only here; moving an executed plan out of `approved/` is
//! the job of whoever owns the plan lifecycle.

use crate::error::{Result, StewardError};
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Domain tag the executor selects on (e.g. `social`, `email`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub server: String,
    pub operation: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl PlannedAction {
    /// `server.operation`, used as the audit action type.
    pub fn action_type(&self) -> String {
        format!("{}.{}", self.server, self.operation)
    }
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub path: PathBuf,
    pub header: PlanHeader,
    pub actions: Vec<PlannedAction>,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Plan> {
        let content = std::fs::read_to_string(path)?;
        Plan::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Plan> {
        let invalid = |reason: String| StewardError::InvalidPlan {
            path: path.display().to_string(),
            reason,
        };

        let (header_yaml, body) =
            split_front_matter(content).ok_or_else(|| invalid("missing front-matter header".into()))?;
        let header: PlanHeader = if header_yaml.trim().is_empty() {
            PlanHeader::default()
        } else {
            serde_yaml::from_str(header_yaml).map_err(|e| invalid(format!("header: {e}")))?
        };

        let blocks = fenced_blocks(body);
        let (lang, block) = match blocks.as_slice() {
            [one] => *one,
            [] => return Err(invalid("no json/yaml action block".into())),
            more => {
                return Err(invalid(format!(
                    "expected one action block, found {}",
                    more.len()
                )))
            }
        };
        let actions: Vec<PlannedAction> = if lang == "json" {
            serde_json::from_str(block).map_err(|e| invalid(format!("actions: {e}")))?
        } else {
            serde_yaml::from_str(block).map_err(|e| invalid(format!("actions: {e}")))?
        };

        Ok(Plan {
            path: path.to_path_buf(),
            header,
            actions,
        })
    }

    /// Header id, or the file stem when the header has none.
    pub fn id(&self) -> String {
        self.header.id.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }

    pub fn approved_by(&self) -> &str {
        self.header.approved_by.as_deref().unwrap_or("unknown")
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn recency(&self) -> Option<DateTime<Utc>> {
        self.header.approved_at.or(self.header.created_at)
    }
}

// ---------------------------------------------------------------------------
// Locating
// ---------------------------------------------------------------------------

fn name_matches(file_name: &str, domain: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    ["_", "-", "."]
        .iter()
        .any(|sep| lower.starts_with(&format!("{domain}{sep}")))
}

fn tag_matches(plan: &Plan, domain: &str) -> bool {
    plan.header
        .operation
        .as_deref()
        .is_some_and(|op| op.eq_ignore_ascii_case(domain))
}

/// Find the newest approved plan for `domain`.
///
/// A plan belongs to the domain when its `operation` tag equals the domain,
/// or its file name starts with `<domain>_`/`<domain>-`. A malformed plan
/// whose file name claims the domain is an error, not something to skip.
pub fn find_approved(root: &Path, domain: &str) -> Result<Plan> {
    let dir = paths::approved_dir(root);
    if !dir.is_dir() {
        return Err(StewardError::PlanNotFound(domain.to_string()));
    }

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let plan = match Plan::load(&path) {
            Ok(plan) => plan,
            Err(e) if name_matches(&file_name, domain) => return Err(e),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable plan");
                continue;
            }
        };
        if let Some(status) = plan.header.status.as_deref() {
            if !status.eq_ignore_ascii_case("approved") {
                debug!(path = %path.display(), status, "skipping plan not marked approved");
                continue;
            }
        }
        if tag_matches(&plan, domain) || name_matches(&file_name, domain) {
            candidates.push(plan);
        }
    }

    candidates.sort_by(|a, b| {
        b.recency()
            .cmp(&a.recency())
            .then_with(|| b.file_name().cmp(&a.file_name()))
    });
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| StewardError::PlanNotFound(domain.to_string()))
}

// ---------------------------------------------------------------------------
// Markdown helpers
// ---------------------------------------------------------------------------

/// Split `---\n<yaml>\n---\n<body>`.
fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let header = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

/// Fenced code blocks tagged `json`, `yaml`, or `yml`, as (lang, contents).
fn fenced_blocks(body: &str) -> Vec<(&'static str, &str)> {
    let mut blocks = Vec::new();
    let mut open: Option<(&'static str, usize)> = None;
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        let trimmed = line.trim();
        match open {
            None => {
                if let Some(tag) = trimmed.strip_prefix("```") {
                    let lang = match tag.trim().to_ascii_lowercase().as_str() {
                        "json" => Some("json"),
                        "yaml" | "yml" => Some("yaml"),
                        _ => None,
                    };
                    if let Some(lang) = lang {
                        open = Some((lang, offset + line.len()));
                    }
                }
            }
            Some((lang, start)) => {
                if trimmed == "```" {
                    blocks.push((lang, &body[start..offset]));
                    open = None;
                }
            }
        }
        offset += line.len();
    }
    blocks
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
