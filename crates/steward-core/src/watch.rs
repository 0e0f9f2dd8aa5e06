//! One perception pass: turn newly-seen items from a source into
//! `needs_action/` task files, at most once per item id.

use crate::checkpoint::CheckpointStore;
use crate::error::Result;
use crate::{io, paths};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceivedItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub source: String,
    pub seen: usize,
    pub already_processed: usize,
    pub created: Vec<PathBuf>,
}

#[derive(Serialize)]
struct ItemHeader<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    source: &'a str,
    item_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    received: Option<DateTime<Utc>>,
    detected: DateTime<Utc>,
    status: &'static str,
}

/// Read a JSON array of items, as produced by a source poller.
pub fn load_items(path: &Path) -> Result<Vec<PerceivedItem>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn item_file_name(source: &str, id: &str) -> String {
    format!("{source}__{}.md", paths::sanitize_component(id))
}

#[derive(Deserialize)]
struct EmittedHeader {
    #[serde(default)]
    item_id: Option<String>,
}

/// The raw item id recorded in an existing task file's header.
fn emitted_item_id(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let rest = text.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    serde_yaml::from_str::<EmittedHeader>(&rest[..=end])
        .ok()?
        .item_id
}

/// Where the task for `id` goes.
///
/// Sanitizing can map different ids onto one name, so an occupied name is
/// only reused when its header carries this exact id (`Existing`); otherwise
/// the next free `-2`, `-3`, ... suffix is taken.
enum Slot {
    Free(PathBuf),
    Existing(PathBuf),
}

fn slot_for(dir: &Path, source: &str, id: &str) -> Slot {
    let stem = format!("{source}__{}", paths::sanitize_component(id));
    let mut n = 1u32;
    loop {
        let name = if n == 1 {
            format!("{stem}.md")
        } else {
            format!("{stem}-{n}.md")
        };
        let path = dir.join(name);
        if !path.exists() {
            return Slot::Free(path);
        }
        if emitted_item_id(&path).as_deref() == Some(id) {
            return Slot::Existing(path);
        }
        n += 1;
    }
}

fn render(source: &str, item: &PerceivedItem, now: DateTime<Utc>) -> Result<String> {
    let header = ItemHeader {
        kind: "perceived_item",
        source,
        item_id: &item.id,
        received: item.received_at,
        detected: now.trunc_subsecs(0),
        status: "pending",
    };
    let mut out = format!("---\n{}---\n\n", serde_yaml::to_string(&header)?);
    let title = item.title.as_deref().unwrap_or("(untitled)");
    out.push_str(&format!("# {title}\n\n"));
    if let Some(body) = item.body.as_deref().filter(|b| !b.trim().is_empty()) {
        out.push_str(body.trim_end());
        out.push_str("\n\n");
    }
    out.push_str("## Suggested Actions\n\n- [ ] Review\n- [ ] Draft a plan if a response is needed\n");
    Ok(out)
}

/// Emit task files for unseen items and persist the checkpoint once.
///
/// If a write fails, items handled before it are still checkpointed and the
/// error is returned; the failed item is picked up again next cycle.
pub fn run_cycle(root: &Path, source: &str, items: &[PerceivedItem]) -> Result<CycleReport> {
    let mut store = CheckpointStore::load(root, source)?;
    let mut report = CycleReport {
        source: source.to_string(),
        seen: items.len(),
        ..Default::default()
    };
    let dir = paths::needs_action_dir(root);
    let now = Utc::now();
    let mut failure = None;

    for item in items {
        if store.has(&item.id) {
            report.already_processed += 1;
            continue;
        }
        let written = match slot_for(&dir, source, &item.id) {
            Slot::Existing(path) => {
                debug!(source, item = %item.id, path = %path.display(), "task already on disk");
                Ok(None)
            }
            Slot::Free(path) => render(source, item, now)
                .and_then(|doc| io::write_if_missing(&path, doc.as_bytes()))
                .and_then(|created| {
                    if created {
                        Ok(Some(path))
                    } else {
                        Err(std::io::Error::new(
                            std::io::ErrorKind::AlreadyExists,
                            format!("{} appeared while writing", path.display()),
                        )
                        .into())
                    }
                }),
        };
        match written {
            Ok(Some(path)) => {
                report.created.push(path);
                store.mark_processed([item.id.as_str()]);
                store.set_cursor(item.id.as_str());
            }
            Ok(None) => {
                store.mark_processed([item.id.as_str()]);
                store.set_cursor(item.id.as_str());
            }
            Err(e) => {
                error!(source, item = %item.id, error = %e, "failed to write task for item");
                failure = Some(e);
                break;
            }
        }
    }

    store.save()?;
    if let Some(e) = failure {
        return Err(e);
    }
    info!(
        source,
        seen = report.seen,
        created = report.created.len(),
        "perception cycle complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn item(id: &str) -> PerceivedItem {
        PerceivedItem {
            id: id.to_string(),
            title: Some(format!("Invoice question {id}")),
            body: Some("Can you resend the invoice?".to_string()),
            received_at: None,
        }
    }

    #[test]
    fn second_cycle_over_same_items_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let items = vec![item("m1"), item("m2")];

        let first = run_cycle(dir.path(), "gmail", &items).unwrap();
        assert_eq!(first.created.len(), 2);

        let second = run_cycle(dir.path(), "gmail", &items).unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.already_processed, 2);
        let files = std::fs::read_dir(paths::needs_action_dir(dir.path())).unwrap().count();
        assert_eq!(files, 2);
    }

    #[test]
    fn only_new_items_are_emitted() {
        let dir = TempDir::new().unwrap();
        run_cycle(dir.path(), "gmail", &[item("m1")]).unwrap();
        let report = run_cycle(dir.path(), "gmail", &[item("m1"), item("m3")]).unwrap();
        assert_eq!(report.created.len(), 1);
        assert!(report.created[0].ends_with("gmail__m3.md"));

        let store = CheckpointStore::load(dir.path(), "gmail").unwrap();
        assert_eq!(store.record().last_cursor.as_deref(), Some("m3"));
    }

    #[test]
    fn duplicate_ids_in_one_batch_emit_once() {
        let dir = TempDir::new().unwrap();
        let report = run_cycle(dir.path(), "whatsapp", &[item("a"), item("a")]).unwrap();
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.already_processed, 1);
    }

    #[test]
    fn task_file_has_header_and_title() {
        let dir = TempDir::new().unwrap();
        let report = run_cycle(dir.path(), "gmail", &[item("<abc@mail>")]).unwrap();
        let path = &report.created[0];
        assert!(path.ends_with("gmail___abc_mail_.md"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("---\n"));
        assert!(text.contains("item_id:"));
        assert!(text.contains("# Invoice question <abc@mail>"));
        assert!(text.contains("status: pending"));
    }

    #[test]
    fn failed_write_keeps_earlier_items_checkpointed() {
        let dir = TempDir::new().unwrap();
        run_cycle(dir.path(), "gmail", &[item("m1")]).unwrap();
        // Replace the task directory with a file so the next write fails.
        std::fs::remove_dir_all(paths::needs_action_dir(dir.path())).unwrap();
        std::fs::write(paths::needs_action_dir(dir.path()), b"blocked").unwrap();

        assert!(run_cycle(dir.path(), "gmail", &[item("m1"), item("m2")]).is_err());
        let store = CheckpointStore::load(dir.path(), "gmail").unwrap();
        assert!(store.has("m1"));
        assert!(!store.has("m2"));
    }

    #[test]
    fn ids_that_sanitize_alike_get_separate_files() {
        let dir = TempDir::new().unwrap();
        let report = run_cycle(dir.path(), "gmail", &[item("a/b"), item("a_b")]).unwrap();
        assert_eq!(report.created.len(), 2);
        assert!(report.created[0].ends_with("gmail__a_b.md"));
        assert!(report.created[1].ends_with("gmail__a_b-2.md"));
        let files = std::fs::read_dir(paths::needs_action_dir(dir.path())).unwrap().count();
        assert_eq!(files, 2);

        let store = CheckpointStore::load(dir.path(), "gmail").unwrap();
        assert!(store.has("a/b"));
        assert!(store.has("a_b"));
    }

    #[test]
    fn unrelated_file_at_target_name_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let taken = paths::needs_action_dir(dir.path()).join("gmail__m1.md");
        io::atomic_write(&taken, b"hand-written note").unwrap();

        let report = run_cycle(dir.path(), "gmail", &[item("m1")]).unwrap();
        assert_eq!(report.created.len(), 1);
        assert!(report.created[0].ends_with("gmail__m1-2.md"));
        assert_eq!(std::fs::read_to_string(&taken).unwrap(), "hand-written note");
    }

    #[test]
    fn task_left_by_an_unsaved_cycle_is_not_duplicated() {
        let dir = TempDir::new().unwrap();
        run_cycle(dir.path(), "gmail", &[item("m1")]).unwrap();
        CheckpointStore::load(dir.path(), "gmail").unwrap().reset().unwrap();

        let report = run_cycle(dir.path(), "gmail", &[item("m1")]).unwrap();
        assert!(report.created.is_empty());
        let files = std::fs::read_dir(paths::needs_action_dir(dir.path())).unwrap().count();
        assert_eq!(files, 1);
        assert!(CheckpointStore::load(dir.path(), "gmail").unwrap().has("m1"));
    }

    #[test]
    fn load_items_reads_json_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(&path, r#"[{"id":"x","title":"t"},{"id":"y"}]"#).unwrap();
        let items = load_items(&path).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].title, None);
    }
}
