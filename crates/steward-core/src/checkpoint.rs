use crate::error::Result;
use crate::{io, paths};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

// ─── CheckpointRecord ─────────────────────────────────────────────────────

/// On-disk shape of `.steward/checkpoints/<source>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    #[serde(default)]
    pub processed_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

// ─── CheckpointStore ──────────────────────────────────────────────────────

/// Processed-item memory for one perception source.
///
/// Load once at the start of a run, `mark_processed` as items are handled,
/// and `save` after each completed batch. The id set only grows; `reset`
/// is the one way to shrink it.
///
/// ```rust,ignore
/// let mut store = CheckpointStore::load(root, "gmail")?;
/// let fresh: Vec<_> = items.iter().filter(|i| !store.has(&i.id)).collect();
/// // ... handle fresh items ...
/// store.mark_processed(fresh.iter().map(|i| i.id.as_str()));
/// store.save()?;
/// ```
#[derive(Debug)]
pub struct CheckpointStore {
    source: String,
    path: PathBuf,
    record: CheckpointRecord,
}

impl CheckpointStore {
    /// Load the checkpoint for `source`, or start empty if none exists.
    pub fn load(root: &Path, source: &str) -> Result<Self> {
        paths::validate_name(source)?;
        let path = paths::checkpoint_path(root, source);
        let record = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                CheckpointRecord::default()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            CheckpointRecord::default()
        };
        Ok(Self {
            source: source.to_string(),
            path,
            record,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn record(&self) -> &CheckpointRecord {
        &self.record
    }

    pub fn len(&self) -> usize {
        self.record.processed_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.processed_ids.is_empty()
    }

    /// Exact-match membership.
    pub fn has(&self, id: &str) -> bool {
        self.record.processed_ids.contains(id)
    }

    /// Returns how many of `ids` were new.
    pub fn mark_processed<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ids.into_iter()
            .map(|id| self.record.processed_ids.insert(id.into()))
            .filter(|inserted| *inserted)
            .count()
    }

    pub fn set_cursor(&mut self, cursor: impl Into<String>) {
        self.record.last_cursor = Some(cursor.into());
    }

    /// Persist atomically, stamping `last_run`.
    pub fn save(&mut self) -> Result<()> {
        self.record.last_run = Some(Utc::now());
        let data = serde_json::to_vec_pretty(&self.record)?;
        io::atomic_write(&self.path, &data)
    }

    /// Forget everything for this source and remove the file.
    pub fn reset(&mut self) -> Result<()> {
        self.record = CheckpointRecord::default();
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_when_no_file() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::load(dir.path(), "gmail").unwrap();
        assert!(store.is_empty());
        assert!(!store.has("m1"));
    }

    #[test]
    fn save_and_reload_keeps_ids_and_cursor() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::load(dir.path(), "gmail").unwrap();
        assert_eq!(store.mark_processed(["m1", "m2"]), 2);
        store.set_cursor("m2");
        store.save().unwrap();

        let reloaded = CheckpointStore::load(dir.path(), "gmail").unwrap();
        assert!(reloaded.has("m1"));
        assert!(reloaded.has("m2"));
        assert_eq!(reloaded.record().last_cursor.as_deref(), Some("m2"));
        assert!(reloaded.record().last_run.is_some());
    }

    #[test]
    fn mark_processed_counts_only_new() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::load(dir.path(), "linkedin").unwrap();
        store.mark_processed(["a"]);
        assert_eq!(store.mark_processed(["a", "b"]), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn membership_is_exact() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::load(dir.path(), "gmail").unwrap();
        store.mark_processed(["Msg-1"]);
        assert!(!store.has("msg-1"));
        assert!(!store.has("Msg-1 "));
        assert!(store.has("Msg-1"));
    }

    #[test]
    fn sources_are_independent() {
        let dir = TempDir::new().unwrap();
        let mut a = CheckpointStore::load(dir.path(), "gmail").unwrap();
        a.mark_processed(["x"]);
        a.save().unwrap();
        let b = CheckpointStore::load(dir.path(), "whatsapp").unwrap();
        assert!(!b.has("x"));
    }

    #[test]
    fn reset_clears_file() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::load(dir.path(), "gmail").unwrap();
        store.mark_processed(["x"]);
        store.save().unwrap();
        store.reset().unwrap();
        assert!(!paths::checkpoint_path(dir.path(), "gmail").exists());
        let reloaded = CheckpointStore::load(dir.path(), "gmail").unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn rejects_path_like_source() {
        let dir = TempDir::new().unwrap();
        assert!(CheckpointStore::load(dir.path(), "../etc").is_err());
    }
}
