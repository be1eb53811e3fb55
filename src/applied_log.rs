use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::models::AppliedLogEntry;

/// Every posting the worker has acted on, persisted as a JSON array.
///
/// The URL set is the dedup key for all future discovery results: a URL in
/// here is never attempted again, whatever its recorded status.
pub struct AppliedLog {
    path: PathBuf,
    entries: Vec<AppliedLogEntry>,
    urls: HashSet<String>,
}

impl AppliedLog {
    /// Loads the log at `path`. A missing or malformed file yields an empty log.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(raw) => parse_entries(&raw, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), "Applied log unreadable, starting empty: {}", e);
                Vec::new()
            }
        };

        let urls = entries.iter().map(|e| e.url.clone()).collect();
        Self {
            path: path.to_path_buf(),
            entries,
            urls,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn entries(&self) -> &[AppliedLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records the entry and rewrites the file. On a persistent write failure
    /// the entry stays in memory (so the posting is still skipped) and the
    /// error is returned for the caller to abort its cycle.
    pub fn append(&mut self, entry: AppliedLogEntry) -> Result<()> {
        self.urls.insert(entry.url.clone());
        self.entries.push(entry);

        if let Err(first) = self.save() {
            warn!(path = %self.path.display(), "Applied log write failed, retrying once: {:#}", first);
            self.save().context("Applied log write failed twice")?;
        }
        Ok(())
    }

    /// Drops every entry for `url` so the posting is picked up again.
    pub fn remove(&mut self, url: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.url != url);
        self.urls.remove(url);
        before - self.entries.len()
    }

    /// Rewrites the whole file through a temporary sibling and a rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

fn parse_entries(raw: &str, path: &Path) -> Vec<AppliedLogEntry> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %path.display(), "Applied log is corrupted, resetting: {}", e);
            return Vec::new();
        }
    };

    let serde_json::Value::Array(items) = value else {
        warn!(path = %path.display(), "Applied log is not a list, resetting");
        return Vec::new();
    };

    let total = items.len();
    let entries: Vec<AppliedLogEntry> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if entries.len() < total {
        warn!(
            path = %path.display(),
            dropped = total - entries.len(),
            "Ignoring malformed applied log entries"
        );
    }
    entries
}
