//! Staging set
//!
//! Entries are identified by UUID; progress and completion live in side tables
//! keyed by that id, never inside the entry itself.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

/// Opaque staged entry identifier
pub type EntryId = Uuid;

/// Names never counted, staged or copied
pub(crate) const IGNORED_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// Whether a file system entry name is hidden or OS clutter
pub(crate) fn is_ignored_name(name: &str) -> bool {
    name.starts_with('.') || IGNORED_NAMES.contains(&name)
}

/// A path the user staged for delivery
///
/// Directories are not flattened here; flattening happens lazily during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedEntry {
    pub id: EntryId,
    pub path: PathBuf,
    pub display_name: String,
    pub is_directory: bool,
    /// Recursive file count (1 for a file)
    pub file_count: usize,
    /// Size in bytes, files only
    pub size_bytes: Option<u64>,
}

impl StagedEntry {
    /// Stat a path and build its entry
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        let (file_count, size_bytes) = if metadata.is_dir() {
            (count_files(path), None)
        } else {
            (1, Some(metadata.len()))
        };

        Ok(Self {
            id: Uuid::new_v4(),
            path: path.to_path_buf(),
            display_name,
            is_directory: metadata.is_dir(),
            file_count,
            size_bytes,
        })
    }
}

fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_name(&e.file_name().to_string_lossy()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

/// The coordinator's ordered set of staged entries
#[derive(Debug, Clone, Default, Serialize)]
pub struct StagingSet {
    entries: Vec<StagedEntry>,
}

impl StagingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a path; staging the same path twice returns the existing entry
    pub fn add(&mut self, path: &Path) -> std::io::Result<StagedEntry> {
        if let Some(existing) = self.entries.iter().find(|e| e.path == path) {
            return Ok(existing.clone());
        }
        let entry = StagedEntry::from_path(path)?;
        Ok(self.insert(entry))
    }

    /// Insert an entry built elsewhere; an already staged path wins
    pub fn insert(&mut self, entry: StagedEntry) -> StagedEntry {
        if let Some(existing) = self.entries.iter().find(|e| e.path == entry.path) {
            return existing.clone();
        }
        self.entries.push(entry.clone());
        entry
    }

    pub fn remove(&mut self, id: EntryId) -> Option<StagedEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[StagedEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_files(&self) -> usize {
        self.entries.iter().map(|e| e.file_count).sum()
    }
}
