//! Numbered delivery folder allocation
//!
//! Delivery and demo folders are named `NN_<date>`. Only the numeric prefix
//! governs ordering; the date part is free text.

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Leading digits of `NN_…`, if the name has that shape
pub fn parse_sequence_prefix(name: &str) -> Option<u32> {
    let digits_end = name.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 || !name[digits_end..].starts_with('_') {
        return None;
    }
    name[..digits_end].parse().ok()
}

/// Next free sequence number under `base_dir`
///
/// Returns max existing prefix + 1, or 1 when nothing is numbered or the
/// directory cannot be listed.
pub fn next_sequence(base_dir: &Path) -> u32 {
    let entries = match std::fs::read_dir(base_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %base_dir.display(), error = %e, "Cannot list, starting at 1");
            return 1;
        }
    };

    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| parse_sequence_prefix(&e.file_name().to_string_lossy()))
        .max()
        .map(|max| max.saturating_add(1))
        .unwrap_or(1)
}

/// `01_Oct16.26`
pub fn sequence_folder_name(sequence: u32, date_text: &str) -> String {
    format!("{:02}_{}", sequence, date_text)
}

/// Allocate and create the next `NN_<date>` folder under `base_dir`
///
/// Uses `create_dir` (not `create_dir_all`) for the leaf so a concurrent
/// allocator that won the same number makes us move to the next one.
pub fn allocate_folder(base_dir: &Path, date_text: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(base_dir)?;
    let mut sequence = next_sequence(base_dir);
    loop {
        let candidate = base_dir.join(sequence_folder_name(sequence, date_text));
        match std::fs::create_dir(&candidate) {
            Ok(()) => {
                debug!(folder = %candidate.display(), "Allocated delivery folder");
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(folder = %candidate.display(), "Sequence taken, retrying");
                sequence = next_sequence(base_dir).max(sequence + 1);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Demo date folder for a docket
///
/// Reuses the most recently modified numbered folder; allocates `01_<date>`
/// (or the next number) only when the docket has none.
pub fn resolve_demo_folder(docket_demo_dir: &Path, date_text: &str) -> std::io::Result<PathBuf> {
    if let Some(existing) = most_recent_numbered_folder(docket_demo_dir) {
        debug!(folder = %existing.display(), "Reusing demo folder");
        return Ok(existing);
    }
    allocate_folder(docket_demo_dir, date_text)
}

fn most_recent_numbered_folder(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| parse_sequence_prefix(&e.file_name().to_string_lossy()).is_some())
        .map(|e| {
            let modified = e
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, e.path())
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parses_numeric_prefix() {
        assert_eq!(parse_sequence_prefix("01_Oct16.26"), Some(1));
        assert_eq!(parse_sequence_prefix("117_x"), Some(117));
        assert_eq!(parse_sequence_prefix("_01"), None);
        assert_eq!(parse_sequence_prefix("01-Oct"), None);
        assert_eq!(parse_sequence_prefix("12345"), None);
        assert_eq!(parse_sequence_prefix("Notes"), None);
    }

    #[test]
    fn empty_directory_allocates_one_two_three() {
        let dir = TempDir::new().unwrap();
        let first = allocate_folder(dir.path(), "Oct16.26").unwrap();
        let second = allocate_folder(dir.path(), "Oct16.26").unwrap();
        let third = allocate_folder(dir.path(), "Oct17.26").unwrap();

        assert!(first.ends_with("01_Oct16.26"));
        assert!(second.ends_with("02_Oct16.26"));
        assert!(third.ends_with("03_Oct17.26"));
    }

    #[test]
    fn next_sequence_exceeds_every_existing_prefix() {
        let dir = TempDir::new().unwrap();
        for name in ["01_a", "07_b", "03_c", "Notes", "99"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        // Files never count
        fs::write(dir.path().join("50_file.txt"), b"x").unwrap();

        assert_eq!(next_sequence(dir.path()), 8);
    }

    #[test]
    fn missing_directory_starts_at_one() {
        assert_eq!(next_sequence(Path::new("/definitely/not/here")), 1);
    }

    #[test]
    fn demo_folder_reuses_existing() {
        let dir = TempDir::new().unwrap();
        let created = resolve_demo_folder(dir.path(), "Oct16.26").unwrap();
        assert!(created.ends_with("01_Oct16.26"));

        let reused = resolve_demo_folder(dir.path(), "Oct20.26").unwrap();
        assert_eq!(reused, created);
    }
}
