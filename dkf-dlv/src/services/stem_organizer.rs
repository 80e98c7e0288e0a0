//! Stem grouping in a prep MUSIC folder
//!
//! `Theme_vocal.wav` and `Theme_instrumental.wav` share the track `Theme`, so
//! both move into `Theme STEMS/`. Single-member groups stay where they are.

use super::categorizer;
use dkf_common::Settings;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const SEPARATORS: &[char] = &['_', '-', ' ', '.'];

/// Files moved into one `<track> STEMS` folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StemGroup {
    pub track: String,
    pub folder: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Track name of a stem file, if its name ends in a stem keyword
///
/// The keyword must follow a separator; longer keywords win (`vocals` over
/// `vocal`).
pub fn stem_track_name(file_name: &str, keywords: &[String]) -> Option<String> {
    let stem = Path::new(file_name).file_stem()?.to_str()?;

    let mut ordered: Vec<&String> = keywords.iter().collect();
    ordered.sort_by(|a, b| b.len().cmp(&a.len()));

    for keyword in ordered {
        if keyword.is_empty() || stem.len() <= keyword.len() {
            continue;
        }
        let split = stem.len() - keyword.len();
        if !stem.is_char_boundary(split) || !stem[split..].eq_ignore_ascii_case(keyword) {
            continue;
        }
        let head = &stem[..split];
        if !head.ends_with(SEPARATORS) {
            continue;
        }
        let track = head.trim_end_matches(SEPARATORS).trim();
        if !track.is_empty() {
            return Some(track.to_string());
        }
    }
    None
}

/// Where an earlier run already grouped `file_name`, if it did
pub fn grouped_copy(music_dir: &Path, file_name: &str, keywords: &[String]) -> Option<PathBuf> {
    let track = stem_track_name(file_name, keywords)?;
    let target = music_dir.join(format!("{} STEMS", track)).join(file_name);
    target.is_file().then_some(target)
}

/// Group top-level audio stems under `music_dir` into `<track> STEMS/`
///
/// Files whose destination already exists are left in place.
pub fn group_stems(music_dir: &Path, settings: &Settings) -> std::io::Result<Vec<StemGroup>> {
    if !music_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(music_dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| categorizer::is_audio(p, settings))
        .collect();
    files.sort();

    // Keyed case-insensitively; the first spelling seen names the folder
    let mut groups: BTreeMap<String, (String, Vec<PathBuf>)> = BTreeMap::new();
    for file in files {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(track) = stem_track_name(name, &settings.categories.stem_keywords) {
            groups
                .entry(track.to_lowercase())
                .or_insert_with(|| (track, Vec::new()))
                .1
                .push(file);
        }
    }

    let mut moved = Vec::new();
    for (_, (track, members)) in groups {
        if members.len() < 2 {
            continue;
        }
        let folder = music_dir.join(format!("{} STEMS", track));
        std::fs::create_dir_all(&folder)?;

        let mut placed = Vec::new();
        for file in members {
            let Some(name) = file.file_name() else { continue };
            let target = folder.join(name);
            if target.exists() {
                debug!(file = %target.display(), "Stem already grouped, leaving source");
                continue;
            }
            match std::fs::rename(&file, &target) {
                Ok(()) => placed.push(target),
                Err(e) => warn!(file = %file.display(), error = %e, "Failed to move stem"),
            }
        }

        info!(track = %track, files = placed.len(), "Grouped stems");
        moved.push(StemGroup {
            track,
            folder,
            files: placed,
        });
    }

    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn keywords() -> Vec<String> {
        Settings::default().categories.stem_keywords
    }

    #[test]
    fn track_name_from_trailing_keyword() {
        let kw = keywords();
        assert_eq!(stem_track_name("Theme_vocal.wav", &kw), Some("Theme".into()));
        assert_eq!(stem_track_name("Theme_Instrumental.wav", &kw), Some("Theme".into()));
        assert_eq!(stem_track_name("Big Song - VOCALS.aif", &kw), Some("Big Song".into()));
        assert_eq!(stem_track_name("Theme.wav", &kw), None);
        // Keyword must follow a separator
        assert_eq!(stem_track_name("Thebass.wav", &kw), None);
        assert_eq!(stem_track_name("_vocal.wav", &kw), None);
    }

    #[test]
    fn groups_multi_member_tracks_only() {
        let dir = TempDir::new().unwrap();
        let music = dir.path();
        for name in [
            "Theme_vocal.wav",
            "Theme_instrumental.wav",
            "Lonely_bass.wav",
            "Full Mix.wav",
            "notes_vocal.txt",
        ] {
            fs::write(music.join(name), b"x").unwrap();
        }

        let groups = group_stems(music, &Settings::default()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].track, "Theme");
        assert_eq!(groups[0].files.len(), 2);

        let stems = music.join("Theme STEMS");
        assert!(stems.join("Theme_vocal.wav").is_file());
        assert!(stems.join("Theme_instrumental.wav").is_file());
        assert!(!music.join("Theme_vocal.wav").exists());
        assert!(music.join("Lonely_bass.wav").is_file());
        assert!(music.join("Full Mix.wav").is_file());
        assert!(music.join("notes_vocal.txt").is_file());
    }

    #[test]
    fn grouped_copy_found_only_after_grouping() {
        let dir = TempDir::new().unwrap();
        let music = dir.path();
        fs::write(music.join("Theme_vocal.wav"), b"v").unwrap();
        fs::write(music.join("Theme_instrumental.wav"), b"i").unwrap();
        assert_eq!(grouped_copy(music, "Theme_vocal.wav", &keywords()), None);

        group_stems(music, &Settings::default()).unwrap();
        assert_eq!(
            grouped_copy(music, "Theme_vocal.wav", &keywords()),
            Some(music.join("Theme STEMS/Theme_vocal.wav"))
        );
        assert_eq!(grouped_copy(music, "Theme.wav", &keywords()), None);
    }

    #[test]
    fn missing_music_folder_is_empty() {
        let dir = TempDir::new().unwrap();
        let groups = group_stems(&dir.path().join("MUSIC"), &Settings::default()).unwrap();
        assert!(groups.is_empty());
    }
}
