//! Extension-based file routing for prep folders

use dkf_common::Settings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prep category folders that files are routed into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileCategory {
    Picture,
    Music,
    AafOmf,
    Other,
}

impl FileCategory {
    /// Folder name for this category from settings
    pub fn folder_name(self, settings: &Settings) -> &str {
        let folders = &settings.folders;
        match self {
            FileCategory::Picture => &folders.picture,
            FileCategory::Music => &folders.music,
            FileCategory::AafOmf => &folders.aaf_omf,
            FileCategory::Other => &folders.other,
        }
    }

    fn enabled(self, settings: &Settings) -> bool {
        let categories = &settings.categories;
        match self {
            FileCategory::Picture => categories.picture_enabled,
            FileCategory::Music => categories.music_enabled,
            FileCategory::AafOmf => categories.aaf_omf_enabled,
            FileCategory::Other => categories.other_enabled,
        }
    }
}

/// Lowercase extension without the dot
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

fn listed(list: &[String], ext: &str) -> bool {
    list.iter().any(|candidate| candidate.eq_ignore_ascii_case(ext))
}

/// Category implied by the extension alone
pub fn natural_category(path: &Path, settings: &Settings) -> FileCategory {
    let Some(ext) = extension_of(path) else {
        return FileCategory::Other;
    };
    let categories = &settings.categories;
    if listed(&categories.picture_extensions, &ext) {
        FileCategory::Picture
    } else if listed(&categories.music_extensions, &ext) {
        FileCategory::Music
    } else if listed(&categories.aaf_omf_extensions, &ext) {
        FileCategory::AafOmf
    } else {
        FileCategory::Other
    }
}

/// Destination category honoring the enable toggles
///
/// Disabled categories fall back to OTHER; `None` means skip the file
/// because OTHER is disabled too.
pub fn route(path: &Path, settings: &Settings) -> Option<FileCategory> {
    let natural = natural_category(path, settings);
    if natural.enabled(settings) {
        Some(natural)
    } else if FileCategory::Other.enabled(settings) {
        Some(FileCategory::Other)
    } else {
        None
    }
}

/// Whether the file needs a transcode decision when routed to PICTURE
pub fn is_video(path: &Path, settings: &Settings) -> bool {
    extension_of(path)
        .map(|ext| listed(&settings.categories.video_extensions, &ext))
        .unwrap_or(false)
}

/// Whether the file is audio by the MUSIC extension table
pub fn is_audio(path: &Path, settings: &Settings) -> bool {
    extension_of(path)
        .map(|ext| listed(&settings.categories.music_extensions, &ext))
        .unwrap_or(false)
}
