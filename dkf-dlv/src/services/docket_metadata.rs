//! Docket display metadata
//!
//! Only used for headings and labels; delivery never depends on it.

use super::path_config::{DocketLocation, PathConfig};
use chrono::{Datelike, Local};
use dkf_common::SettingsProvider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Display information for a docket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocketInfo {
    pub number: String,
    pub job_name: String,
    /// `<number>_<job name>` as it appears on the server
    pub full_name: String,
    #[serde(default)]
    pub subtasks: Vec<String>,
}

pub trait DocketMetadataProvider: Send + Sync {
    fn lookup(&self, docket: &str) -> Option<DocketInfo>;
}

/// Job name for headings, falling back to the raw docket
pub fn display_job_name(provider: &dyn DocketMetadataProvider, docket: &str) -> String {
    provider
        .lookup(docket)
        .map(|info| info.job_name)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| docket.to_string())
}

/// Derives the job name from the docket's Work Picture folder name
///
/// `12345_Acme Spot` → `Acme Spot`.
pub struct FolderNameMetadata {
    settings: Arc<SettingsProvider>,
}

impl FolderNameMetadata {
    pub fn new(settings: Arc<SettingsProvider>) -> Self {
        Self { settings }
    }
}

/// Job name part of a docket folder name
pub fn job_name_from_folder(folder_name: &str, docket: &str) -> Option<String> {
    let rest = folder_name.strip_prefix(docket)?;
    let name = rest.trim_start_matches(&['_', ' ', '-'][..]).trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

impl DocketMetadataProvider for FolderNameMetadata {
    fn lookup(&self, docket: &str) -> Option<DocketInfo> {
        let year = Local::now().year();
        let paths = PathConfig::new(self.settings.snapshot());
        let DocketLocation::Found(folder) = paths.locate_docket_work_picture(docket, year) else {
            return None;
        };
        let full_name = folder.file_name()?.to_string_lossy().to_string();
        let job_name = job_name_from_folder(&full_name, docket)?;
        Some(DocketInfo {
            number: docket.to_string(),
            job_name,
            full_name,
            subtasks: Vec::new(),
        })
    }
}
