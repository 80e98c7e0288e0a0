//! Canonical storage paths
//!
//! Pure function of a settings snapshot: nothing here caches or mutates state,
//! except [`PathConfig::ensure_year_scaffolding`] which creates folders on request.
//!
//! Layout:
//! ```text
//! <server>/<prefix><year>/<year>_<work picture>/<docket>/<NN>_<date>/
//! <server>/<prefix><year>/<year>_<prep>/<docket>_PREP_<date>/
//! <sessions>/<prefix><year>/<session>/
//! ```

use chrono::NaiveDate;
use dkf_common::Settings;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a docket's Work Picture folder was (or would be) found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocketLocation {
    /// Existing docket folder
    Found(PathBuf),
    /// Not present in any year; `expected` is the current-year candidate
    Missing { expected: PathBuf },
}

#[derive(Debug, Clone)]
pub struct PathConfig {
    settings: Arc<Settings>,
}

impl PathConfig {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn server_root(&self) -> &Path {
        &self.settings.paths.server_base_path
    }

    /// `GM_2026`
    pub fn year_folder_name(&self, year: i32) -> String {
        format!("{}{}", self.settings.folders.year_prefix, year)
    }

    /// `<server>/GM_2026`
    pub fn year_folder(&self, year: i32) -> PathBuf {
        self.server_root().join(self.year_folder_name(year))
    }

    /// `<server>/GM_2026/2026_WORK PICTURE`
    pub fn work_picture_folder(&self, year: i32) -> PathBuf {
        self.year_folder(year)
            .join(format!("{}_{}", year, self.settings.folders.work_picture))
    }

    /// `<server>/GM_2026/2026_SESSION PREP`
    pub fn prep_folder(&self, year: i32) -> PathBuf {
        self.year_folder(year)
            .join(format!("{}_{}", year, self.settings.folders.prep))
    }

    /// `<server>/GM_2026/2026_MUSIC DEMOS`
    pub fn demos_folder(&self, year: i32) -> PathBuf {
        self.year_folder(year)
            .join(format!("{}_{}", year, self.settings.folders.demos))
    }

    /// `<sessions>/GM_2026`
    pub fn sessions_folder(&self, year: i32) -> PathBuf {
        self.settings
            .paths
            .sessions_base_path
            .join(self.year_folder_name(year))
    }

    /// Prep folder name for a docket, e.g. `12345_PREP_Oct16.26`
    pub fn prep_folder_name(&self, docket: &str, date: NaiveDate) -> String {
        let date_text = format_date(date, &self.settings.naming.prep_date_format);
        self.settings
            .naming
            .prep_folder_template
            .replace("{docket}", docket)
            .replace("{date}", &date_text)
    }

    /// `12345_Prep_Summary.txt`
    pub fn summary_file_name(&self, docket: &str) -> String {
        self.settings
            .naming
            .summary_file_template
            .replace("{docket}", docket)
    }

    pub fn work_picture_date_text(&self, date: NaiveDate) -> String {
        format_date(date, &self.settings.naming.work_picture_date_format)
    }

    pub fn demo_date_text(&self, date: NaiveDate) -> String {
        format_date(date, &self.settings.naming.demo_date_format)
    }

    /// Year folders under `root`, newest first
    ///
    /// Only names of the form `<prefix><digits>` count.
    pub fn year_folders(&self, root: &Path) -> std::io::Result<Vec<(i32, PathBuf)>> {
        let prefix = &self.settings.folders.year_prefix;
        let mut years = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(year) = name
                .strip_prefix(prefix.as_str())
                .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
                .and_then(|rest| rest.parse::<i32>().ok())
            {
                years.push((year, entry.path()));
            }
        }
        years.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(years)
    }

    /// Find the docket's Work Picture folder in any year, newest first
    ///
    /// Falls back to the `fallback_year` candidate path when no year has it.
    pub fn locate_docket_work_picture(&self, docket: &str, fallback_year: i32) -> DocketLocation {
        // The requested year is checked first so a docket reused across years
        // resolves to the one the user is working in.
        let preferred = self.work_picture_folder(fallback_year);
        if let Some(found) = find_docket_folder(&preferred, docket) {
            return DocketLocation::Found(found);
        }

        match self.year_folders(self.server_root()) {
            Ok(years) => {
                for (year, _) in years {
                    if year == fallback_year {
                        continue;
                    }
                    if let Some(found) = find_docket_folder(&self.work_picture_folder(year), docket) {
                        debug!(docket, year, "Docket found outside requested year");
                        return DocketLocation::Found(found);
                    }
                }
            }
            Err(e) => {
                warn!(
                    root = %self.server_root().display(),
                    error = %e,
                    "Cannot list year folders while locating docket"
                );
            }
        }

        DocketLocation::Missing {
            expected: preferred.join(docket),
        }
    }

    /// Create the year folder and its Work Picture / Prep / Demos subfolders
    ///
    /// Returns the folders that did not exist before. Callers must invalidate
    /// cached search indexes afterwards.
    pub fn ensure_year_scaffolding(&self, year: i32) -> std::io::Result<Vec<PathBuf>> {
        let mut created = Vec::new();
        for folder in [
            self.year_folder(year),
            self.work_picture_folder(year),
            self.prep_folder(year),
            self.demos_folder(year),
            self.sessions_folder(year),
        ] {
            if !folder.exists() {
                std::fs::create_dir_all(&folder)?;
                created.push(folder);
            }
        }
        if !created.is_empty() {
            info!(year, created = created.len(), "Year scaffolding created");
        }
        Ok(created)
    }
}

/// Format a date with a user-supplied strftime pattern
///
/// Invalid patterns fall back to ISO dates instead of panicking.
pub fn format_date(date: NaiveDate, format: &str) -> String {
    let mut out = String::new();
    if write!(out, "{}", date.format(format)).is_err() {
        warn!(format, "Invalid date format, using ISO date");
        return date.format("%Y-%m-%d").to_string();
    }
    out
}

/// Find the child folder of `parent` naming `docket`
///
/// Exact names win; otherwise `<docket>_…` or `<docket> …` (first by name).
pub fn find_docket_folder(parent: &Path, docket: &str) -> Option<PathBuf> {
    let docket = docket.trim();
    if docket.is_empty() {
        return None;
    }

    let exact = parent.join(docket);
    if exact.is_dir() {
        return Some(exact);
    }

    let lower = docket.to_lowercase();
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(parent)
        .ok()?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| {
            let name = e.file_name().to_string_lossy().to_lowercase();
            name.strip_prefix(lower.as_str())
                .map(|rest| rest.starts_with('_') || rest.starts_with(' '))
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}
