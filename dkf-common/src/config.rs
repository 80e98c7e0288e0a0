//! Settings model and configuration loading
//!
//! Settings file resolution follows the same priority order for every entry point:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`DKF_CONFIG`)
//! 3. Platform config file (`<config_dir>/docketflow/config.toml`)
//! 4. Built-in defaults (fallback)
//!
//! Every field has a default, so a partial TOML file only overrides what it names.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Environment variable naming an explicit settings file
pub const CONFIG_ENV_VAR: &str = "DKF_CONFIG";

/// Complete settings snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub folders: FolderSettings,
    pub categories: CategorySettings,
    pub naming: NamingSettings,
    pub search: SearchSettings,
    pub copy: CopySettings,
    pub watch: WatchSettings,
    pub tools: ToolSettings,
    pub logging: LoggingConfig,
}

/// Storage roots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Server root holding `<prefix><year>` folders
    pub server_base_path: PathBuf,
    /// Sessions root holding `<prefix><year>` folders
    pub sessions_base_path: PathBuf,
    /// Flat media postings folder
    pub media_postings_path: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            server_base_path: PathBuf::from("/Volumes/Server"),
            sessions_base_path: PathBuf::from("/Volumes/Sessions"),
            media_postings_path: PathBuf::from("/Volumes/Server/MEDIA POSTINGS"),
        }
    }
}

/// Folder naming conventions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderSettings {
    /// Prefix of year folders, e.g. `GM_` → `GM_2026`
    pub year_prefix: String,
    /// Work Picture folder suffix, e.g. `WORK PICTURE` → `2026_WORK PICTURE`
    pub work_picture: String,
    /// Prep folder suffix, e.g. `SESSION PREP` → `2026_SESSION PREP`
    pub prep: String,
    /// Demos folder suffix
    pub demos: String,
    pub picture: String,
    pub music: String,
    pub aaf_omf: String,
    pub other: String,
    pub sfx: String,
    pub checklist: String,
    /// Subfolder of the picture folder holding originals handed to transcoding
    pub unconverted: String,
}

impl Default for FolderSettings {
    fn default() -> Self {
        Self {
            year_prefix: "GM_".to_string(),
            work_picture: "WORK PICTURE".to_string(),
            prep: "SESSION PREP".to_string(),
            demos: "MUSIC DEMOS".to_string(),
            picture: "PICTURE".to_string(),
            music: "MUSIC".to_string(),
            aaf_omf: "AAF_OMF".to_string(),
            other: "OTHER".to_string(),
            sfx: "SFX".to_string(),
            checklist: "CHECKLIST".to_string(),
            unconverted: "z_unconverted".to_string(),
        }
    }
}

/// Extension → category tables and category toggles
///
/// Extensions are lowercase and without a leading dot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorySettings {
    pub picture_extensions: Vec<String>,
    pub music_extensions: Vec<String>,
    pub aaf_omf_extensions: Vec<String>,
    /// Extensions that trigger the transcode decision during prep
    pub video_extensions: Vec<String>,
    pub picture_enabled: bool,
    pub music_enabled: bool,
    pub aaf_omf_enabled: bool,
    pub other_enabled: bool,
    /// Trailing name keywords that mark a file as a stem of a larger mix
    pub stem_keywords: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for CategorySettings {
    fn default() -> Self {
        Self {
            picture_extensions: strings(&["mov", "mp4", "m4v", "mxf", "avi", "mkv"]),
            music_extensions: strings(&["wav", "aif", "aiff", "mp3", "m4a", "flac", "aac"]),
            aaf_omf_extensions: strings(&["aaf", "omf"]),
            video_extensions: strings(&["mov", "mp4", "m4v", "mxf", "avi", "mkv"]),
            picture_enabled: true,
            music_enabled: true,
            aaf_omf_enabled: true,
            other_enabled: true,
            stem_keywords: strings(&[
                "instrumental",
                "inst",
                "vocals",
                "vocal",
                "vox",
                "bgv",
                "drums",
                "perc",
                "percussion",
                "bass",
                "guitar",
                "guitars",
                "keys",
                "piano",
                "synth",
                "strings",
                "fx",
                "sfx",
                "stem",
            ]),
        }
    }
}

/// Folder name templates and date formats (chrono `strftime` syntax)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingSettings {
    pub work_picture_date_format: String,
    pub prep_date_format: String,
    pub demo_date_format: String,
    /// `{docket}` and `{date}` placeholders
    pub prep_folder_template: String,
    /// `{docket}` placeholder
    pub summary_file_template: String,
}

impl Default for NamingSettings {
    fn default() -> Self {
        Self {
            work_picture_date_format: "%b%d.%y".to_string(),
            prep_date_format: "%b%d.%y".to_string(),
            demo_date_format: "%b%d.%y".to_string(),
            prep_folder_template: "{docket}_PREP_{date}".to_string(),
            summary_file_template: "{docket}_Prep_Summary.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub fuzzy_enabled: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { fuzzy_enabled: true }
    }
}

/// Streaming copy limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopySettings {
    pub chunk_size_bytes: usize,
    /// Abort a file when no bytes move for this long
    pub stall_timeout_secs: u64,
    /// Abort a file when its copy takes longer than this overall
    pub file_timeout_secs: u64,
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 1024 * 1024,
            stall_timeout_secs: 30,
            file_timeout_secs: 300,
        }
    }
}

/// Prep folder watch timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    pub debounce_ms: u64,
    /// Delay before arming the watcher after a job's own final writes
    pub grace_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 3_000,
            grace_ms: 2_000,
        }
    }
}

/// External tool locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub ffprobe_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    /// Simultaneous duration probes while summarizing
    pub max_concurrent_probes: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            ffprobe_path: PathBuf::from("ffprobe"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            max_concurrent_probes: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Parse settings from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read settings {} failed: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Whether two snapshots differ in anything a cached index depends on
    pub fn paths_differ(&self, other: &Settings) -> bool {
        self.paths != other.paths
            || self.folders.year_prefix != other.folders.year_prefix
            || self.folders.work_picture != other.folders.work_picture
    }

    /// Check that settings are usable before a run
    pub fn validate(&self) -> Result<()> {
        if self.folders.year_prefix.trim().is_empty() {
            return Err(Error::Config("folders.year_prefix must not be empty".to_string()));
        }
        if !self.naming.prep_folder_template.contains("{docket}") {
            return Err(Error::Config(format!(
                "naming.prep_folder_template must contain {{docket}}: {}",
                self.naming.prep_folder_template
            )));
        }
        if self.copy.chunk_size_bytes == 0 {
            return Err(Error::Config("copy.chunk_size_bytes must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Settings file resolution (CLI → ENV → platform file)
///
/// Returns `None` when no file is configured or present; callers fall back to
/// [`Settings::default`].
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config file
    dirs::config_dir()
        .map(|d| d.join("docketflow").join("config.toml"))
        .filter(|p| p.exists())
}

/// Load settings following the resolution order, degrading to defaults
///
/// An explicitly named file that is missing or malformed is an error; an absent
/// platform file is not.
pub fn load_settings(cli_arg: Option<&Path>) -> Result<(Settings, Option<PathBuf>)> {
    match resolve_config_path(cli_arg) {
        Some(path) => {
            let settings = Settings::load(&path)?;
            info!("Settings loaded from {}", path.display());
            Ok((settings, Some(path)))
        }
        None => {
            warn!("No settings file found, using built-in defaults");
            Ok((Settings::default(), None))
        }
    }
}

/// Source of immutable settings snapshots
///
/// Operations take one [`snapshot`](SettingsProvider::snapshot) and use it
/// for their whole duration; `replace` never affects an operation in flight.
#[derive(Debug)]
pub struct SettingsProvider {
    current: RwLock<Arc<Settings>>,
}

impl SettingsProvider {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// Current settings snapshot
    pub fn snapshot(&self) -> Arc<Settings> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in new settings
    ///
    /// Returns `true` when path-relevant fields changed (search indexes must
    /// be invalidated by the caller).
    pub fn replace(&self, settings: Settings) -> bool {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let changed = guard.paths_differ(&settings);
        *guard = Arc::new(settings);
        changed
    }
}
