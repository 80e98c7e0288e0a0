//! Prep delivery summary
//!
//! Inspects a finished prep folder and renders a plain-text manifest:
//!
//! ```text
//! 12345 - Acme Spot
//!
//! PICTURE: 2 x 00:30, 1 x 00:15
//! AAF/OMF: AAF & OMF tested & prepped
//! MUSIC:
//!   - Theme STEMS
//!   - Underscore
//! SFX: Pro Tools session prepped
//! OTHER: 3 file(s)
//! CHECKLIST:
//!   TV Mix
//!     - Theme_vocal.wav
//! ```
//!
//! Categories whose folder is missing or empty are left out.

use super::categorizer;
use super::docket_metadata::{display_job_name, DocketMetadataProvider};
use super::duration_probe::DurationProbe;
use super::path_config::PathConfig;
use crate::models::staged_entry::is_ignored_name;
use chrono::Utc;
use dkf_common::events::{DeliveryEvent, EventBus};
use dkf_common::{Settings, SettingsProvider};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Durations above this round to the nearest 30 s
const PALETTE_CEILING_SECS: u32 = 600;

/// Snap a probed duration to the spot-length palette
///
/// 6, 15, 20, 30, then every 30 s up to 10:00; beyond that the nearest 30 s.
pub fn round_to_standard_duration(secs: f64) -> u32 {
    let secs = secs.max(0.0);
    if secs > PALETTE_CEILING_SECS as f64 {
        return ((secs / 30.0).round() * 30.0) as u32;
    }

    let palette = [6u32, 15, 20]
        .into_iter()
        .chain((1..=PALETTE_CEILING_SECS / 30).map(|n| n * 30));
    let mut best = 6u32;
    let mut best_diff = f64::MAX;
    for candidate in palette {
        let diff = (secs - candidate as f64).abs();
        if diff < best_diff {
            best = candidate;
            best_diff = diff;
        }
    }
    best
}

/// `mm:ss`
pub fn format_duration(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// What the scanner found on disk, before probing
#[derive(Debug, Default)]
struct PrepInventory {
    picture_present: bool,
    picture_videos: Vec<PathBuf>,
    picture_files: usize,
    aaf_types: BTreeSet<String>,
    music: Vec<String>,
    has_sfx_session: bool,
    other_files: usize,
    checklist: Vec<(String, Vec<String>)>,
}

fn visible_files(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_name(&e.file_name().to_string_lossy()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
}

fn sorted_children(dir: &Path) -> Vec<std::fs::DirEntry> {
    let mut children: Vec<std::fs::DirEntry> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| !is_ignored_name(&e.file_name().to_string_lossy()))
            .collect(),
        Err(_) => Vec::new(),
    };
    children.sort_by_key(|e| e.file_name());
    children
}

fn scan_prep_folder(settings: &Settings, prep_root: &Path) -> PrepInventory {
    let folders = &settings.folders;
    let mut inventory = PrepInventory::default();

    let picture = prep_root.join(&folders.picture);
    if picture.is_dir() {
        inventory.picture_present = true;
        let unconverted = picture.join(&folders.unconverted);
        for entry in visible_files(&picture) {
            if entry.path().starts_with(&unconverted) {
                continue;
            }
            inventory.picture_files += 1;
            if categorizer::is_video(entry.path(), settings) {
                inventory.picture_videos.push(entry.into_path());
            }
        }
    }

    let aaf = prep_root.join(&folders.aaf_omf);
    for entry in visible_files(&aaf) {
        if let Some(ext) = categorizer::extension_of(entry.path()) {
            if settings
                .categories
                .aaf_omf_extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&ext))
            {
                inventory.aaf_types.insert(ext.to_uppercase());
            }
        }
    }

    let music = prep_root.join(&folders.music);
    for child in sorted_children(&music) {
        let path = child.path();
        let name = child.file_name().to_string_lossy().to_string();
        let is_dir = child.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && name.to_uppercase().contains("STEM") {
            inventory.music.push(name);
        } else if !is_dir && categorizer::is_audio(&path, settings) {
            if let Some(stem) = path.file_stem() {
                inventory.music.push(stem.to_string_lossy().to_string());
            }
        }
    }

    let sfx = prep_root.join(&folders.sfx);
    inventory.has_sfx_session = visible_files(&sfx).any(|e| {
        categorizer::extension_of(e.path())
            .map(|ext| ext == "ptx")
            .unwrap_or(false)
    });

    inventory.other_files = visible_files(&prep_root.join(&folders.other)).count();

    let checklist = prep_root.join(&folders.checklist);
    for child in sorted_children(&checklist) {
        if !child.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let mut files: Vec<String> = visible_files(&child.path())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        files.sort();
        inventory
            .checklist
            .push((child.file_name().to_string_lossy().to_string(), files));
    }

    inventory
}

fn render(
    docket: &str,
    job_name: &str,
    inventory: &PrepInventory,
    durations: &BTreeMap<u32, usize>,
) -> String {
    let mut lines = Vec::new();
    if job_name.is_empty() || job_name == docket {
        lines.push(docket.to_string());
    } else {
        lines.push(format!("{} - {}", docket, job_name));
    }
    lines.push(String::new());

    if !durations.is_empty() {
        let groups: Vec<String> = durations
            .iter()
            .map(|(secs, count)| format!("{} x {}", count, format_duration(*secs)))
            .collect();
        lines.push(format!("PICTURE: {}", groups.join(", ")));
    } else if inventory.picture_files > 0 {
        // Nothing probed successfully
        lines.push(format!("PICTURE: {} file(s)", inventory.picture_files));
    }

    if !inventory.aaf_types.is_empty() {
        let types: Vec<&str> = inventory.aaf_types.iter().map(String::as_str).collect();
        lines.push(format!("AAF/OMF: {} tested & prepped", types.join(" & ")));
    }

    if !inventory.music.is_empty() {
        lines.push("MUSIC:".to_string());
        lines.extend(inventory.music.iter().map(|m| format!("  - {}", m)));
    }

    if inventory.has_sfx_session {
        lines.push("SFX: Pro Tools session prepped".to_string());
    }

    if inventory.other_files > 0 {
        lines.push(format!("OTHER: {} file(s)", inventory.other_files));
    }

    if !inventory.checklist.is_empty() {
        lines.push("CHECKLIST:".to_string());
        for (title, files) in &inventory.checklist {
            lines.push(format!("  {}", title));
            lines.extend(files.iter().map(|f| format!("    - {}", f)));
        }
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Write `text` to `path` via a temp file and rename
pub async fn write_summary(path: &Path, text: &str) -> std::io::Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp, text).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

pub struct PrepSummaryGenerator {
    settings: Arc<SettingsProvider>,
    probe: Arc<dyn DurationProbe>,
    metadata: Arc<dyn DocketMetadataProvider>,
    event_bus: Option<EventBus>,
}

impl PrepSummaryGenerator {
    pub fn new(
        settings: Arc<SettingsProvider>,
        probe: Arc<dyn DurationProbe>,
        metadata: Arc<dyn DocketMetadataProvider>,
    ) -> Self {
        Self {
            settings,
            probe,
            metadata,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Render the summary text for a prep folder
    pub async fn generate_summary(&self, docket: &str, job_name: &str, prep_root: &Path) -> String {
        let settings = self.settings.snapshot();
        let scan_settings = settings.clone();
        let root = prep_root.to_path_buf();
        let inventory =
            match tokio::task::spawn_blocking(move || scan_prep_folder(&scan_settings, &root)).await
            {
                Ok(inventory) => inventory,
                Err(e) => {
                    warn!(error = %e, "Prep folder scan failed");
                    PrepInventory::default()
                }
            };

        let durations = self
            .probe_durations(&inventory.picture_videos, settings.tools.max_concurrent_probes)
            .await;
        debug!(
            docket,
            picture_present = inventory.picture_present,
            probed = durations.values().sum::<usize>(),
            "Prep folder inspected"
        );
        render(docket, job_name, &inventory, &durations)
    }

    /// Duration groups keyed by rounded seconds
    async fn probe_durations(&self, videos: &[PathBuf], concurrency: usize) -> BTreeMap<u32, usize> {
        let probe = self.probe.clone();
        let results: Vec<Option<f64>> = stream::iter(videos.iter().cloned())
            .map(|path| {
                let probe = probe.clone();
                async move {
                    match probe.probe(&path).await {
                        Ok(secs) => secs,
                        Err(e) => {
                            warn!(file = %path.display(), error = %e, "Duration probe failed");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut groups = BTreeMap::new();
        for secs in results.into_iter().flatten() {
            *groups.entry(round_to_standard_duration(secs)).or_insert(0) += 1;
        }
        groups
    }

    /// Generate and atomically write `<prep folder>/<docket>_Prep_Summary.txt`
    pub async fn write_for(&self, docket: &str, prep_root: &Path) -> std::io::Result<PathBuf> {
        let settings = self.settings.snapshot();
        let summary_path = prep_root.join(PathConfig::new(settings).summary_file_name(docket));

        let metadata = self.metadata.clone();
        let lookup_docket = docket.to_string();
        let job_name = tokio::task::spawn_blocking(move || {
            display_job_name(metadata.as_ref(), &lookup_docket)
        })
        .await
        .unwrap_or_else(|_| docket.to_string());

        let text = self.generate_summary(docket, &job_name, prep_root).await;
        write_summary(&summary_path, &text).await?;
        info!(docket, summary = %summary_path.display(), "Prep summary written");

        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(DeliveryEvent::SummaryWritten {
                docket: docket.to_string(),
                summary_path: summary_path.to_string_lossy().to_string(),
                timestamp: Utc::now(),
            });
        }
        Ok(summary_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::docket_metadata::DocketInfo;
    use crate::services::duration_probe::ProbeError;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    /// Duration encoded in the file name: `spot_30.mov` → 30 s
    struct NameProbe;

    #[async_trait]
    impl DurationProbe for NameProbe {
        async fn probe(&self, path: &Path) -> Result<Option<f64>, ProbeError> {
            let stem = path.file_stem().unwrap().to_string_lossy().to_string();
            stem.rsplit('_')
                .next()
                .and_then(|s| s.parse::<f64>().ok())
                .map(Some)
                .ok_or_else(|| ProbeError::Failed {
                    path: path.to_path_buf(),
                    message: "no duration".into(),
                })
        }
    }

    struct NoMetadata;

    impl DocketMetadataProvider for NoMetadata {
        fn lookup(&self, _docket: &str) -> Option<DocketInfo> {
            None
        }
    }

    fn generator() -> PrepSummaryGenerator {
        PrepSummaryGenerator::new(
            Arc::new(SettingsProvider::new(Settings::default())),
            Arc::new(NameProbe),
            Arc::new(NoMetadata),
        )
    }

    #[test]
    fn palette_rounding() {
        assert_eq!(round_to_standard_duration(5.0), 6);
        assert_eq!(round_to_standard_duration(14.9), 15);
        assert_eq!(round_to_standard_duration(29.97), 30);
        assert_eq!(round_to_standard_duration(44.0), 30);
        assert_eq!(round_to_standard_duration(50.0), 60);
        assert_eq!(round_to_standard_duration(599.0), 600);
        assert_eq!(round_to_standard_duration(700.0), 690);
        assert_eq!(format_duration(90), "01:30");
        assert_eq!(format_duration(6), "00:06");
    }

    #[tokio::test]
    async fn summary_lists_populated_categories() {
        let dir = TempDir::new().unwrap();
        let prep = dir.path();
        fs::create_dir_all(prep.join("PICTURE/z_unconverted")).unwrap();
        fs::write(prep.join("PICTURE/spotA_30.mov"), b"v").unwrap();
        fs::write(prep.join("PICTURE/spotB_29.97.mov"), b"v").unwrap();
        fs::write(prep.join("PICTURE/cutdown_15.mp4"), b"v").unwrap();
        fs::write(prep.join("PICTURE/broken.mov"), b"v").unwrap();
        fs::write(prep.join("PICTURE/z_unconverted/raw_60.mov"), b"v").unwrap();
        fs::create_dir_all(prep.join("AAF_OMF")).unwrap();
        fs::write(prep.join("AAF_OMF/reel.aaf"), b"a").unwrap();
        fs::write(prep.join("AAF_OMF/reel.omf"), b"o").unwrap();
        fs::create_dir_all(prep.join("MUSIC/Theme STEMS")).unwrap();
        fs::write(prep.join("MUSIC/Underscore.wav"), b"m").unwrap();
        fs::create_dir_all(prep.join("SFX")).unwrap();
        fs::write(prep.join("SFX/fx.ptx"), b"s").unwrap();
        fs::create_dir_all(prep.join("OTHER")).unwrap();
        fs::write(prep.join("OTHER/script.pdf"), b"p").unwrap();
        fs::create_dir_all(prep.join("CHECKLIST/TV Mix")).unwrap();
        fs::write(prep.join("CHECKLIST/TV Mix/mix.wav"), b"c").unwrap();

        let text = generator()
            .generate_summary("12345", "Acme Spot", prep)
            .await;

        let expected = "\
12345 - Acme Spot

PICTURE: 1 x 00:15, 2 x 00:30
AAF/OMF: AAF & OMF tested & prepped
MUSIC:
  - Theme STEMS
  - Underscore
SFX: Pro Tools session prepped
OTHER: 1 file(s)
CHECKLIST:
  TV Mix
    - mix.wav
";
        assert_eq!(text, expected);
    }

    #[tokio::test]
    async fn missing_folders_are_omitted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("OTHER")).unwrap();
        fs::write(dir.path().join("OTHER/a.txt"), b"a").unwrap();

        let text = generator().generate_summary("12345", "12345", dir.path()).await;
        assert_eq!(text, "12345\n\nOTHER: 1 file(s)\n");
    }

    #[tokio::test]
    async fn write_for_is_atomic_and_uses_template_name() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("OTHER")).unwrap();
        fs::write(dir.path().join("OTHER/a.txt"), b"a").unwrap();

        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let path = generator()
            .with_event_bus(bus)
            .write_for("12345", dir.path())
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("12345_Prep_Summary.txt"));
        assert!(fs::read_to_string(&path).unwrap().starts_with("12345\n"));
        assert!(!dir.path().join("12345_Prep_Summary.txt.tmp").exists());
        assert_eq!(rx.recv().await.unwrap().event_type(), "SummaryWritten");
    }
}
