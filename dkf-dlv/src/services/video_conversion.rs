//! Video conversion control surface
//!
//! The pipeline only enqueues batches and calls `start`; the encoder itself is
//! an `ffmpeg` subprocess run one file at a time in the background.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type ConversionId = Uuid;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Conversion batch has no sources")]
    EmptyBatch,

    #[error("Cannot prepare output folder {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How converted files are named in the output folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionNaming {
    /// `<stem>.<format>`
    SameName,
    /// `<stem>_<FORMAT>.<format>`
    Suffixed,
}

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub sources: Vec<PathBuf>,
    pub format: String,
    pub aspect_ratio: String,
    pub output_dir: PathBuf,
    pub naming: ConversionNaming,
}

impl ConversionRequest {
    pub fn output_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "converted".to_string());
        let format = self.format.to_lowercase();
        let name = match self.naming {
            ConversionNaming::SameName => format!("{}.{}", stem, format),
            ConversionNaming::Suffixed => {
                format!("{}_{}.{}", stem, format.to_uppercase(), format)
            }
        };
        self.output_dir.join(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: Vec<PathBuf>,
    pub running: bool,
}

impl ConversionProgress {
    pub fn is_finished(&self) -> bool {
        self.completed + self.failed.len() >= self.total && !self.running
    }
}

#[async_trait]
pub trait VideoConversionService: Send + Sync {
    /// Queue a batch; nothing runs until [`start`](Self::start)
    async fn enqueue(&self, request: ConversionRequest) -> Result<ConversionId, ConversionError>;

    fn progress(&self, id: ConversionId) -> Option<ConversionProgress>;

    /// Begin processing queued batches
    async fn start(&self) -> Result<(), ConversionError>;
}

/// Encoder arguments for one file
pub fn ffmpeg_args(
    source: &Path,
    output: &Path,
    format: &str,
    aspect_ratio: &str,
) -> Result<Vec<OsString>, ConversionError> {
    let codec: &[&str] = match format.to_lowercase().as_str() {
        // ProRes Proxy
        "mov" => &["-c:v", "prores_ks", "-profile:v", "0", "-c:a", "pcm_s24le"],
        "mp4" => &["-c:v", "libx264", "-crf", "18", "-pix_fmt", "yuv420p", "-c:a", "aac"],
        other => return Err(ConversionError::UnsupportedFormat(other.to_string())),
    };

    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-n".into(), "-i".into()];
    args.push(source.as_os_str().to_os_string());
    args.extend(codec.iter().map(OsString::from));
    args.push("-aspect".into());
    args.push(aspect_ratio.into());
    args.push(output.as_os_str().to_os_string());
    Ok(args)
}

type Queue = VecDeque<(ConversionId, ConversionRequest)>;

/// Finished batches kept for progress queries by default
const FINISHED_BATCH_RETENTION: usize = 64;

/// Batch progress, oldest finished batches dropped past the retention
#[derive(Default)]
struct ProgressBook {
    batches: HashMap<ConversionId, ConversionProgress>,
    finished: VecDeque<ConversionId>,
}

/// Sequential `ffmpeg` queue
pub struct FfmpegConversionService {
    binary: PathBuf,
    queue: Arc<Mutex<Queue>>,
    progress: Arc<Mutex<ProgressBook>>,
    running: Arc<AtomicBool>,
    retention: usize,
}

impl FfmpegConversionService {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            progress: Arc::new(Mutex::new(ProgressBook::default())),
            running: Arc::new(AtomicBool::new(false)),
            retention: FINISHED_BATCH_RETENTION,
        }
    }

    /// Number of finished batches whose progress stays queryable
    pub fn with_finished_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    fn update(
        progress: &Mutex<ProgressBook>,
        id: ConversionId,
        f: impl FnOnce(&mut ConversionProgress),
    ) {
        let mut book = progress.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = book.batches.get_mut(&id) {
            f(entry);
        }
    }

    fn retire(progress: &Mutex<ProgressBook>, id: ConversionId, retention: usize) {
        let mut book = progress.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = book.batches.get_mut(&id) {
            entry.running = false;
        }
        book.finished.push_back(id);
        while book.finished.len() > retention {
            if let Some(old) = book.finished.pop_front() {
                book.batches.remove(&old);
                debug!(conversion_id = %old, "Dropped finished conversion progress");
            }
        }
    }

    async fn run_queue(
        binary: PathBuf,
        queue: Arc<Mutex<Queue>>,
        progress: Arc<Mutex<ProgressBook>>,
        running: Arc<AtomicBool>,
        retention: usize,
    ) {
        loop {
            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some((id, request)) = next else {
                running.store(false, Ordering::SeqCst);
                // A batch queued after the pop above must not be stranded
                let pending = !queue.lock().unwrap_or_else(PoisonError::into_inner).is_empty();
                if pending && !running.swap(true, Ordering::SeqCst) {
                    continue;
                }
                break;
            };

            Self::update(&progress, id, |p| p.running = true);
            for source in &request.sources {
                let output = request.output_path(source);
                let ok = match ffmpeg_args(source, &output, &request.format, &request.aspect_ratio)
                {
                    Ok(args) => run_ffmpeg(&binary, &args, source).await,
                    Err(e) => {
                        warn!(file = %source.display(), error = %e, "Conversion skipped");
                        false
                    }
                };
                Self::update(&progress, id, |p| {
                    if ok {
                        p.completed += 1;
                    } else {
                        p.failed.push(source.clone());
                    }
                });
            }
            Self::retire(&progress, id, retention);
            info!(conversion_id = %id, "Conversion batch finished");
        }
    }
}

async fn run_ffmpeg(binary: &Path, args: &[OsString], source: &Path) -> bool {
    let result = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await;

    match result {
        Ok(output) if output.status.success() => {
            debug!(file = %source.display(), "Converted");
            true
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                file = %source.display(),
                stderr = %stderr.trim(),
                "ffmpeg failed"
            );
            false
        }
        Err(e) => {
            warn!(binary = %binary.display(), error = %e, "Cannot run ffmpeg");
            false
        }
    }
}

#[async_trait]
impl VideoConversionService for FfmpegConversionService {
    async fn enqueue(&self, request: ConversionRequest) -> Result<ConversionId, ConversionError> {
        if request.sources.is_empty() {
            return Err(ConversionError::EmptyBatch);
        }
        // Reject bad formats up front rather than per file later
        ffmpeg_args(Path::new(""), Path::new(""), &request.format, &request.aspect_ratio)?;
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|source| ConversionError::OutputDir {
                path: request.output_dir.clone(),
                source,
            })?;

        let id = Uuid::new_v4();
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .batches
            .insert(
                id,
                ConversionProgress {
                    total: request.sources.len(),
                    ..Default::default()
                },
            );
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((id, request));
        debug!(conversion_id = %id, "Conversion batch queued");
        Ok(id)
    }

    fn progress(&self, id: ConversionId) -> Option<ConversionProgress> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .batches
            .get(&id)
            .cloned()
    }

    async fn start(&self) -> Result<(), ConversionError> {
        if self.running.swap(true, Ordering::SeqCst) {
            // Worker already draining; it will pick up new batches
            return Ok(());
        }
        tokio::spawn(Self::run_queue(
            self.binary.clone(),
            self.queue.clone(),
            self.progress.clone(),
            self.running.clone(),
            self.retention,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn request(dir: &Path, format: &str) -> ConversionRequest {
        ConversionRequest {
            sources: vec![dir.join("z_unconverted/Cut v3.mxf")],
            format: format.to_string(),
            aspect_ratio: "16:9".to_string(),
            output_dir: dir.join("PICTURE"),
            naming: ConversionNaming::Suffixed,
        }
    }

    #[test]
    fn output_names_follow_naming_mode() {
        let mut req = request(Path::new("/p"), "mov");
        assert_eq!(
            req.output_path(Path::new("/x/Cut v3.mxf")),
            PathBuf::from("/p/PICTURE/Cut v3_MOV.mov")
        );
        req.naming = ConversionNaming::SameName;
        assert_eq!(
            req.output_path(Path::new("/x/Cut v3.mxf")),
            PathBuf::from("/p/PICTURE/Cut v3.mov")
        );
    }

    #[test]
    fn args_carry_codec_and_aspect() {
        let args = ffmpeg_args(Path::new("in.mxf"), Path::new("out.mp4"), "MP4", "4:3").unwrap();
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();
        assert!(args.contains(&"libx264".to_string()));
        let aspect = args.iter().position(|a| a == "-aspect").unwrap();
        assert_eq!(args[aspect + 1], "4:3");
        assert_eq!(args.last().unwrap(), "out.mp4");

        assert!(matches!(
            ffmpeg_args(Path::new("a"), Path::new("b"), "webm", "16:9"),
            Err(ConversionError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn enqueue_validates_and_tracks_progress() {
        let dir = TempDir::new().unwrap();
        let service = FfmpegConversionService::new("/definitely/not/ffmpeg");

        let mut empty = request(dir.path(), "mov");
        empty.sources.clear();
        assert!(matches!(service.enqueue(empty).await, Err(ConversionError::EmptyBatch)));
        assert!(service.enqueue(request(dir.path(), "webm")).await.is_err());

        let id = service.enqueue(request(dir.path(), "mov")).await.unwrap();
        assert!(dir.path().join("PICTURE").is_dir());
        assert_eq!(service.progress(id).unwrap().total, 1);

        service.start().await.unwrap();
        let mut finished = false;
        for _ in 0..100 {
            let progress = service.progress(id).unwrap();
            if progress.is_finished() {
                // Binary is missing, so the single file fails
                assert_eq!(progress.failed.len(), 1);
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(finished);
    }

    #[tokio::test]
    async fn finished_batches_beyond_retention_are_dropped() {
        let dir = TempDir::new().unwrap();
        let service =
            FfmpegConversionService::new("/definitely/not/ffmpeg").with_finished_retention(1);

        let first = service.enqueue(request(dir.path(), "mov")).await.unwrap();
        let second = service.enqueue(request(dir.path(), "mp4")).await.unwrap();
        service.start().await.unwrap();

        let mut dropped = false;
        for _ in 0..100 {
            let done = service.progress(second).is_some_and(|p| p.is_finished());
            if done && service.progress(first).is_none() {
                dropped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(dropped);
    }
}
