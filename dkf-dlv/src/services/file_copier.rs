//! Streaming file copy with stall detection, deadline and cancellation
//!
//! A copy that does not finish leaves no destination file behind: the partial
//! file is removed whether the copy stalled, timed out, failed or was cancelled.

use dkf_common::config::CopySettings;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("Cannot read source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write destination {path}: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No bytes moved within the stall window
    #[error("Copy stalled: no progress for {0:?}")]
    Stalled(Duration),

    /// Whole-file deadline exceeded
    #[error("Copy timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Copy cancelled")]
    Cancelled,
}

impl CopyError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CopyError::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied(u64),
    /// Destination already existed; left untouched
    SkippedExisting,
}

/// Per-file copy limits
#[derive(Debug, Clone, Copy)]
pub struct CopyLimits {
    pub chunk_size: usize,
    pub stall_timeout: Duration,
    pub file_timeout: Duration,
}

impl CopyLimits {
    pub fn from_settings(copy: &CopySettings) -> Self {
        Self {
            chunk_size: copy.chunk_size_bytes.max(1),
            stall_timeout: Duration::from_secs(copy.stall_timeout_secs),
            file_timeout: Duration::from_secs(copy.file_timeout_secs),
        }
    }
}

impl Default for CopyLimits {
    fn default() -> Self {
        Self::from_settings(&CopySettings::default())
    }
}

enum Interrupt {
    Stalled,
    TimedOut,
    Cancelled,
}

/// Run one I/O call under the stall window, the file deadline and the token
async fn guarded<T, F>(
    io: F,
    limits: &CopyLimits,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<std::io::Result<T>, Interrupt>
where
    F: Future<Output = std::io::Result<T>>,
{
    let stall_at = Instant::now() + limits.stall_timeout;
    let (limit, expiry) = if stall_at < deadline {
        (stall_at, Interrupt::Stalled)
    } else {
        (deadline, Interrupt::TimedOut)
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        result = tokio::time::timeout_at(limit, io) => result.map_err(|_| expiry),
    }
}

impl Interrupt {
    fn into_error(self, limits: &CopyLimits) -> CopyError {
        match self {
            Interrupt::Stalled => CopyError::Stalled(limits.stall_timeout),
            Interrupt::TimedOut => CopyError::TimedOut(limits.file_timeout),
            Interrupt::Cancelled => CopyError::Cancelled,
        }
    }
}

/// Pump `reader` into `writer` chunk by chunk
///
/// `on_progress(written, total)` fires after every chunk.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn copy_stream<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    total: u64,
    limits: &CopyLimits,
    cancel: &CancellationToken,
    src: &Path,
    dst: &Path,
    mut on_progress: F,
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(u64, u64),
{
    let deadline = Instant::now() + limits.file_timeout;
    let mut buffer = vec![0u8; limits.chunk_size];
    let mut written: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(CopyError::Cancelled);
        }

        let read = guarded(reader.read(&mut buffer), limits, deadline, cancel)
            .await
            .map_err(|i| i.into_error(limits))?
            .map_err(|source| CopyError::Source {
                path: src.to_path_buf(),
                source,
            })?;
        if read == 0 {
            break;
        }

        guarded(writer.write_all(&buffer[..read]), limits, deadline, cancel)
            .await
            .map_err(|i| i.into_error(limits))?
            .map_err(|source| CopyError::Destination {
                path: dst.to_path_buf(),
                source,
            })?;

        written += read as u64;
        on_progress(written, total.max(written));
    }

    guarded(writer.flush(), limits, deadline, cancel)
        .await
        .map_err(|i| i.into_error(limits))?
        .map_err(|source| CopyError::Destination {
            path: dst.to_path_buf(),
            source,
        })?;

    Ok(written)
}

/// Copy one file unless the destination already exists
///
/// Parent folders of `dst` are created as needed.
pub async fn copy_file<F>(
    src: &Path,
    dst: &Path,
    limits: &CopyLimits,
    cancel: &CancellationToken,
    on_progress: F,
) -> Result<CopyOutcome, CopyError>
where
    F: FnMut(u64, u64),
{
    if fs::try_exists(dst).await.unwrap_or(false) {
        debug!(file = %dst.display(), "Destination exists, skipping");
        return Ok(CopyOutcome::SkippedExisting);
    }

    let mut reader = File::open(src).await.map_err(|source| CopyError::Source {
        path: src.to_path_buf(),
        source,
    })?;
    let total = reader
        .metadata()
        .await
        .map(|m| m.len())
        .map_err(|source| CopyError::Source {
            path: src.to_path_buf(),
            source,
        })?;

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| CopyError::Destination {
                path: parent.to_path_buf(),
                source,
            })?;
    }

    let mut writer = match OpenOptions::new().write(true).create_new(true).open(dst).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Ok(CopyOutcome::SkippedExisting);
        }
        Err(source) => {
            return Err(CopyError::Destination {
                path: dst.to_path_buf(),
                source,
            })
        }
    };

    let result = copy_stream(
        &mut reader,
        &mut writer,
        total,
        limits,
        cancel,
        src,
        dst,
        on_progress,
    )
    .await;
    drop(writer);

    match result {
        Ok(bytes) => Ok(CopyOutcome::Copied(bytes)),
        Err(e) => {
            if let Err(remove_err) = fs::remove_file(dst).await {
                warn!(
                    file = %dst.display(),
                    error = %remove_err,
                    "Failed to remove partial destination"
                );
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_chunks() -> CopyLimits {
        CopyLimits {
            chunk_size: 4,
            stall_timeout: Duration::from_secs(5),
            file_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn copies_and_reports_progress() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.wav");
        let dst = dir.path().join("out/nested/src.wav");
        std::fs::write(&src, b"0123456789").unwrap();

        let mut reports = Vec::new();
        let outcome = copy_file(&src, &dst, &small_chunks(), &CancellationToken::new(), |w, t| {
            reports.push((w, t))
        })
        .await
        .unwrap();

        assert_eq!(outcome, CopyOutcome::Copied(10));
        assert_eq!(std::fs::read(&dst).unwrap(), b"0123456789");
        assert_eq!(reports, vec![(4, 10), (8, 10), (10, 10)]);
    }

    #[tokio::test]
    async fn existing_destination_is_skipped_untouched() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        std::fs::write(&src, b"new").unwrap();
        std::fs::write(&dst, b"old").unwrap();

        let outcome = copy_file(&src, &dst, &small_chunks(), &CancellationToken::new(), |_, _| {})
            .await
            .unwrap();
        assert_eq!(outcome, CopyOutcome::SkippedExisting);
        assert_eq!(std::fs::read(&dst).unwrap(), b"old");
    }

    #[tokio::test]
    async fn cancel_mid_file_removes_partial_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("big.mov");
        let dst = dir.path().join("copy.mov");
        std::fs::write(&src, vec![7u8; 64]).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let err = copy_file(&src, &dst, &small_chunks(), &cancel, move |written, _| {
            if written >= 8 {
                trigger.cancel();
            }
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dst.exists());
    }

    #[tokio::test]
    async fn missing_source_is_a_source_error() {
        let dir = TempDir::new().unwrap();
        let err = copy_file(
            &dir.path().join("nope.wav"),
            &dir.path().join("out.wav"),
            &small_chunks(),
            &CancellationToken::new(),
            |_, _| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CopyError::Source { .. }));
        assert!(!dir.path().join("out.wav").exists());
    }

    #[tokio::test]
    async fn silent_reader_stalls() {
        // Writer half kept alive so reads pend forever
        let (_feeder, mut reader) = tokio::io::duplex(16);
        let mut sink = Vec::new();
        let limits = CopyLimits {
            chunk_size: 8,
            stall_timeout: Duration::from_millis(50),
            file_timeout: Duration::from_secs(10),
        };

        let err = copy_stream(
            &mut reader,
            &mut sink,
            100,
            &limits,
            &CancellationToken::new(),
            Path::new("src"),
            Path::new("dst"),
            |_, _| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CopyError::Stalled(_)));
    }

    #[tokio::test]
    async fn deadline_shorter_than_stall_window_times_out() {
        let (_feeder, mut reader) = tokio::io::duplex(16);
        let mut sink = Vec::new();
        let limits = CopyLimits {
            chunk_size: 8,
            stall_timeout: Duration::from_secs(10),
            file_timeout: Duration::from_millis(50),
        };

        let err = copy_stream(
            &mut reader,
            &mut sink,
            100,
            &limits,
            &CancellationToken::new(),
            Path::new("src"),
            Path::new("dst"),
            |_, _| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CopyError::TimedOut(_)));
    }
}
