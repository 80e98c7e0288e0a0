//! Media duration probing
//!
//! The default probe shells out to `ffprobe`. Summary generation treats any
//! probe failure as "duration unknown" and leaves the file out of the
//! PICTURE line.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProbeError {
    /// Probe binary missing or not executable
    #[error("Probe unavailable: {0}")]
    Unavailable(String),

    #[error("Probe failed for {path}: {message}")]
    Failed { path: PathBuf, message: String },

    #[error("Unparseable probe output for {path}: {output}")]
    Parse { path: PathBuf, output: String },
}

/// Media path → duration in seconds
#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// `Ok(None)` when the file has no duration (e.g. a still image)
    async fn probe(&self, path: &Path) -> Result<Option<f64>, ProbeError>;
}

/// `ffprobe -show_entries format=duration`
pub struct FfprobeDurationProbe {
    binary: PathBuf,
}

impl FfprobeDurationProbe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

/// Parse the bare `format=duration` value ffprobe prints
pub fn parse_ffprobe_duration(output: &str) -> Option<f64> {
    let value = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    if value.eq_ignore_ascii_case("N/A") {
        return None;
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn probe(&self, path: &Path) -> Result<Option<f64>, ProbeError> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ProbeError::Unavailable(format!("{}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: path.to_path_buf(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("N/A") {
            return Ok(None);
        }
        match parse_ffprobe_duration(trimmed) {
            Some(secs) => {
                debug!(file = %path.display(), secs, "Probed duration");
                Ok(Some(secs))
            }
            None => Err(ProbeError::Parse {
                path: path.to_path_buf(),
                output: trimmed.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_ffprobe_duration("30.030000\n"), Some(30.03));
        assert_eq!(parse_ffprobe_duration("\n  15\n"), Some(15.0));
        assert_eq!(parse_ffprobe_duration("N/A"), None);
        assert_eq!(parse_ffprobe_duration("garbage"), None);
        assert_eq!(parse_ffprobe_duration("-1"), None);
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let probe = FfprobeDurationProbe::new("/definitely/not/ffprobe");
        let err = probe.probe(Path::new("clip.mov")).await.unwrap_err();
        assert!(matches!(err, ProbeError::Unavailable(_)));
    }
}
