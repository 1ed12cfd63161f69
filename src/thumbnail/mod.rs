//! Thumbnail capture (§5 supplement). Every `thumbnail_every_k` ticks the
//! Supervisor asks for a still frame from the most recently ok segment URL,
//! shelled out to `ffmpeg` the way the teacher shells out to external tools
//! (`git`, `claude`) via `tokio::process::Command` rather than binding a
//! decoder crate. A missing `ffmpeg` logs once, not once per tick.

use crate::config::Config;
use crate::types::StreamId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::process::Command;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("ffmpeg not available on PATH")]
    ToolMissing,
    #[error("ffmpeg exited with a failure status")]
    CaptureFailed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capture-a-still-frame abstraction, mirroring the Prober/ThumbnailCapture
/// split so tests never shell out to a real decoder.
#[async_trait]
pub trait ThumbnailCapture: Send + Sync {
    async fn capture(&self, stream_id: StreamId, segment_url: &str, cfg: &Config) -> Result<String, ThumbnailError>;

    /// Directory the Registry's maintenance task should periodically sweep
    /// via [`sweep_old_thumbnails`] (§5). `None` when this capturer writes no
    /// files of its own.
    fn output_dir(&self) -> Option<&std::path::Path> {
        None
    }
}

/// Production capturer: `ffmpeg -y -i <segment_url> -frames:v 1 <out>.jpg`.
pub struct ProcessThumbnailCapture {
    output_dir: std::path::PathBuf,
    warned_missing: AtomicBool,
}

impl ProcessThumbnailCapture {
    pub fn new(output_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            warned_missing: AtomicBool::new(false),
        }
    }

    fn warn_missing_once(&self) {
        if !self.warned_missing.swap(true, Ordering::SeqCst) {
            warn!("ffmpeg not found on PATH; thumbnail capture is disabled for this process");
        }
    }
}

#[async_trait]
impl ThumbnailCapture for ProcessThumbnailCapture {
    async fn capture(&self, stream_id: StreamId, segment_url: &str, _cfg: &Config) -> Result<String, ThumbnailError> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis();
        let out_path = self.output_dir.join(format!("{stream_id}-{stamp}.jpg"));

        let status = Command::new("ffmpeg")
            .args([
                "-y",
                "-i",
                segment_url,
                "-frames:v",
                "1",
                out_path.to_string_lossy().as_ref(),
            ])
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(out_path.to_string_lossy().into_owned()),
            Ok(_) => Err(ThumbnailError::CaptureFailed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.warn_missing_once();
                Err(ThumbnailError::ToolMissing)
            }
            Err(e) => Err(ThumbnailError::Io(e)),
        }
    }

    fn output_dir(&self) -> Option<&std::path::Path> {
        Some(&self.output_dir)
    }
}

/// Sweep `output_dir`, deleting files older than `cfg.thumbnail_max_age_h`
/// (§5). Driven by a single periodic maintenance task owned by the
/// `Registry`, independent of any one stream's Supervisor.
pub async fn sweep_old_thumbnails(output_dir: &std::path::Path, cfg: &Config) -> std::io::Result<usize> {
    let max_age = Duration::from_secs(cfg.thumbnail_max_age_h * 3600);
    let mut removed = 0;
    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if let Ok(modified) = metadata.modified() {
            if let Ok(age) = SystemTime::now().duration_since(modified) {
                if age > max_age {
                    tokio::fs::remove_file(entry.path()).await?;
                    removed += 1;
                }
            }
        }
    }
    Ok(removed)
}

/// No-op capturer for tests and demo runs without `ffmpeg` available.
pub struct NoopThumbnailCapture;

#[async_trait]
impl ThumbnailCapture for NoopThumbnailCapture {
    async fn capture(&self, _stream_id: StreamId, _segment_url: &str, _cfg: &Config) -> Result<String, ThumbnailError> {
        Err(ThumbnailError::ToolMissing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_removes_files_older_than_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("old.jpg");
        tokio::fs::write(&stale, b"x").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // a zero-hour max age treats any file written before "now" as stale.
        let mut cfg = Config::default();
        cfg.thumbnail_max_age_h = 0;
        let removed = sweep_old_thumbnails(dir.path(), &cfg).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn sweep_on_missing_dir_is_a_noop() {
        let cfg = Config::default();
        let removed = sweep_old_thumbnails(std::path::Path::new("/nonexistent/thumbs"), &cfg)
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn noop_capture_always_errs() {
        let cfg = Config::default();
        let result = NoopThumbnailCapture
            .capture(StreamId::new(), "https://example.com/seg.ts", &cfg)
            .await;
        assert!(result.is_err());
    }
}
