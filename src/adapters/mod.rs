//! Adapter interfaces for external systems.
//!
//! The pipeline talks to the outside world through three ports: a media
//! extractor (yt-dlp), a duration probe (ffprobe) and a blob uploader
//! (Telegram). Each is a trait so tests can substitute fakes without spawning
//! processes or touching the network.

pub mod ffprobe;
pub mod telegram;
pub mod ytdlp;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::core::IngestError;

pub use ffprobe::FfprobeProbe;
pub use telegram::{TelegramClient, TelegramConfig, TelegramRequester};
pub use ytdlp::YtDlpExtractor;

/// A local audio file produced by an extractor.
///
/// Owns the per-job scratch directory the file lives in; the directory and
/// everything in it is removed when this value is discarded or dropped.
#[derive(Debug)]
pub struct ExtractedAudio {
    /// Path to the audio file inside the scratch directory
    pub path: PathBuf,

    /// Title string as reported by the source
    pub raw_title: String,

    /// Local file size in bytes
    pub size_bytes: u64,

    /// Duration in seconds, 0 if unknown
    pub duration_seconds: u32,

    scratch: TempDir,
}

impl ExtractedAudio {
    /// Wrap a file written into `scratch`, enforcing the size limit.
    ///
    /// Fails with `ExtractionFailed` if the file is absent or empty and with
    /// `ArtifactTooLarge` if it exceeds `max_bytes`. On failure the scratch
    /// directory is removed before returning.
    pub fn from_scratch(
        scratch: TempDir,
        path: PathBuf,
        raw_title: impl Into<String>,
        max_bytes: u64,
    ) -> Result<Self, IngestError> {
        let size_bytes = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                return Err(IngestError::extraction(format!(
                    "extractor produced no file at {}",
                    path.display()
                )))
            }
        };

        if size_bytes == 0 {
            return Err(IngestError::extraction("extractor produced an empty file"));
        }

        if size_bytes > max_bytes {
            return Err(IngestError::ArtifactTooLarge {
                size: size_bytes,
                limit: max_bytes,
            });
        }

        Ok(Self {
            path,
            raw_title: raw_title.into(),
            size_bytes,
            duration_seconds: 0,
            scratch,
        })
    }

    /// Set the probed duration
    pub fn with_duration(mut self, duration_seconds: u32) -> Self {
        self.duration_seconds = duration_seconds;
        self
    }

    /// Scratch directory holding the file
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Delete the scratch directory now, logging instead of failing
    pub fn discard(self) {
        let dir = self.scratch.path().to_path_buf();
        if let Err(e) = self.scratch.close() {
            warn!(dir = %dir.display(), error = %e, "Failed to remove scratch directory");
        } else {
            debug!(dir = %dir.display(), "Removed scratch directory");
        }
    }
}

/// Create a uniquely named scratch directory for one job under `root`
pub fn scratch_dir_in(root: &Path) -> std::io::Result<TempDir> {
    std::fs::create_dir_all(root)?;
    tempfile::Builder::new().prefix("job-").tempdir_in(root)
}

/// Fetches a source URL into a local audio file
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Human-readable extractor name
    fn name(&self) -> &str;

    /// Download and transcode `source_url` into a fresh scratch directory
    /// under `scratch_root`, rejecting files larger than `max_bytes`.
    async fn extract(
        &self,
        source_url: &str,
        scratch_root: &Path,
        max_bytes: u64,
    ) -> Result<ExtractedAudio, IngestError>;
}

/// Measures the duration of a local audio file
#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Duration in seconds
    async fn probe(&self, path: &Path) -> Result<f64>;
}

/// Probe a file, treating failure or a deadline overrun as unknown (0)
pub async fn probe_or_zero(probe: &dyn DurationProbe, path: &Path, limit: Duration) -> u32 {
    match tokio::time::timeout(limit, probe.probe(path)).await {
        Ok(Ok(seconds)) if seconds.is_finite() && seconds >= 0.0 => seconds as u32,
        Ok(Ok(seconds)) => {
            debug!(seconds, "Probe returned an unusable duration");
            0
        }
        Ok(Err(e)) => {
            debug!(error = %e, "Duration probe failed");
            0
        }
        Err(_) => {
            debug!(?limit, "Duration probe timed out");
            0
        }
    }
}

/// Reference returned by the blob host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBlob {
    /// Opaque reference usable for later retrieval
    pub blob_ref: String,

    /// Size as reported by the host
    pub size_bytes: u64,
}

/// Display metadata sent along with an upload
#[derive(Debug, Clone, Copy)]
pub struct UploadMeta<'a> {
    pub title: &'a str,
    pub artist: &'a str,
    pub caption: Option<&'a str>,
}

/// Uploads local files to the blob host
#[async_trait]
pub trait BlobUploader: Send + Sync {
    /// Human-readable uploader name
    fn name(&self) -> &str;

    /// Stream `path` to `destination`, returning the host's reference and size
    async fn upload(
        &self,
        destination: &str,
        path: &Path,
        meta: UploadMeta<'_>,
    ) -> Result<UploadedBlob>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(Result<f64, &'static str>);

    #[async_trait]
    impl DurationProbe for FixedProbe {
        async fn probe(&self, _path: &Path) -> Result<f64> {
            self.0.map_err(|e| anyhow::anyhow!(e))
        }
    }

    struct SlowProbe;

    #[async_trait]
    impl DurationProbe for SlowProbe {
        async fn probe(&self, _path: &Path) -> Result<f64> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1.0)
        }
    }

    #[tokio::test]
    async fn test_probe_or_zero() {
        let path = Path::new("/nonexistent");
        let limit = Duration::from_millis(50);

        assert_eq!(probe_or_zero(&FixedProbe(Ok(215.7)), path, limit).await, 215);
        assert_eq!(probe_or_zero(&FixedProbe(Err("boom")), path, limit).await, 0);
        assert_eq!(probe_or_zero(&FixedProbe(Ok(f64::NAN)), path, limit).await, 0);
        assert_eq!(probe_or_zero(&SlowProbe, path, limit).await, 0);
    }

    #[test]
    fn test_from_scratch_enforces_size_and_cleans_up() {
        let root = TempDir::new().unwrap();

        let scratch = scratch_dir_in(root.path()).unwrap();
        let dir = scratch.path().to_path_buf();
        let file = dir.join("audio.mp3");
        std::fs::write(&file, vec![0u8; 11]).unwrap();

        let err = ExtractedAudio::from_scratch(scratch, file, "t", 10).unwrap_err();
        assert!(matches!(err, IngestError::ArtifactTooLarge { size: 11, limit: 10 }));
        assert!(!dir.exists());
    }

    #[test]
    fn test_from_scratch_rejects_empty_and_absent_files() {
        let root = TempDir::new().unwrap();

        let scratch = scratch_dir_in(root.path()).unwrap();
        let file = scratch.path().join("audio.mp3");
        std::fs::write(&file, b"").unwrap();
        assert!(matches!(
            ExtractedAudio::from_scratch(scratch, file, "t", 10),
            Err(IngestError::ExtractionFailed { .. })
        ));

        let scratch = scratch_dir_in(root.path()).unwrap();
        let file = scratch.path().join("missing.mp3");
        assert!(matches!(
            ExtractedAudio::from_scratch(scratch, file, "t", 10),
            Err(IngestError::ExtractionFailed { .. })
        ));

        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_discard_removes_scratch() {
        let root = TempDir::new().unwrap();
        let scratch = scratch_dir_in(root.path()).unwrap();
        let file = scratch.path().join("audio.mp3");
        std::fs::write(&file, b"data").unwrap();

        let audio = ExtractedAudio::from_scratch(scratch, file, "t", 10).unwrap();
        let dir = audio.scratch_dir().to_path_buf();
        assert_eq!(audio.size_bytes, 4);

        audio.discard();
        assert!(!dir.exists());
    }
}
