//! yt-dlp extractor adapter.
//!
//! Subprocess mode: one `yt-dlp --print title` call to read the source title,
//! then one `yt-dlp -x --audio-format mp3` call that writes the audio into a
//! per-job scratch directory. Children are killed if the caller drops the
//! future (deadline overrun).

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::{probe_or_zero, scratch_dir_in, DurationProbe, ExtractedAudio, MediaExtractor};
use crate::core::IngestError;

/// Output file stem inside the scratch directory
const OUTPUT_STEM: &str = "audio";

/// yt-dlp extractor using subprocess mode
pub struct YtDlpExtractor {
    /// Path to the yt-dlp binary (default: "yt-dlp")
    binary_path: String,

    /// Optional cookies file for sites that require a session
    cookies_file: Option<PathBuf>,

    /// Reject sources longer than this many seconds
    max_duration_seconds: Option<u32>,

    /// Secondary duration probe
    probe: Arc<dyn DurationProbe>,

    /// Deadline for the duration probe
    probe_timeout: Duration,
}

impl YtDlpExtractor {
    /// Create an extractor with the given binary and probe
    pub fn new(binary_path: impl Into<String>, probe: Arc<dyn DurationProbe>) -> Self {
        Self {
            binary_path: binary_path.into(),
            cookies_file: None,
            max_duration_seconds: None,
            probe,
            probe_timeout: Duration::from_secs(30),
        }
    }

    /// Pass a cookies file to every invocation
    pub fn with_cookies(mut self, cookies_file: Option<PathBuf>) -> Self {
        self.cookies_file = cookies_file;
        self
    }

    /// Reject sources longer than `seconds`
    pub fn with_max_duration(mut self, seconds: Option<u32>) -> Self {
        self.max_duration_seconds = seconds;
        self
    }

    /// Override the probe deadline
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Arguments shared by every invocation
    fn common_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref cookies) = self.cookies_file {
            args.push("--cookies".to_string());
            args.push(cookies.display().to_string());
        }
        args.extend(["--no-playlist", "--no-warnings"].map(String::from));
        args
    }

    fn title_args(&self, source_url: &str) -> Vec<String> {
        let mut args = self.common_args();
        args.extend(["--print", "title"].map(String::from));
        args.push(source_url.to_string());
        args
    }

    fn download_args(&self, source_url: &str) -> Vec<String> {
        let mut args = self.common_args();
        args.extend(
            [
                "-x",
                "--audio-format",
                "mp3",
                "--audio-quality",
                "0",
                "-o",
            ]
            .map(String::from),
        );
        args.push(format!("{}.%(ext)s", OUTPUT_STEM));
        if let Some(seconds) = self.max_duration_seconds {
            args.push("--match-filter".to_string());
            args.push(format!("duration <= {}", seconds));
        }
        args.push(source_url.to_string());
        args
    }

    /// Run yt-dlp and collect its output
    async fn run(&self, args: &[String], cwd: Option<&Path>) -> Result<Output, IngestError> {
        let mut cmd = Command::new(&self.binary_path);
        cmd.args(args)
            .env("LANG", "C.UTF-8")
            .env("LC_ALL", "C.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        cmd.output().await.map_err(|e| {
            IngestError::extraction(format!("failed to spawn {}: {}", self.binary_path, e))
        })
    }

    async fn fetch_title(&self, source_url: &str) -> Result<String, IngestError> {
        let output = self.run(&self.title_args(source_url), None).await?;
        if !output.status.success() {
            return Err(failure("title lookup failed", &output));
        }

        let title = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if title.is_empty() {
            return Err(failure("title lookup returned nothing", &output));
        }
        Ok(title)
    }
}

/// stdout followed by stderr
fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text.trim().to_string()
}

/// Build an `ExtractionFailed` carrying the combined tool output
fn failure(message: &str, output: &Output) -> IngestError {
    let exit_code = output.status.code().unwrap_or(-1);

    IngestError::ExtractionFailed {
        message: format!("{} (exit code {})", message, exit_code),
        output: combined_output(output),
    }
}

/// Attach the tool output to a file check that found nothing usable
fn with_output(err: IngestError, output: &Output) -> IngestError {
    match err {
        IngestError::ExtractionFailed { message, .. } => IngestError::ExtractionFailed {
            message,
            output: combined_output(output),
        },
        other => other,
    }
}

/// Locate the file yt-dlp wrote: `audio.mp3`, else any `audio*` file
fn find_output(dir: &Path) -> Option<PathBuf> {
    let expected = dir.join(format!("{}.mp3", OUTPUT_STEM));
    if expected.is_file() {
        return Some(expected);
    }

    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(OUTPUT_STEM) && !n.ends_with(".part"))
        })
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn extract(
        &self,
        source_url: &str,
        scratch_root: &Path,
        max_bytes: u64,
    ) -> Result<ExtractedAudio, IngestError> {
        let scratch = scratch_dir_in(scratch_root).map_err(|e| {
            IngestError::extraction(format!("failed to create scratch directory: {}", e))
        })?;

        let raw_title = self.fetch_title(source_url).await?;
        debug!(%raw_title, "Fetched source title");

        let output = self
            .run(&self.download_args(source_url), Some(scratch.path()))
            .await?;
        if !output.status.success() {
            return Err(failure("download failed", &output));
        }

        let Some(path) = find_output(scratch.path()) else {
            return Err(failure("download produced no file", &output));
        };

        // Size is checked here, after the download, so an oversized source
        // surfaces as ArtifactTooLarge
        let audio = ExtractedAudio::from_scratch(scratch, path, raw_title, max_bytes)
            .map_err(|e| with_output(e, &output))?;
        let duration = probe_or_zero(self.probe.as_ref(), &audio.path, self.probe_timeout).await;

        info!(
            size_bytes = audio.size_bytes,
            duration_seconds = duration,
            "Extracted audio"
        );
        Ok(audio.with_duration(duration))
    }
}
