//! ffprobe duration probe.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::DurationProbe;

/// Duration probe shelling out to ffprobe
pub struct FfprobeProbe {
    binary_path: String,
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeProbe {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

/// Parse ffprobe's bare `format=duration` output
pub fn parse_duration(output: &str) -> Result<f64> {
    let seconds: f64 = output
        .trim()
        .parse()
        .with_context(|| format!("Unparseable duration: {:?}", output.trim()))?;

    if !seconds.is_finite() || seconds < 0.0 {
        anyhow::bail!("Invalid duration: {}", seconds);
    }
    Ok(seconds)
}

#[async_trait]
impl DurationProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Result<f64> {
        let output = Command::new(&self.binary_path)
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
            .context("Failed to run ffprobe")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("ffprobe failed: {}", stderr.trim());
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}
