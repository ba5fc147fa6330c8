use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::captions::{finalize_transcript, CaptionFormat};
use super::preflight::RuntimeConfig;
use super::TranscriptSource;

/// Fetches captions by running yt-dlp into a private scratch directory
#[derive(Debug, Clone)]
pub struct YtDlpSource {
    runtime: RuntimeConfig,
}

impl YtDlpSource {
    pub fn new(runtime: RuntimeConfig) -> Self {
        Self { runtime }
    }

    /// Full argument list for one video; `output` is the path template without extension
    pub fn build_args(&self, video_id: &str, output: &Path) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(deno) = &self.runtime.deno_path {
            args.push("--js-runtimes".to_string());
            args.push(format!("deno:{}", deno.display()));
        }
        if let Some(proxy) = &self.runtime.proxy_url {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.extend(
            [
                "--geo-bypass-country",
                "US",
                "--match-filter",
                "duration > 60",
                "--write-sub",
                "--write-auto-sub",
                "--sub-lang",
                "en",
                "--skip-download",
                "--sub-format",
                "srv1",
                "--no-warnings",
                "-o",
            ]
            .iter()
            .map(|a| a.to_string()),
        );
        args.push(output.display().to_string());
        args.push(format!("https://www.youtube.com/watch?v={}", video_id));

        args
    }

    async fn download(&self, video_id: &str) -> Result<Option<String>> {
        // Removed on drop, whatever happens below
        let scratch = tempfile::Builder::new()
            .prefix("disney-tips-captions-")
            .tempdir()
            .context("failed to create caption scratch directory")?;
        let output = scratch.path().join(video_id);

        let mut cmd = Command::new(&self.runtime.ytdlp_path);
        cmd.args(self.build_args(video_id, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(self.runtime.timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("yt-dlp timed out after {:?}", self.runtime.timeout))?
            .context("failed to run yt-dlp")?;

        // A failed run never yields a transcript, even if it left caption files behind
        if !result.status.success() {
            debug!(
                "yt-dlp exited with {} for {}: {}",
                result.status,
                video_id,
                String::from_utf8_lossy(&result.stderr).trim()
            );
            return Ok(None);
        }

        for (suffix, format) in CaptionFormat::CANDIDATES {
            let path = scratch.path().join(format!("{}{}", video_id, suffix));
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(_) => continue,
            };

            debug!("Found {} captions for {}", suffix, video_id);
            return Ok(finalize_transcript(&format.parse(&content)));
        }

        Ok(None)
    }
}

#[async_trait]
impl TranscriptSource for YtDlpSource {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch(&self, video_id: &str) -> Option<String> {
        match self.download(video_id).await {
            Ok(Some(transcript)) => Some(transcript),
            Ok(None) => {
                debug!("No usable captions for {}", video_id);
                None
            }
            Err(e) => {
                debug!("Transcript fetch failed for {}: {:#}", video_id, e);
                None
            }
        }
    }
}
