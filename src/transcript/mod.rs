//! Transcript acquisition.
//!
//! One capability, [`TranscriptSource`], with a subprocess backend and a
//! caption-proxy backend picked by configuration. A missing transcript is a
//! normal outcome (`None`), never an error.

pub mod captions;
pub mod preflight;
pub mod proxy;
pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{TranscriptConfig, TranscriptSourceKind};

pub use captions::{finalize_transcript, MIN_TRANSCRIPT_LEN};
pub use preflight::{run_preflight, PreflightResult, RuntimeConfig};
pub use proxy::ProxyApiSource;
pub use ytdlp::YtDlpSource;

#[async_trait]
pub trait TranscriptSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cleaned transcript text, or `None` when the video has no usable captions
    async fn fetch(&self, video_id: &str) -> Option<String>;
}

/// Build the configured source. The subprocess backend runs preflight once
/// here, and the resolved runtime is reused for every fetch in the run.
pub async fn build_transcript_source(config: &TranscriptConfig) -> Result<Arc<dyn TranscriptSource>> {
    match config.source {
        TranscriptSourceKind::YtDlp => {
            let preflight = run_preflight(config).await;
            preflight.log();
            let runtime = preflight.into_runtime()?;
            Ok(announce(Arc::new(YtDlpSource::new(runtime))))
        }
        TranscriptSourceKind::Proxy => Ok(announce(Arc::new(ProxyApiSource::new(config)?))),
    }
}

fn announce(source: Arc<dyn TranscriptSource>) -> Arc<dyn TranscriptSource> {
    info!("🎞️  Transcript source: {}", source.name());
    source
}
