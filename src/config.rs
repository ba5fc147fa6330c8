use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::llm::{LLMConfig, LLMProvider};

/// Configuration for the Disney tips pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `debug|info|warn|error`; `RUST_LOG` still wins when set
    pub log_level: Option<String>,

    /// Where every JSON artifact lives
    pub paths: PathsConfig,

    /// Channel feed polling
    pub discovery: DiscoveryConfig,

    /// Caption fetching and its preflight
    pub transcript: TranscriptConfig,

    /// Structured-generation provider
    pub llm: LLMConfig,

    /// Per-video tip extraction
    pub extraction: ExtractionConfig,

    /// Corpus dedup and top-tip selection
    pub curation: CurationConfig,

    /// Vector index for semantic search
    pub embedding: EmbeddingConfig,

    /// Published-corpus freshness checks
    pub staleness: StalenessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root for pipeline and public data (`DATA_DIR`)
    pub data_root: PathBuf,

    /// Root of the deployed site build
    pub dist_root: PathBuf,
}

impl PathsConfig {
    pub fn videos_file(&self) -> PathBuf {
        self.data_root.join("pipeline").join("videos.json")
    }

    pub fn processed_file(&self) -> PathBuf {
        self.data_root.join("pipeline").join("processed-videos.json")
    }

    pub fn tips_file(&self) -> PathBuf {
        self.data_root.join("public").join("tips.json")
    }

    pub fn embeddings_file(&self) -> PathBuf {
        self.data_root.join("public").join("embeddings.json")
    }

    pub fn dist_tips_file(&self) -> PathBuf {
        self.dist_root.join("tips.json")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            dist_root: PathBuf::from("dist"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Feed endpoint; the channel id is appended as `?channel_id=`
    pub feed_base_url: String,

    /// Attempts per channel, including the first
    pub max_attempts: u32,

    /// First retry delay, doubled on each further attempt
    pub retry_base_delay_ms: u64,

    pub request_timeout_seconds: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            feed_base_url: "https://www.youtube.com/feeds/videos.xml".to_string(),
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            request_timeout_seconds: 30,
        }
    }
}

/// Which transcript backend a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranscriptSourceKind {
    #[serde(rename = "yt-dlp")]
    YtDlp,
    #[serde(rename = "proxy")]
    Proxy,
}

impl TranscriptSourceKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yt-dlp" | "ytdlp" | "subprocess" => Some(TranscriptSourceKind::YtDlp),
            "proxy" | "proxy-api" | "worker" => Some(TranscriptSourceKind::Proxy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    pub source: TranscriptSourceKind,

    /// Subtitle-download executable
    pub ytdlp_path: String,

    /// SOCKS proxy the subprocess routes through when reachable
    pub proxy_host: String,
    pub proxy_port: u16,

    /// Treat preflight warnings as failures
    pub strict_preflight: bool,

    /// Pass a Deno runtime to yt-dlp for its JS challenges
    pub use_deno_runtime: bool,

    /// Defaults to `~/.deno/bin/deno`
    pub deno_path: Option<PathBuf>,

    /// Subprocess timeout per video
    pub timeout_ms: u64,

    /// Minimum spacing between sequential fetches
    pub delay_ms: u64,

    /// Caption proxy service (`YT_PROXY_URL`)
    pub proxy_api_url: Option<String>,
    pub proxy_api_bearer: Option<String>,
    pub proxy_api_max_attempts: u32,
    pub proxy_api_backoff_ms: u64,
}

impl TranscriptConfig {
    pub fn resolved_deno_path(&self) -> PathBuf {
        match &self.deno_path {
            Some(path) => path.clone(),
            None => {
                let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
                home.join(".deno").join("bin").join("deno")
            }
        }
    }
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            source: TranscriptSourceKind::YtDlp,
            ytdlp_path: "yt-dlp".to_string(),
            proxy_host: "127.0.0.1".to_string(),
            proxy_port: 1080,
            strict_preflight: true,
            use_deno_runtime: true,
            deno_path: None,
            timeout_ms: 30_000,
            delay_ms: 1_500,
            proxy_api_url: None,
            proxy_api_bearer: None,
            proxy_api_max_attempts: 3,
            proxy_api_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// In-flight extraction calls
    pub concurrency: usize,

    /// Transcript characters sent to the model
    pub max_transcript_chars: usize,

    /// Extra attempts after a malformed response
    pub max_retries: u32,

    pub retry_delay_ms: u64,

    /// Persist ledger and tips after this many completed videos
    pub checkpoint_interval: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_transcript_chars: 50_000,
            max_retries: 2,
            retry_delay_ms: 2_000,
            checkpoint_interval: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CurationConfig {
    /// Tips compared per semantic-dedup call
    pub batch_size: usize,

    /// Minimum spacing between dedup calls
    pub batch_delay_ms: u64,

    pub top_tips_count: usize,

    /// Largest candidate set ranked in a single call
    pub chunk_size: usize,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_delay_ms: 500,
            top_tips_count: 100,
            chunk_size: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            batch_size: 100,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StalenessConfig {
    pub threshold_days: f64,

    /// Deployed site checked by `verify-live`
    pub live_url: String,

    pub max_drift_seconds: i64,
    pub request_timeout_seconds: u64,
    pub health_timeout_seconds: u64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            threshold_days: 3.0,
            live_url: "https://disney.bound.tips".to_string(),
            max_drift_seconds: 300,
            request_timeout_seconds: 15,
            health_timeout_seconds: 10,
        }
    }
}

const CONFIG_PATHS: [&str; 2] = ["disney-tips.toml", "config/disney-tips.toml"];

impl Config {
    /// Load configuration from the first config file found, then apply the environment
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        for path in &CONFIG_PATHS {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(parsed) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        config = parsed;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load an explicitly named config file; unlike `load` a bad file is an error
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Override fields from environment-style key lookups.
    ///
    /// Unparsable or non-positive values keep the current setting.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(dir) = get("DATA_DIR") {
            self.paths.data_root = PathBuf::from(dir);
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = Some(level);
        }

        if let Some(provider) = get("LLM_PROVIDER").and_then(|v| LLMProvider::parse(&v)) {
            self.llm.provider = provider;
            if provider != LLMProvider::Gemini && self.llm.model.starts_with("gemini") {
                self.llm.model = match provider {
                    LLMProvider::OpenAI => "gpt-4o-mini".to_string(),
                    _ => "local-model".to_string(),
                };
            }
        }
        if let Some(endpoint) = get("LLM_ENDPOINT") {
            self.llm.endpoint = Some(endpoint);
        }
        if let Some(model) = get("GEMINI_MODEL") {
            if self.llm.provider == LLMProvider::Gemini {
                self.llm.model = model;
            }
        }
        if let Some(var) = self.llm.provider.credential_var() {
            if let Some(key) = get(var) {
                self.llm.api_key = Some(key);
            }
        }

        if let Some(key) = get("OPENAI_API_KEY") {
            self.embedding.api_key = Some(key);
        }
        if let Some(model) = get("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }

        if let Some(n) = get("EXTRACT_CONCURRENCY").and_then(|v| parse_positive::<usize>(&v)) {
            self.extraction.concurrency = n;
        }

        let transcript = &mut self.transcript;
        if let Some(ms) = get("TRANSCRIPT_DELAY_MS").and_then(|v| parse_positive::<u64>(&v)) {
            transcript.delay_ms = ms;
        }
        if let Some(kind) = get("TRANSCRIPT_SOURCE").and_then(|v| TranscriptSourceKind::parse(&v)) {
            transcript.source = kind;
        }
        if let Some(url) = get("YT_PROXY_URL") {
            transcript.proxy_api_url = Some(url);
        }
        if let Some(token) = get("YT_PROXY_BEARER") {
            transcript.proxy_api_bearer = Some(token);
        }
        if let Some(host) = get("WARP_PROXY_HOST") {
            transcript.proxy_host = host;
        }
        if let Some(port) = get("WARP_PROXY_PORT").and_then(|v| parse_positive::<u16>(&v)) {
            transcript.proxy_port = port;
        }
        if let Some(strict) = get("TRANSCRIPT_STRICT_PREFLIGHT").and_then(|v| parse_bool(&v)) {
            transcript.strict_preflight = strict;
        }
        if let Some(deno) = get("TRANSCRIPT_USE_DENO_RUNTIME").and_then(|v| parse_bool(&v)) {
            transcript.use_deno_runtime = deno;
        }
        if let Some(path) = get("DENO_PATH") {
            transcript.deno_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = get("TRANSCRIPT_TIMEOUT_MS").and_then(|v| parse_positive::<u64>(&v)) {
            transcript.timeout_ms = ms;
        }
        if let Some(path) = get("YTDLP_PATH") {
            transcript.ytdlp_path = path;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(anyhow!(PipelineError::InvalidConfig(msg.to_string())));

        if self.extraction.concurrency == 0 {
            return invalid("extraction.concurrency must be greater than 0");
        }
        if self.extraction.checkpoint_interval == 0 {
            return invalid("extraction.checkpoint_interval must be greater than 0");
        }
        if self.curation.batch_size == 0 {
            return invalid("curation.batch_size must be greater than 0");
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be greater than 0");
        }
        if self.curation.top_tips_count == 0 {
            return invalid("curation.top_tips_count must be greater than 0");
        }
        if self.curation.top_tips_count >= self.curation.chunk_size {
            return invalid("curation.top_tips_count must be smaller than curation.chunk_size");
        }
        if self.discovery.max_attempts == 0 {
            return invalid("discovery.max_attempts must be greater than 0");
        }
        if self.staleness.threshold_days < 0.0 {
            return invalid("staleness.threshold_days must not be negative");
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Disney Tips Pipeline Configuration:\n\
            - Data Directory: {}\n\
            - LLM Provider: {:?} ({})\n\
            - Transcript Source: {:?}\n\
            - Extraction Concurrency: {}\n\
            - Dedup Batch Size: {}\n\
            - Top Tips: {}",
            self.paths.data_root.display(),
            self.llm.provider,
            self.llm.model,
            self.transcript.source,
            self.extraction.concurrency,
            self.curation.batch_size,
            self.curation.top_tips_count,
        )
    }
}

/// `1/true/yes/on` or `0/false/no/off`, case-insensitive
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_positive<T>(value: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    value.trim().parse::<T>().ok().filter(|n| *n > T::default())
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_data_root(mut self, dir: PathBuf) -> Self {
        self.config.paths.data_root = dir;
        self
    }

    pub fn with_dist_root(mut self, dir: PathBuf) -> Self {
        self.config.paths.dist_root = dir;
        self
    }

    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.config.extraction.concurrency = workers;
        self
    }

    /// Zero every pacing delay; used where tests drive whole stages
    pub fn without_delays(mut self) -> Self {
        self.config.transcript.delay_ms = 0;
        self.config.extraction.retry_delay_ms = 0;
        self.config.curation.batch_delay_ms = 0;
        self.config.discovery.retry_base_delay_ms = 0;
        self.config.transcript.proxy_api_backoff_ms = 0;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
