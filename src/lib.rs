/// Disney Tips Pipeline
///
/// Batch stages that turn Disney YouTube channels into a curated, searchable
/// tip corpus: feed discovery, transcript fetching, LLM tip extraction,
/// corpus dedup and curation, embeddings, and freshness checks.

pub mod config;
pub mod curation;
pub mod discovery;
pub mod embeddings;
pub mod error;
pub mod extraction;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod rate_limit;
pub mod staleness;
pub mod state;
pub mod transcript;

// Re-export main types for easy access
pub use crate::config::{Config, ConfigBuilder};
pub use crate::curation::{CurationReport, Curator};
pub use crate::discovery::{FeedClient, FeedEntry};
pub use crate::embeddings::{Embedder, OpenAiEmbedder, SearchHit};
pub use crate::error::PipelineError;
pub use crate::extraction::{TipExtractor, TipParse};
pub use crate::llm::{create_llm, LLMConfig, LLMProvider, LLM};
pub use crate::models::{Category, Channel, ExtractedTip, Park, Priority, Season, TipsData, Video, VideosData};
pub use crate::pipeline::{ExtractSummary, FetchSummary, Pipeline};
pub use crate::rate_limit::RateLimiter;
pub use crate::state::{resolve_last_updated, ProcessedLedger};
pub use crate::transcript::{build_transcript_source, TranscriptSource};
