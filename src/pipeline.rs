//! Stage orchestration over the on-disk stores.
//!
//! Every stage reads its inputs, builds the new state in memory and writes
//! each output file once (extraction also checkpoints). Collaborators are
//! passed in so the same stages run against fakes in tests.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::curation::{dedupe_exact, CurationReport, Curator};
use crate::discovery::FeedClient;
use crate::embeddings::{self, build_incremental, Embedder, SearchHit};
use crate::error::PipelineError;
use crate::extraction::TipExtractor;
use crate::llm::LLM;
use crate::models::{EmbeddingEntry, ExtractedTip, TipsData, Video, VideosData};
use crate::rate_limit::RateLimiter;
use crate::state::{load_tips, load_videos, read_json, resolve_last_updated, write_json_atomic, ProcessedLedger};
use crate::transcript::TranscriptSource;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchSummary {
    pub new_videos: usize,
    pub with_transcript: usize,
    pub total_videos: usize,
    /// Ids whose transcript was already tried during this fetch
    pub attempted: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractSummary {
    pub pending: usize,
    pub transcripts_filled: usize,
    pub processed: usize,
    pub new_tips: usize,
    pub total_tips: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbedSummary {
    pub added: usize,
    pub total: usize,
}

/// Fold freshly extracted tips into the published corpus: exact duplicates
/// removed, newest first, `lastUpdated` moved by the tips that survived.
/// Top-tip ids whose tip lost to a newer duplicate are dropped.
pub fn merge_tips(existing: Option<&TipsData>, new_tips: &[ExtractedTip], now: DateTime<Utc>) -> TipsData {
    let new_ids: HashSet<&str> = new_tips.iter().map(|t| t.id.as_str()).collect();

    let mut all: Vec<ExtractedTip> = existing.map(|d| d.tips.clone()).unwrap_or_default();
    all.extend(new_tips.iter().cloned());
    let tips = dedupe_exact(all);

    let added = tips.iter().filter(|t| new_ids.contains(t.id.as_str())).count();

    let surviving: HashSet<&str> = tips.iter().map(|t| t.id.as_str()).collect();
    let top_tips = existing.and_then(|d| d.top_tips.as_ref()).map(|ids| {
        ids.iter()
            .filter(|id| surviving.contains(id.as_str()))
            .cloned()
            .collect::<Vec<_>>()
    });

    TipsData {
        last_updated: resolve_last_updated(existing.map(|d| d.last_updated), added, now),
        total_tips: tips.len(),
        top_tips,
        tips,
    }
}

fn sort_videos_newest_first(videos: &mut [Video]) {
    videos.sort_by(|a, b| b.published_at.cmp(&a.published_at));
}

pub struct Pipeline {
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn transcript_limiter(&self) -> RateLimiter {
        RateLimiter::from_millis(self.config.transcript.delay_ms)
    }

    async fn require_videos(&self) -> Result<VideosData> {
        let path = self.config.paths.videos_file();
        match load_videos(&path).await? {
            Some(data) => Ok(data),
            None => Err(PipelineError::MissingInput(path).into()),
        }
    }

    async fn require_tips(&self) -> Result<TipsData> {
        let path = self.config.paths.tips_file();
        match load_tips(&path).await? {
            Some(data) => Ok(data),
            None => Err(PipelineError::MissingInput(path).into()),
        }
    }

    async fn save_videos(&self, mut data: VideosData) -> Result<()> {
        sort_videos_newest_first(&mut data.videos);
        data.total_videos = data.videos.len();
        write_json_atomic(&self.config.paths.videos_file(), &data, true).await
    }

    /// Poll every channel, fetch transcripts for the new videos one at a
    /// time, and add them to the video store.
    pub async fn fetch_videos(&self, feeds: &FeedClient, source: &dyn TranscriptSource) -> Result<FetchSummary> {
        let path = self.config.paths.videos_file();
        let existing = load_videos(&path).await?;
        let previous_update = existing.as_ref().map(|d| d.last_updated);
        let mut videos = existing.map(|d| d.videos).unwrap_or_default();

        let known: HashSet<String> = videos.iter().map(|v| v.id.clone()).collect();
        let discovered = feeds.discover_new(&known).await;

        let limiter = self.transcript_limiter();
        let mut with_transcript = 0;
        let mut attempted = Vec::with_capacity(discovered.len());
        let total = discovered.len();

        for (n, (channel, entry)) in discovered.into_iter().enumerate() {
            limiter.wait().await;
            info!("🎞️  [{}/{}] {} ({})", n + 1, total, entry.title, channel);

            let transcript = source.fetch(&entry.video_id).await;
            attempted.push(entry.video_id.clone());
            match &transcript {
                Some(text) => {
                    with_transcript += 1;
                    debug!("Transcript for {}: {} chars", entry.video_id, text.len());
                }
                None => debug!("No transcript for {}", entry.video_id),
            }
            videos.push(entry.into_video(channel, transcript));
        }

        let now = Utc::now();
        let data = VideosData {
            last_updated: resolve_last_updated(previous_update, total, now),
            last_checked: Some(now),
            total_videos: videos.len(),
            videos,
        };
        let total_videos = data.total_videos;
        self.save_videos(data).await?;

        info!(
            "✅ {} new videos ({} with transcripts), {} total",
            total, with_transcript, total_videos
        );

        Ok(FetchSummary {
            new_videos: total,
            with_transcript,
            total_videos,
            attempted,
        })
    }

    /// Retry the transcript for every stored video that still has none
    pub async fn backfill_transcripts(&self, source: &dyn TranscriptSource) -> Result<usize> {
        let mut data = self.require_videos().await?;
        let missing: Vec<usize> = data
            .videos
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.has_transcript())
            .map(|(i, _)| i)
            .collect();

        info!("🔁 {} videos without transcripts", missing.len());

        let filled = self.fill_transcripts(&mut data.videos, &missing, source).await;

        if filled > 0 {
            data.last_updated = resolve_last_updated(Some(data.last_updated), filled, Utc::now());
            self.save_videos(data).await?;
        }

        info!("✅ Backfilled {} of {} transcripts", filled, missing.len());
        Ok(filled)
    }

    /// One paced transcript attempt per listed video; returns how many landed
    async fn fill_transcripts(&self, videos: &mut [Video], indices: &[usize], source: &dyn TranscriptSource) -> usize {
        let limiter = self.transcript_limiter();
        let mut filled = 0;

        for (n, &i) in indices.iter().enumerate() {
            let video = &mut videos[i];
            limiter.wait().await;
            debug!("Transcript attempt {}/{} via {}: {}", n + 1, indices.len(), source.name(), video.id);

            if let Some(text) = source.fetch(&video.id).await {
                video.transcript = Some(text);
                filled += 1;
            }
        }

        filled
    }

    /// Extract tips from every video without a ledger record.
    ///
    /// Pending videos lacking a transcript get one fetch attempt first; any
    /// still without one are recorded with zero tips so they are not retried.
    pub async fn extract_tips(&self, source: &dyn TranscriptSource, llm: Arc<dyn LLM>) -> Result<ExtractSummary> {
        self.extract_pending(source, llm, &HashSet::new()).await
    }

    /// Extraction that skips the transcript refetch for `attempted` ids.
    ///
    /// The tip store is always written before the ledger, so an interrupted
    /// write leaves videos pending rather than recorded with lost tips.
    async fn extract_pending(
        &self,
        source: &dyn TranscriptSource,
        llm: Arc<dyn LLM>,
        attempted: &HashSet<String>,
    ) -> Result<ExtractSummary> {
        let mut videos = self.require_videos().await?;
        let tips_path = self.config.paths.tips_file();
        let existing = load_tips(&tips_path).await?;
        let mut ledger =
            ProcessedLedger::load_or_bootstrap(self.config.paths.processed_file(), existing.as_ref()).await?;

        let pending: Vec<usize> = videos
            .videos
            .iter()
            .enumerate()
            .filter(|(_, v)| !ledger.contains(&v.id))
            .map(|(i, _)| i)
            .collect();

        let mut summary = ExtractSummary {
            pending: pending.len(),
            total_tips: existing.as_ref().map_or(0, |d| d.total_tips),
            ..ExtractSummary::default()
        };

        if pending.is_empty() {
            info!("✅ No unprocessed videos");
            ledger.save().await?;
            return Ok(summary);
        }
        info!("📋 {} videos pending extraction", pending.len());

        let untranscribed: Vec<usize> = pending
            .iter()
            .copied()
            .filter(|&i| !videos.videos[i].has_transcript() && !attempted.contains(&videos.videos[i].id))
            .collect();
        if !untranscribed.is_empty() {
            info!("🎞️  Fetching transcripts for {} pending videos", untranscribed.len());
            summary.transcripts_filled = self.fill_transcripts(&mut videos.videos, &untranscribed, source).await;
            if summary.transcripts_filled > 0 {
                videos.last_updated =
                    resolve_last_updated(Some(videos.last_updated), summary.transcripts_filled, Utc::now());
                self.save_videos(videos.clone()).await?;
            }
        }

        let (ready, skipped): (Vec<&Video>, Vec<&Video>) =
            pending.iter().map(|&i| &videos.videos[i]).partition(|v| v.has_transcript());

        if !ready.is_empty() && !llm.is_available().await {
            return Err(PipelineError::LlmUnavailable(llm.provider_type()).into());
        }

        for video in &skipped {
            ledger.record(&video.id, 0);
        }
        summary.processed = skipped.len();
        let ready: Vec<Video> = ready.into_iter().cloned().collect();
        if summary.processed > 0 {
            info!("⏭️  {} pending videos have no transcript, recorded with no tips", summary.processed);
        }

        let extractor = Arc::new(TipExtractor::new(llm, self.config.extraction.clone()));
        let mut outcomes = extractor.spawn_pool(ready);
        let checkpoint_every = self.config.extraction.checkpoint_interval.max(1);
        let mut new_tips: Vec<ExtractedTip> = Vec::new();
        let mut completed = 0;

        while let Some(outcome) = outcomes.recv().await {
            info!("📝 {}: {} tips", outcome.video_id, outcome.tips.len());
            ledger.record(&outcome.video_id, outcome.tips.len());
            new_tips.extend(outcome.tips);
            completed += 1;

            if completed % checkpoint_every == 0 {
                debug!("💾 Checkpoint after {} videos", completed);
                let merged = merge_tips(existing.as_ref(), &new_tips, Utc::now());
                write_json_atomic(&tips_path, &merged, true).await?;
                ledger.save().await?;
            }
        }
        summary.processed += completed;

        let merged = merge_tips(existing.as_ref(), &new_tips, Utc::now());
        summary.new_tips = new_tips.len();
        summary.total_tips = merged.total_tips;
        write_json_atomic(&tips_path, &merged, true).await?;
        ledger.save().await?;

        info!(
            "✅ Processed {} videos, {} new tips, {} in corpus",
            summary.processed, summary.new_tips, summary.total_tips
        );
        Ok(summary)
    }

    /// Discovery then extraction, sharing one transcript source
    pub async fn run(
        &self,
        feeds: &FeedClient,
        source: &dyn TranscriptSource,
        llm: Arc<dyn LLM>,
    ) -> Result<(FetchSummary, ExtractSummary)> {
        info!("🚀 Running fetch-videos and extract-tips");
        let fetched = self.fetch_videos(feeds, source).await?;
        let attempted: HashSet<String> = fetched.attempted.iter().cloned().collect();
        let extracted = self.extract_pending(source, llm, &attempted).await?;
        Ok((fetched, extracted))
    }

    /// Quality filter, dedup and top-tip selection over the whole corpus
    pub async fn dedupe_tips(&self, llm: Arc<dyn LLM>) -> Result<CurationReport> {
        let data = self.require_tips().await?;
        let curator = Curator::new(llm, self.config.curation.clone());

        let (curated, report) = curator.curate(data, Utc::now()).await;
        write_json_atomic(&self.config.paths.tips_file(), &curated, true).await?;

        info!(
            "✅ {} → {} tips ({} removed), {} top tips",
            report.input,
            report.after_semantic,
            report.removed(),
            report.top_tips
        );
        Ok(report)
    }

    /// Embed tips that have no vector yet
    pub async fn embed_tips(&self, embedder: &dyn Embedder) -> Result<EmbedSummary> {
        let data = self.require_tips().await?;
        let path = self.config.paths.embeddings_file();
        let mut entries: Vec<EmbeddingEntry> = read_json(&path).await?.unwrap_or_default();

        let added = build_incremental(embedder, &data.tips, &mut entries, self.config.embedding.batch_size).await?;
        if added > 0 {
            write_json_atomic(&path, &entries, false).await?;
            info!("✅ Saved {} embeddings ({} new)", entries.len(), added);
        } else {
            info!("✅ All tips already embedded");
        }

        Ok(EmbedSummary {
            added,
            total: entries.len(),
        })
    }

    /// Rank published tips against a query
    pub async fn search(
        &self,
        query: &str,
        embedder: Option<&dyn Embedder>,
        limit: usize,
    ) -> Result<Vec<(SearchHit, ExtractedTip)>> {
        let data = self.require_tips().await?;
        let entries: Vec<EmbeddingEntry> = match read_json(&self.config.paths.embeddings_file()).await {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring unreadable embeddings: {:#}", e);
                Vec::new()
            }
        };

        let hits = embeddings::search(query, &data, &entries, embedder, limit).await?;
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let tip = data.tips.iter().find(|t| t.id == hit.tip_id)?.clone();
                Some((hit, tip))
            })
            .collect())
    }
}
