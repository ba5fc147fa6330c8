use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use disney_tips_pipeline::config::{Config, ConfigBuilder};
use disney_tips_pipeline::discovery::FeedClient;
use disney_tips_pipeline::embeddings::Embedder;
use disney_tips_pipeline::llm::{ChatMessage, LLMProvider, LLMResponse, ResponseFormat, LLM};
use disney_tips_pipeline::models::{Channel, ProcessedVideoRecord, TipsData, Video, VideosData};
use disney_tips_pipeline::pipeline::Pipeline;
use disney_tips_pipeline::state::{read_json, write_json_atomic};
use disney_tips_pipeline::transcript::TranscriptSource;
use disney_tips_pipeline::PipelineError;

const TRANSCRIPT: &str = "Welcome back to the channel. Today we are touring Hollywood Studios and \
    sharing everything we learned about rope drop and mobile ordering at Toy Story Land.";

/// Serves canned transcripts and counts every fetch per video
#[derive(Default)]
struct FakeSource {
    transcripts: HashMap<String, String>,
    fetches: Mutex<Vec<String>>,
}

impl FakeSource {
    fn with(pairs: &[(&str, &str)]) -> Self {
        Self {
            transcripts: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            fetches: Mutex::new(Vec::new()),
        }
    }

    fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl TranscriptSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch(&self, video_id: &str) -> Option<String> {
        self.fetches.lock().unwrap().push(video_id.to_string());
        self.transcripts.get(video_id).cloned()
    }
}

/// Answers extraction with two solid tips and dedup with "keep everything"
#[derive(Default)]
struct FakeLLM {
    extraction_calls: AtomicUsize,
    other_calls: AtomicUsize,
    offline: bool,
}

#[async_trait]
impl LLM for FakeLLM {
    async fn chat(&self, messages: Vec<ChatMessage>, _format: &ResponseFormat) -> Result<LLMResponse> {
        let prompt = messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");

        let content = if prompt.contains("deduplicating") {
            self.other_calls.fetch_add(1, Ordering::SeqCst);
            r#"{"keep": [0, 1], "removed": []}"#.to_string()
        } else if prompt.contains("topIds") {
            self.other_calls.fetch_add(1, Ordering::SeqCst);
            r#"{"topIds": []}"#.to_string()
        } else {
            self.extraction_calls.fetch_add(1, Ordering::SeqCst);
            serde_json::json!({
                "tips": [
                    {
                        "text": "Head to Slinky Dog Dash at rope drop before the standby line passes 60 minutes.",
                        "category": "parks",
                        "park": "hollywood-studios",
                        "tags": ["rope drop", "Toy Story Land"],
                        "priority": "high",
                        "season": "year-round"
                    },
                    {
                        "text": "Mobile order lunch at Woody's Lunch Box before 10:30 to skip the midday rush.",
                        "category": "dining",
                        "park": "hollywood-studios",
                        "tags": ["mobile order"],
                        "priority": "medium",
                        "season": "year-round"
                    }
                ]
            })
            .to_string()
        };

        Ok(LLMResponse {
            content,
            tokens_used: None,
        })
    }

    async fn is_available(&self) -> bool {
        !self.offline
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::LMStudio
    }
}

/// Two-feature vectors: mentions rope drop, mentions ordering
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs
            .iter()
            .map(|text| {
                let text = text.to_lowercase();
                vec![
                    if text.contains("rope") { 1.0 } else { 0.0 },
                    if text.contains("order") { 1.0 } else { 0.0 },
                    0.1,
                ]
            })
            .collect())
    }
}

fn test_config(dir: &TempDir) -> Config {
    ConfigBuilder::new()
        .with_data_root(dir.path().join("data"))
        .with_dist_root(dir.path().join("dist"))
        .without_delays()
        .build()
}

fn video(id: &str, day: u32) -> Video {
    Video {
        id: id.to_string(),
        channel_name: Channel::TheTimTracker,
        title: format!("Video {}", id),
        description: String::new(),
        published_at: Utc.with_ymd_and_hms(2026, 5, day, 12, 0, 0).unwrap(),
        thumbnail: format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", id),
        transcript: None,
    }
}

fn captioned(id: &str, day: u32) -> Video {
    Video {
        transcript: Some(TRANSCRIPT.to_string()),
        ..video(id, day)
    }
}

async fn seed_videos(config: &Config, videos: Vec<Video>) {
    let data = VideosData {
        last_updated: Utc.with_ymd_and_hms(2026, 5, 20, 0, 0, 0).unwrap(),
        last_checked: None,
        total_videos: videos.len(),
        videos,
    };
    write_json_atomic(&config.paths.videos_file(), &data, true).await.unwrap();
}

#[tokio::test]
async fn test_extraction_records_every_video_once() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    seed_videos(&config, vec![video("with-captions", 10), video("no-captions", 11)]).await;

    let source = FakeSource::with(&[("with-captions", TRANSCRIPT)]);
    let llm = Arc::new(FakeLLM::default());
    let pipeline = Pipeline::new(config.clone());

    let first = assert_ok!(pipeline.extract_tips(&source, llm.clone()).await);
    assert_eq!(first.pending, 2);
    assert_eq!(first.transcripts_filled, 1);
    assert_eq!(first.processed, 2);
    assert_eq!(first.new_tips, 2);

    let ledger: Vec<ProcessedVideoRecord> = read_json(&config.paths.processed_file()).await.unwrap().unwrap();
    let counts: HashMap<&str, usize> = ledger.iter().map(|r| (r.video_id.as_str(), r.tip_count)).collect();
    assert_eq!(ledger.len(), 2);
    assert_eq!(counts["with-captions"], 2);
    assert_eq!(counts["no-captions"], 0);

    // the fetched transcript was persisted to the video store
    let videos: VideosData = read_json(&config.paths.videos_file()).await.unwrap().unwrap();
    let stored = videos.videos.iter().find(|v| v.id == "with-captions").unwrap();
    assert_eq!(stored.transcript.as_deref(), Some(TRANSCRIPT));

    let tips: TipsData = read_json(&config.paths.tips_file()).await.unwrap().unwrap();
    assert_eq!(tips.total_tips, 2);
    assert!(tips.tips.iter().all(|t| t.source.video_id == "with-captions"));

    // second run: nothing pending, no transcript fetches, no model calls
    let second = assert_ok!(pipeline.extract_tips(&source, llm.clone()).await);
    assert_eq!(second.pending, 0);
    assert_eq!(source.fetch_count(), 2);
    assert_eq!(llm.extraction_calls.load(Ordering::SeqCst), 1);

    let tips_again: TipsData = read_json(&config.paths.tips_file()).await.unwrap().unwrap();
    assert_eq!(tips_again.last_updated, tips.last_updated);
}

#[tokio::test]
async fn test_legacy_corpus_bootstraps_ledger() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    seed_videos(&config, vec![video("already-mined", 3), video("fresh", 4)]).await;

    // a corpus written before the ledger existed
    let source = FakeSource::with(&[("already-mined", TRANSCRIPT)]);
    let llm = Arc::new(FakeLLM::default());
    let seeding = Pipeline::new(config.clone());
    assert_ok!(seeding.extract_tips(&source, llm.clone()).await);
    tokio::fs::remove_file(config.paths.processed_file()).await.unwrap();

    let source = FakeSource::with(&[("fresh", TRANSCRIPT)]);
    let llm = Arc::new(FakeLLM::default());
    let summary = assert_ok!(Pipeline::new(config.clone()).extract_tips(&source, llm.clone()).await);

    // "already-mined" came back through the bootstrap, so only "fresh" ran
    assert_eq!(summary.pending, 1);
    assert_eq!(llm.extraction_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*source.fetches.lock().unwrap(), vec!["fresh".to_string()]);
}

#[tokio::test]
async fn test_missing_video_store_is_fatal() {
    let dir = TempDir::new().unwrap();
    let pipeline = Pipeline::new(test_config(&dir));

    let err = assert_err!(pipeline.extract_tips(&FakeSource::default(), Arc::new(FakeLLM::default())).await);
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::MissingInput(_))
    ));
}

#[tokio::test]
async fn test_unreachable_llm_leaves_ledger_untouched() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    seed_videos(&config, vec![captioned("ready", 8)]).await;

    let llm = Arc::new(FakeLLM {
        offline: true,
        ..FakeLLM::default()
    });
    let err = assert_err!(Pipeline::new(config.clone()).extract_tips(&FakeSource::default(), llm.clone()).await);

    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::LlmUnavailable(LLMProvider::LMStudio))
    ));
    assert_eq!(llm.extraction_calls.load(Ordering::SeqCst), 0);
    assert!(!config.paths.processed_file().exists());
}

#[tokio::test]
async fn test_failed_tip_write_keeps_videos_pending() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    seed_videos(&config, vec![captioned("ready", 8)]).await;

    // a directory where the temp file should go makes the tip write fail
    let blocker = config.paths.tips_file().with_file_name("tips.json.tmp");
    std::fs::create_dir_all(&blocker).unwrap();

    let pipeline = Pipeline::new(config.clone());
    let source = FakeSource::default();
    assert_err!(pipeline.extract_tips(&source, Arc::new(FakeLLM::default())).await);
    assert!(!config.paths.processed_file().exists());

    std::fs::remove_dir(&blocker).unwrap();
    let retry = assert_ok!(pipeline.extract_tips(&source, Arc::new(FakeLLM::default())).await);
    assert_eq!(retry.pending, 1);
    assert_eq!(retry.new_tips, 2);
}

const FEED: &str = r#"<feed>
 <entry>
  <yt:videoId>feedvid01</yt:videoId>
  <title>Best Rope Drop Strategy for Hollywood Studios</title>
  <published>2026-05-18T14:00:00+00:00</published>
 </entry>
 <entry>
  <yt:videoId>feedvid02</yt:videoId>
  <title>Dining Review</title>
  <published>2026-05-19T14:00:00+00:00</published>
 </entry>
</feed>"#;

#[tokio::test]
async fn test_fetch_videos_separates_checked_from_updated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("channel_id", Channel::TheTimTracker.feed_id()))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.discovery.feed_base_url = format!("{}/feeds/videos.xml", server.uri());
    let feeds = FeedClient::new(&config.discovery).unwrap();
    let pipeline = Pipeline::new(config.clone());

    let source = FakeSource::with(&[("feedvid01", TRANSCRIPT)]);
    let first = assert_ok!(pipeline.fetch_videos(&feeds, &source).await);
    assert_eq!(first.new_videos, 2);
    assert_eq!(first.with_transcript, 1);

    let stored: VideosData = read_json(&config.paths.videos_file()).await.unwrap().unwrap();
    let ids: Vec<&str> = stored.videos.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["feedvid02", "feedvid01"]);
    assert_eq!(stored.videos[0].channel_name, Channel::TheTimTracker);

    let second = assert_ok!(pipeline.fetch_videos(&feeds, &source).await);
    assert_eq!(second.new_videos, 0);
    assert_eq!(source.fetch_count(), 2);

    let restored: VideosData = read_json(&config.paths.videos_file()).await.unwrap().unwrap();
    assert_eq!(restored.last_updated, stored.last_updated);
    assert!(restored.last_checked >= stored.last_checked);
}

#[tokio::test]
async fn test_run_fetches_each_video_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("channel_id", Channel::TheTimTracker.feed_id()))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.discovery.feed_base_url = format!("{}/feeds/videos.xml", server.uri());
    let feeds = FeedClient::new(&config.discovery).unwrap();

    // feedvid02 has no captions; discovery already tried it
    let source = FakeSource::with(&[("feedvid01", TRANSCRIPT)]);
    let llm = Arc::new(FakeLLM::default());
    let (fetched, extracted) = assert_ok!(Pipeline::new(config.clone()).run(&feeds, &source, llm.clone()).await);

    let mut fetches = source.fetches.lock().unwrap().clone();
    fetches.sort();
    assert_eq!(fetches, vec!["feedvid01".to_string(), "feedvid02".to_string()]);
    assert_eq!(fetched.with_transcript, 1);
    assert_eq!(extracted.transcripts_filled, 0);
    assert_eq!(extracted.processed, 2);
    assert_eq!(llm.extraction_calls.load(Ordering::SeqCst), 1);

    let ledger: Vec<ProcessedVideoRecord> = read_json(&config.paths.processed_file()).await.unwrap().unwrap();
    assert_eq!(ledger.len(), 2);
}

#[tokio::test]
async fn test_backfill_fills_missing_transcripts() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    seed_videos(&config, vec![video("a", 1), video("b", 2)]).await;

    let source = FakeSource::with(&[("b", TRANSCRIPT)]);
    let filled = assert_ok!(Pipeline::new(config.clone()).backfill_transcripts(&source).await);
    assert_eq!(filled, 1);

    let stored: VideosData = read_json(&config.paths.videos_file()).await.unwrap().unwrap();
    assert!(stored.videos.iter().find(|v| v.id == "b").unwrap().has_transcript());
    assert!(!stored.videos.iter().find(|v| v.id == "a").unwrap().has_transcript());
}

#[tokio::test]
async fn test_curate_embed_and_search() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    seed_videos(&config, vec![video("with-captions", 10)]).await;

    let source = FakeSource::with(&[("with-captions", TRANSCRIPT)]);
    let llm = Arc::new(FakeLLM::default());
    let pipeline = Pipeline::new(config.clone());
    assert_ok!(pipeline.extract_tips(&source, llm.clone()).await);

    let report = assert_ok!(pipeline.dedupe_tips(llm.clone()).await);
    assert_eq!(report.after_semantic, 2);
    assert_eq!(report.top_tips, 2);

    let curated: TipsData = read_json(&config.paths.tips_file()).await.unwrap().unwrap();
    assert_eq!(curated.top_tips.as_ref().map(Vec::len), Some(2));

    let embedded = assert_ok!(pipeline.embed_tips(&KeywordEmbedder).await);
    assert_eq!(embedded.added, 2);
    let again = assert_ok!(pipeline.embed_tips(&KeywordEmbedder).await);
    assert_eq!(again.added, 0);
    assert_eq!(again.total, 2);

    let results = assert_ok!(pipeline.search("rope drop", Some(&KeywordEmbedder), 5).await);
    assert_eq!(results.len(), 2);
    assert!(results[0].1.text.contains("Slinky Dog Dash"));

    let keyword = assert_ok!(pipeline.search("woody's lunch", None, 5).await);
    assert!(keyword[0].1.text.contains("Woody's Lunch Box"));
}
