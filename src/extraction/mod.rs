//! Per-video tip extraction through a schema-constrained LLM call.

pub mod quality;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ExtractionConfig;
use crate::llm::{clean_llm_response, ChatMessage, ResponseFormat, LLM};
use crate::models::{Category, ExtractedTip, Park, Priority, Season, TipSource, Video};

pub use quality::{is_high_quality_tip, normalize_tags};

/// A tip as the model returned it, before normalization
#[derive(Debug, Clone, Deserialize)]
pub struct RawTip {
    pub text: String,
    pub category: String,
    #[serde(default)]
    pub park: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TipsEnvelope {
    tips: Vec<RawTip>,
}

/// Outcome of validating one model response; both arms must be handled
#[derive(Debug, Clone)]
pub enum TipParse {
    Ok(Vec<RawTip>),
    Error(String),
}

/// Validate a response against the extraction schema
pub fn parse_tips_response(content: &str) -> TipParse {
    let cleaned = clean_llm_response(content);
    let envelope: TipsEnvelope = match serde_json::from_str(&cleaned) {
        Ok(envelope) => envelope,
        Err(e) => return TipParse::Error(format!("response is not valid tips JSON: {}", e)),
    };

    for (i, tip) in envelope.tips.iter().enumerate() {
        if tip.text.trim().is_empty() {
            return TipParse::Error(format!("tip {} has empty text", i));
        }
        if tip.category.trim().is_empty() {
            return TipParse::Error(format!("tip {} has no category", i));
        }
    }

    TipParse::Ok(envelope.tips)
}

fn enum_values<T: Copy>(all: &[T], as_str: fn(&T) -> &'static str) -> Vec<&'static str> {
    all.iter().map(as_str).collect()
}

/// Output schema for the extraction call
pub fn tips_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tips": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "text": {
                            "type": "string",
                            "description": "The tip itself, 1-2 sentences, specific and actionable"
                        },
                        "category": {
                            "type": "string",
                            "enum": enum_values(Category::ALL, Category::as_str)
                        },
                        "park": {
                            "type": "string",
                            "enum": enum_values(Park::ALL, Park::as_str)
                        },
                        "tags": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "2-4 tags such as \"rope drop\", \"mobile order\""
                        },
                        "priority": {
                            "type": "string",
                            "enum": enum_values(Priority::ALL, Priority::as_str)
                        },
                        "season": {
                            "type": "string",
                            "enum": enum_values(Season::ALL, Season::as_str)
                        }
                    },
                    "required": ["text", "category", "park", "tags", "priority", "season"]
                }
            }
        },
        "required": ["tips"]
    })
}

const EXTRACTION_INSTRUCTIONS: &str = r#"You extract actionable tips for Disney park visitors from YouTube video transcripts.

Keep a tip only if it is:
- Specific: names a ride, restaurant, resort, time, price or strategy
- Actionable: tells the reader exactly what to do
- About Disney parks, resorts or trips (skip sponsor reads, channel news and merchandise announcements)
- Still current (skip limited-time events that have clearly ended)

Reject generic advice such as "arrive early", "stay hydrated" or "have fun".

Categories:
- parks: attractions, Lightning Lane, rope drop, shows, fireworks, parades
- dining: restaurants, snacks, mobile order, dining reservations
- hotels: resorts, rooms, resort perks
- budget: saving money, tickets, discounts
- planning: itineraries, crowds, timing, packing
- transportation: buses, Skyliner, monorail, boats, parking

Use "all-parks" when a tip is not tied to one park. Priority "high" is for tips that save 30+ minutes or $50+.
Season is "year-round" unless the tip only applies to a specific event or season.
Return an empty list when the video has no useful tips."#;

/// Truncate on a character boundary
/// The first `max_chars` characters, and whether anything was cut
fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (&text[..byte_index], true),
        None => (text, false),
    }
}

/// Result of one video passing through the worker pool
#[derive(Debug, Clone)]
pub struct VideoOutcome {
    pub video_id: String,
    pub tips: Vec<ExtractedTip>,
}

/// Turns transcripts into validated, normalized tips
pub struct TipExtractor {
    llm: Arc<dyn LLM>,
    config: ExtractionConfig,
}

impl TipExtractor {
    pub fn new(llm: Arc<dyn LLM>, config: ExtractionConfig) -> Self {
        Self { llm, config }
    }

    fn build_messages(&self, video: &Video, transcript: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(EXTRACTION_INSTRUCTIONS),
            ChatMessage::user(format!(
                "VIDEO TITLE: {}\nCHANNEL: {}\n\nTRANSCRIPT:\n{}\n\nExtract every useful tip from this video.",
                video.title, video.channel_name, transcript
            )),
        ]
    }

    /// Extract tips from one video. Never fails: a video the model cannot
    /// handle after the retry budget yields no tips.
    pub async fn extract(&self, video: &Video) -> Vec<ExtractedTip> {
        let Some(transcript) = video.transcript.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Vec::new();
        };

        let (truncated, was_cut) = truncate_chars(transcript, self.config.max_transcript_chars);
        if was_cut {
            debug!(
                "Transcript for {} truncated to {} characters",
                video.id, self.config.max_transcript_chars
            );
        }

        let format = ResponseFormat::JsonSchema {
            name: "extracted_tips",
            schema: tips_schema(),
        };
        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            let messages = self.build_messages(video, truncated);
            let failure = match self.llm.chat(messages, &format).await {
                Ok(response) => match parse_tips_response(&response.content) {
                    TipParse::Ok(raw) => return self.finalize(raw, video),
                    TipParse::Error(reason) => reason,
                },
                Err(e) => format!("{:#}", e),
            };

            warn!(
                "Extraction attempt {}/{} for {} failed: {}",
                attempt, attempts, video.id, failure
            );
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        warn!("⚠️  Giving up on {} after {} attempts", video.id, attempts);
        Vec::new()
    }

    /// Quality filter, enum normalization and stamping
    pub fn finalize(&self, raw: Vec<RawTip>, video: &Video) -> Vec<ExtractedTip> {
        let total = raw.len();
        let now = Utc::now();
        let source = TipSource::from_video(video);

        let tips: Vec<ExtractedTip> = raw
            .into_iter()
            .map(|tip| RawTip {
                text: tip.text.trim().to_string(),
                ..tip
            })
            .filter(|tip| is_high_quality_tip(&tip.text))
            .map(|tip| {
                let category = Category::normalize(&tip.category);
                ExtractedTip {
                    id: Uuid::new_v4().to_string(),
                    tags: normalize_tags(&tip.tags, category),
                    text: tip.text,
                    category,
                    park: tip.park.as_deref().map(Park::normalize).unwrap_or_default(),
                    priority: tip.priority.as_deref().map(Priority::normalize).unwrap_or_default(),
                    season: tip.season.as_deref().map(Season::normalize).unwrap_or_default(),
                    source: source.clone(),
                    extracted_at: now,
                }
            })
            .collect();

        if tips.len() < total {
            debug!(
                "Quality filter dropped {} of {} tips from {}",
                total - tips.len(),
                total,
                video.id
            );
        }
        tips
    }

    /// Run videos through a bounded worker pool. Outcomes arrive in completion
    /// order, one per video, whether or not it yielded tips.
    pub fn spawn_pool(self: &Arc<Self>, videos: Vec<Video>) -> mpsc::Receiver<VideoOutcome> {
        let concurrency = self.config.concurrency.max(1);
        let (tx, rx) = mpsc::channel(concurrency);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let total = videos.len();

        info!("🧠 Extracting tips from {} videos ({} at a time)", total, concurrency);

        for (index, video) in videos.into_iter().enumerate() {
            let extractor = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();

            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };

                debug!("📹 Extracting {}/{}: {}", index + 1, total, video.title);
                let tips = extractor.extract(&video).await;

                let outcome = VideoOutcome {
                    video_id: video.id,
                    tips,
                };
                if tx.send(outcome).await.is_err() {
                    warn!("Extraction result dropped; receiver closed");
                }
            });
        }

        rx
    }
}
