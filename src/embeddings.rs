//! Vector index over the published tips, and search against it.

use anyhow::{bail, ensure, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::EmbeddingConfig;
use crate::error::PipelineError;
use crate::models::{EmbeddingEntry, ExtractedTip, TipsData};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// OpenAI-compatible `/embeddings` client
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(PipelineError::MissingCredential("OPENAI_API_KEY"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("failed to build embeddings HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.endpoint.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: inputs,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("embeddings request failed ({}): {}", status, body);
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .context("failed to parse embeddings response")?;
        parsed.data.sort_by_key(|d| d.index);
        ensure!(
            parsed.data.len() == inputs.len(),
            "embeddings endpoint returned {} vectors for {} inputs",
            parsed.data.len(),
            inputs.len()
        );

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Text a tip is embedded as
pub fn embedding_text(tip: &ExtractedTip) -> String {
    format!(
        "{} [{}] [{}] [{}]",
        tip.text,
        tip.category,
        tip.park,
        tip.tags.join(", ")
    )
}

/// Embed only the tips that have no entry yet and append them.
///
/// Returns the number of new entries.
pub async fn build_incremental(
    embedder: &dyn Embedder,
    tips: &[ExtractedTip],
    entries: &mut Vec<EmbeddingEntry>,
    batch_size: usize,
) -> Result<usize> {
    let existing: HashSet<&str> = entries.iter().map(|e| e.tip_id.as_str()).collect();
    let pending: Vec<&ExtractedTip> = tips.iter().filter(|t| !existing.contains(t.id.as_str())).collect();

    info!(
        "🧮 {} tips need embeddings ({} already done)",
        pending.len(),
        entries.len()
    );

    let batch_size = batch_size.max(1);
    let batches = pending.len().div_ceil(batch_size);
    let mut added = Vec::with_capacity(pending.len());

    for (n, batch) in pending.chunks(batch_size).enumerate() {
        debug!("Embedding batch {}/{}", n + 1, batches);
        let texts: Vec<String> = batch.iter().map(|t| embedding_text(t)).collect();
        let vectors = embedder
            .embed(&texts)
            .await
            .with_context(|| format!("embedding batch {} of {} failed", n + 1, batches))?;

        added.extend(batch.iter().zip(vectors).map(|(tip, vector)| EmbeddingEntry {
            tip_id: tip.id.clone(),
            vector,
        }));
    }

    let count = added.len();
    entries.extend(added);
    Ok(count)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub tip_id: String,
    pub score: f32,
}

/// Rank tips by similarity to `query`. Entries for tips that are no longer
/// in the corpus are ignored.
pub fn rank_by_similarity(
    query: &[f32],
    tips: &[ExtractedTip],
    entries: &[EmbeddingEntry],
    limit: usize,
) -> Vec<SearchHit> {
    let vectors: HashMap<&str, &[f32]> = entries
        .iter()
        .map(|e| (e.tip_id.as_str(), e.vector.as_slice()))
        .collect();

    let mut hits: Vec<SearchHit> = tips
        .iter()
        .filter_map(|tip| {
            vectors.get(tip.id.as_str()).map(|v| SearchHit {
                tip_id: tip.id.clone(),
                score: cosine_similarity(query, v),
            })
        })
        .collect();

    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(limit);
    hits
}

/// Keyword scoring used when no vectors are available: one point per query
/// word found, plus a bonus when the whole query appears verbatim.
pub fn text_search(query: &str, data: &TipsData, limit: usize) -> Vec<SearchHit> {
    let query = query.trim().to_lowercase();
    let words: Vec<&str> = query.split_whitespace().filter(|w| w.len() > 1).collect();

    let top_fallback = || {
        data.top_tips
            .iter()
            .flatten()
            .take(limit)
            .map(|id| SearchHit {
                tip_id: id.clone(),
                score: 0.0,
            })
            .collect::<Vec<_>>()
    };

    if words.is_empty() {
        return top_fallback();
    }

    let mut hits: Vec<SearchHit> = data
        .tips
        .iter()
        .filter_map(|tip| {
            let haystack = format!("{} {} {} {}", tip.text, tip.category, tip.park, tip.tags.join(" ")).to_lowercase();
            let mut score = words.iter().filter(|w| haystack.contains(*w)).count();
            if haystack.contains(&query) {
                score += words.len();
            }
            (score > 0).then(|| SearchHit {
                tip_id: tip.id.clone(),
                score: score as f32,
            })
        })
        .collect();

    if hits.is_empty() {
        return top_fallback();
    }

    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(limit);
    hits
}

/// Semantic search when an embedder and vectors exist, keyword search otherwise
pub async fn search(
    query: &str,
    data: &TipsData,
    entries: &[EmbeddingEntry],
    embedder: Option<&dyn Embedder>,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    let query = query.trim();
    if query.is_empty() {
        bail!("search query is empty");
    }

    match embedder {
        Some(embedder) if !entries.is_empty() => {
            let mut vectors = embedder.embed(&[query.to_string()]).await?;
            let vector = vectors.pop().context("embedder returned no vector for the query")?;
            Ok(rank_by_similarity(&vector, &data.tips, entries, limit))
        }
        _ => {
            info!("🔎 No embeddings available, using keyword search");
            Ok(text_search(query, data, limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Channel, Park, Priority, Season, TipSource};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tip(id: &str, text: &str, tags: &[&str]) -> ExtractedTip {
        ExtractedTip {
            id: id.to_string(),
            text: text.to_string(),
            category: Category::Dining,
            park: Park::Epcot,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            priority: Priority::High,
            season: Season::YearRound,
            source: TipSource {
                video_id: "v".to_string(),
                channel_name: Channel::DfbGuide,
                video_title: "t".to_string(),
                published_at: Utc::now(),
            },
            extracted_at: Utc::now(),
        }
    }

    /// Vector = [text length, batch call number]
    struct CountingEmbedder {
        calls: AtomicUsize,
        batch_sizes: std::sync::Mutex<Vec<usize>>,
    }

    impl CountingEmbedder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                batch_sizes: std::sync::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(inputs.len());
            Ok(inputs.iter().map(|i| vec![i.len() as f32, call as f32]).collect())
        }
    }

    #[test]
    fn test_embedding_text_format() {
        let t = tip("a", "Order the Dole Whip", &["snacks", "mobile-order"]);
        assert_eq!(embedding_text(&t), "Order the Dole Whip [dining] [epcot] [snacks, mobile-order]");
    }

    #[tokio::test]
    async fn test_incremental_build_skips_existing() {
        let embedder = CountingEmbedder::new();
        let tips: Vec<_> = (0..5).map(|i| tip(&format!("t{}", i), "text", &[])).collect();
        let mut entries = vec![EmbeddingEntry {
            tip_id: "t0".to_string(),
            vector: vec![9.0],
        }];

        let added = build_incremental(embedder.as_ref(), &tips, &mut entries, 2).await.unwrap();
        assert_eq!(added, 4);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].vector, vec![9.0]);
        assert_eq!(*embedder.batch_sizes.lock().unwrap(), vec![2, 2]);

        let again = build_incremental(embedder.as_ref(), &tips, &mut entries, 2).await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_ranking_ignores_orphaned_entries() {
        let tips = vec![tip("near", "a", &[]), tip("far", "b", &[])];
        let entries = vec![
            EmbeddingEntry { tip_id: "far".to_string(), vector: vec![0.0, 1.0] },
            EmbeddingEntry { tip_id: "gone".to_string(), vector: vec![1.0, 0.0] },
            EmbeddingEntry { tip_id: "near".to_string(), vector: vec![0.9, 0.1] },
        ];

        let hits = rank_by_similarity(&[1.0, 0.0], &tips, &entries, 10);
        let ids: Vec<&str> = hits.iter().map(|h| h.tip_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
    }

    #[test]
    fn test_text_search_scores_and_falls_back() {
        let data = TipsData {
            last_updated: Utc::now(),
            total_tips: 2,
            tips: vec![
                tip("whip", "Order the Dole Whip float through mobile order", &["snacks"]),
                tip("ride", "Ride Frozen Ever After during the fireworks", &["rides"]),
            ],
            top_tips: Some(vec!["ride".to_string()]),
        };

        let hits = text_search("dole whip", &data, 5);
        assert_eq!(hits[0].tip_id, "whip");
        assert_eq!(hits.len(), 1);

        let fallback = text_search("zzzz", &data, 5);
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].tip_id, "ride");
    }

    #[tokio::test]
    async fn test_openai_embedder_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] }
                ]
            })))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(&EmbeddingConfig {
            endpoint: format!("{}/v1", server.uri()),
            api_key: Some("sk-test".to_string()),
            ..EmbeddingConfig::default()
        })
        .unwrap();

        let vectors = embedder.embed(&["a".to_string(), "b".to_string()]).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_openai_embedder_requires_key() {
        let err = OpenAiEmbedder::new(&EmbeddingConfig::default()).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingCredential("OPENAI_API_KEY"))
        ));
    }
}
