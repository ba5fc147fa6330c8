//! Corpus-wide cleanup: quality filter, exact and semantic dedup, top tips.
//!
//! Every LLM-dependent step degrades to "leave this batch as it was" when the
//! model errors or answers with something that does not validate.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CurationConfig;
use crate::extraction::quality::{is_high_quality_tip, normalize_tags};
use crate::llm::{clean_llm_response, ChatMessage, ResponseFormat, LLM};
use crate::models::{sort_newest_first, Category, ExtractedTip, TipsData};
use crate::rate_limit::RateLimiter;
use crate::state::resolve_last_updated;

/// Validated answer to a semantic-dedup request
#[derive(Debug, Clone, PartialEq)]
pub enum KeepVerdict {
    /// Indices to keep, ascending
    Keep(Vec<usize>),
    Invalid(String),
}

/// Validated answer to a top-tips request
#[derive(Debug, Clone, PartialEq)]
pub enum TopVerdict {
    Ids(Vec<String>),
    Invalid(String),
}

#[derive(Debug, Deserialize)]
struct KeepResponse {
    keep: Vec<usize>,
    #[serde(default)]
    removed: Vec<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopResponse {
    top_ids: Vec<String>,
}

/// Every index in `0..batch_len` must appear in exactly one of keep/removed,
/// and at least one tip must survive.
pub fn parse_keep_verdict(content: &str, batch_len: usize) -> KeepVerdict {
    let response: KeepResponse = match serde_json::from_str(&clean_llm_response(content)) {
        Ok(r) => r,
        Err(e) => return KeepVerdict::Invalid(format!("not a keep/removed object: {}", e)),
    };

    let mut seen = vec![false; batch_len];
    for &index in response.keep.iter().chain(response.removed.iter()) {
        match seen.get_mut(index) {
            None => return KeepVerdict::Invalid(format!("index {} out of range", index)),
            Some(true) => return KeepVerdict::Invalid(format!("index {} listed twice", index)),
            Some(slot) => *slot = true,
        }
    }
    if let Some(missing) = seen.iter().position(|s| !s) {
        return KeepVerdict::Invalid(format!("index {} missing", missing));
    }
    if response.keep.is_empty() && batch_len > 0 {
        return KeepVerdict::Invalid("nothing kept".to_string());
    }

    let mut keep = response.keep;
    keep.sort_unstable();
    KeepVerdict::Keep(keep)
}

/// Ids must come from the candidate set; unknown and repeated ids are
/// dropped, the rest keep the model's ranking, capped at `count`.
pub fn parse_top_verdict(content: &str, candidates: &[ExtractedTip], count: usize) -> TopVerdict {
    let response: TopResponse = match serde_json::from_str(&clean_llm_response(content)) {
        Ok(r) => r,
        Err(e) => return TopVerdict::Invalid(format!("not a topIds object: {}", e)),
    };

    let known: HashSet<&str> = candidates.iter().map(|t| t.id.as_str()).collect();
    let mut picked = HashSet::new();
    let ids: Vec<String> = response
        .top_ids
        .into_iter()
        .filter(|id| known.contains(id.as_str()) && picked.insert(id.clone()))
        .take(count)
        .collect();

    if ids.is_empty() {
        TopVerdict::Invalid("no known tip ids returned".to_string())
    } else {
        TopVerdict::Ids(ids)
    }
}

/// Drop tips that fail the quality rules; tidy text and tags on the rest
pub fn apply_quality_filter(tips: Vec<ExtractedTip>) -> Vec<ExtractedTip> {
    tips.into_iter()
        .filter(|tip| is_high_quality_tip(&tip.text))
        .map(|mut tip| {
            tip.text = tip.text.trim().to_string();
            tip.tags = normalize_tags(&tip.tags, tip.category);
            tip
        })
        .collect()
}

/// Newest first, then the first tip per four-part key wins
pub fn dedupe_exact(mut tips: Vec<ExtractedTip>) -> Vec<ExtractedTip> {
    sort_newest_first(&mut tips);
    let mut seen = HashSet::new();
    tips.retain(|tip| seen.insert(tip.dedup_key()));
    tips
}

fn keep_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "keep": { "type": "array", "items": { "type": "integer" } },
            "removed": { "type": "array", "items": { "type": "integer" } }
        },
        "required": ["keep", "removed"]
    })
}

fn top_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "topIds": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["topIds"]
    })
}

/// Counts from one curation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurationReport {
    pub input: usize,
    pub after_quality: usize,
    pub after_exact: usize,
    pub after_semantic: usize,
    pub top_tips: usize,
    pub top_changed: bool,
}

impl CurationReport {
    pub fn removed(&self) -> usize {
        self.input - self.after_semantic
    }
}

pub struct Curator {
    llm: Arc<dyn LLM>,
    config: CurationConfig,
    limiter: RateLimiter,
}

impl Curator {
    pub fn new(llm: Arc<dyn LLM>, config: CurationConfig) -> Self {
        let limiter = RateLimiter::from_millis(config.batch_delay_ms);
        Self { llm, config, limiter }
    }

    /// Run all three phases over a published corpus
    pub async fn curate(&self, data: TipsData, now: DateTime<Utc>) -> (TipsData, CurationReport) {
        let mut report = CurationReport {
            input: data.tips.len(),
            ..CurationReport::default()
        };

        info!("🧹 Step 1: quality filter over {} tips", report.input);
        let tips = apply_quality_filter(data.tips);
        report.after_quality = tips.len();

        let tips = dedupe_exact(tips);
        report.after_exact = tips.len();
        info!(
            "🧹 {} tips after quality filter, {} after exact dedup",
            report.after_quality, report.after_exact
        );

        info!("🔍 Step 2: semantic dedup in batches of {}", self.config.batch_size);
        let mut tips = self.dedupe_semantic(tips).await;
        report.after_semantic = tips.len();

        info!("⭐ Step 3: selecting top {} tips", self.config.top_tips_count);
        let top = self.select_top(&tips, self.config.top_tips_count).await;
        report.top_tips = top.len();
        report.top_changed = data.top_tips.as_deref() != Some(top.as_slice());

        sort_newest_first(&mut tips);

        let changes = report.removed() + usize::from(report.top_changed);
        let curated = TipsData {
            last_updated: resolve_last_updated(Some(data.last_updated), changes, now),
            total_tips: tips.len(),
            tips,
            top_tips: Some(top),
        };

        (curated, report)
    }

    /// Batch-wise semantic dedup; a failed batch is kept whole
    pub async fn dedupe_semantic(&self, tips: Vec<ExtractedTip>) -> Vec<ExtractedTip> {
        let batch_size = self.config.batch_size.max(1);
        let batches = tips.len().div_ceil(batch_size);
        let mut kept = Vec::with_capacity(tips.len());

        for (n, batch) in tips.chunks(batch_size).enumerate() {
            debug!("Dedup batch {}/{}", n + 1, batches);
            self.limiter.wait().await;

            let keep = self.dedupe_batch(batch).await;
            kept.extend(keep.into_iter().map(|i| batch[i].clone()));
        }

        info!("🔍 {} tips after semantic dedup", kept.len());
        kept
    }

    async fn dedupe_batch(&self, batch: &[ExtractedTip]) -> Vec<usize> {
        let all = || (0..batch.len()).collect::<Vec<_>>();
        if batch.len() < 2 {
            return all();
        }

        let listing = batch
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{}: {}", i, t.text))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "You are deduplicating Disney park tips. Find tips that say essentially the same thing, \
             even with different wording, and keep only the best version of each:\n\
             - Prefer more specific tips over vague ones\n\
             - Prefer tips with more detail\n\
             - Prefer tips from more recent videos (lower indices are newer)\n\n\
             Tips (index: text):\n{}\n\n\
             Return {{\"keep\": [...], \"removed\": [...]}}. Every index from 0 to {} must appear \
             in exactly one of the two lists.",
            listing,
            batch.len() - 1
        );

        let format = ResponseFormat::JsonSchema {
            name: "dedup_verdict",
            schema: keep_schema(),
        };

        match self.llm.chat(vec![ChatMessage::user(prompt)], &format).await {
            Ok(response) => match parse_keep_verdict(&response.content, batch.len()) {
                KeepVerdict::Keep(keep) => keep,
                KeepVerdict::Invalid(reason) => {
                    warn!("Dedup verdict rejected ({}); keeping batch unchanged", reason);
                    all()
                }
            },
            Err(e) => {
                warn!("Dedup call failed ({:#}); keeping batch unchanged", e);
                all()
            }
        }
    }

    /// Ranked top tips. Candidate sets larger than one chunk are narrowed
    /// per category first (or per chunk when only one category remains),
    /// then ranked again over the survivors.
    pub fn select_top<'a>(&'a self, tips: &'a [ExtractedTip], count: usize) -> BoxFuture<'a, Vec<String>> {
        async move {
            if tips.len() <= count {
                return tips.iter().map(|t| t.id.clone()).collect();
            }
            if tips.len() <= self.config.chunk_size {
                return self.select_top_chunk(tips, count).await;
            }

            let groups = self.partition(tips);
            let quota = count.div_ceil(groups.len()).max(1);

            let mut selected: HashSet<String> = HashSet::new();
            for group in &groups {
                debug!("Selecting top {} from a group of {}", quota, group.len());
                selected.extend(self.select_top(group, quota).await);
            }

            // Preserve corpus order among the survivors
            let candidates: Vec<ExtractedTip> = tips
                .iter()
                .filter(|t| selected.contains(&t.id))
                .cloned()
                .collect();

            if candidates.len() >= tips.len() {
                return first_ids(tips, count);
            }

            info!("⭐ Final selection from {} candidates", candidates.len());
            self.select_top(&candidates, count).await
        }
        .boxed()
    }

    fn partition(&self, tips: &[ExtractedTip]) -> Vec<Vec<ExtractedTip>> {
        let mut by_category: HashMap<Category, Vec<ExtractedTip>> = HashMap::new();
        for tip in tips {
            by_category.entry(tip.category).or_default().push(tip.clone());
        }

        if by_category.len() > 1 {
            Category::ALL
                .iter()
                .filter_map(|c| by_category.remove(c))
                .collect()
        } else {
            tips.chunks(self.config.chunk_size.max(1))
                .map(|chunk| chunk.to_vec())
                .collect()
        }
    }

    async fn select_top_chunk(&self, tips: &[ExtractedTip], count: usize) -> Vec<String> {
        let listing = tips
            .iter()
            .map(|t| format!("{}: {}", t.id, t.text))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "You are curating the BEST Disney park tips. From these {} tips, select the {} most valuable.\n\n\
             Prioritize tips that:\n\
             - Save significant time (30+ minutes) or money ($50+)\n\
             - Are highly specific (exact rides, restaurants, strategies)\n\
             - Tell the reader exactly what to do\n\
             - Are unique insights, not common knowledge\n\n\
             Tips (id: text):\n{}\n\n\
             Return {{\"topIds\": [...]}} ordered best first, with exactly {} ids.",
            tips.len(),
            count,
            listing,
            count.min(tips.len())
        );

        let format = ResponseFormat::JsonSchema {
            name: "top_tips",
            schema: top_schema(),
        };

        match self.llm.chat(vec![ChatMessage::user(prompt)], &format).await {
            Ok(response) => match parse_top_verdict(&response.content, tips, count) {
                TopVerdict::Ids(ids) => ids,
                TopVerdict::Invalid(reason) => {
                    warn!("Top-tips verdict rejected ({}); keeping original order", reason);
                    first_ids(tips, count)
                }
            },
            Err(e) => {
                warn!("Top-tips call failed ({:#}); keeping original order", e);
                first_ids(tips, count)
            }
        }
    }
}

fn first_ids(tips: &[ExtractedTip], count: usize) -> Vec<String> {
    tips.iter().take(count).map(|t| t.id.clone()).collect()
}
