use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DiscoveryConfig;
use crate::models::{Channel, Video};
use crate::transcript::captions::decode_entities;

static RE_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<entry>([\s\S]*?)</entry>").expect("entry regex"));
static RE_VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<yt:videoId>([^<]+)</yt:videoId>").expect("video id regex"));
static RE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<title>([^<]+)</title>").expect("title regex"));
static RE_PUBLISHED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<published>([^<]+)</published>").expect("published regex"));
static RE_THUMBNAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<media:thumbnail[^>]+url="([^"]+)""#).expect("thumbnail regex")
});
static RE_DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<media:description>([\s\S]*?)</media:description>").expect("description regex")
});

/// One `<entry>` of a channel feed
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail: String,
}

impl FeedEntry {
    pub fn into_video(self, channel: Channel, transcript: Option<String>) -> Video {
        Video {
            id: self.video_id,
            channel_name: channel,
            title: self.title,
            description: self.description,
            published_at: self.published_at,
            thumbnail: self.thumbnail,
            transcript,
        }
    }
}

fn capture<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
}

/// Fixed-field extraction over `<entry>` blocks. Entries without a video id
/// or title are skipped; a missing publish time falls back to now.
pub fn parse_feed(xml: &str) -> Vec<FeedEntry> {
    RE_ENTRY
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .filter_map(|entry| {
            let entry = entry.as_str();
            let video_id = capture(&RE_VIDEO_ID, entry)?.to_string();
            let title = decode_entities(capture(&RE_TITLE, entry)?);

            let published_at = capture(&RE_PUBLISHED, entry)
                .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);

            let thumbnail = capture(&RE_THUMBNAIL, entry)
                .map(str::to_string)
                .unwrap_or_else(|| format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", video_id));

            let description = capture(&RE_DESCRIPTION, entry)
                .map(decode_entities)
                .unwrap_or_default();

            Some(FeedEntry {
                video_id,
                title,
                description,
                published_at,
                thumbnail,
            })
        })
        .collect()
}

/// Polls channel syndication feeds
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    base_url: Url,
    max_attempts: u32,
    base_delay: Duration,
}

impl FeedClient {
    pub fn new(config: &DiscoveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        let base_url = Url::parse(&config.feed_base_url)
            .with_context(|| format!("invalid feed base url: {}", config.feed_base_url))?;

        Ok(Self {
            client,
            base_url,
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        })
    }

    pub fn feed_url(&self, channel: Channel) -> String {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("channel_id", channel.feed_id());
        url.into()
    }

    /// Fetch one feed, retrying with exponential backoff
    pub async fn fetch_feed(&self, channel: Channel) -> Result<String> {
        let url = self.feed_url(channel);
        let mut attempt = 0;

        loop {
            let result: Result<String> = async {
                let response = self.client.get(&url).send().await?;
                if !response.status().is_success() {
                    return Err(anyhow!("feed returned {}", response.status()));
                }
                Ok(response.text().await?)
            }
            .await;

            match result {
                Ok(body) => return Ok(body),
                Err(e) if attempt + 1 < self.max_attempts => {
                    let delay = self.base_delay * 2u32.pow(attempt);
                    warn!(
                        "Feed fetch for {} failed (attempt {}), retrying in {:?}: {}",
                        channel,
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "feed fetch for {} failed after {} attempts",
                        channel, self.max_attempts
                    )))
                }
            }
        }
    }

    /// Poll every channel concurrently and keep only unseen video ids.
    ///
    /// A channel that fails contributes nothing; the others are unaffected.
    pub async fn discover_new(&self, known_ids: &HashSet<String>) -> Vec<(Channel, FeedEntry)> {
        info!("📡 Fetching {} channel feeds...", Channel::ALL.len());

        let results = join_all(Channel::ALL.iter().map(|&channel| async move {
            (channel, self.fetch_feed(channel).await.map(|xml| parse_feed(&xml)))
        }))
        .await;

        let mut seen: HashSet<String> = HashSet::new();
        let mut new_entries = Vec::new();

        for (channel, result) in results {
            match result {
                Ok(entries) => {
                    let total = entries.len();
                    let fresh: Vec<FeedEntry> = entries
                        .into_iter()
                        .filter(|e| !known_ids.contains(&e.video_id) && seen.insert(e.video_id.clone()))
                        .collect();
                    debug!("{}: {} in feed, {} new", channel, total, fresh.len());
                    new_entries.extend(fresh.into_iter().map(|e| (channel, e)));
                }
                Err(e) => warn!("⚠️  {:#}", e),
            }
        }

        info!("📡 Found {} new videos", new_entries.len());
        new_entries
    }
}
