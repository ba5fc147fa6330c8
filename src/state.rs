use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::models::{ProcessedVideoRecord, TipsData, VideosData};

/// `lastUpdated` only moves when content actually changed.
///
/// Returns `now` when `new_item_count > 0`, otherwise the previous value, or
/// `now` when there was no previous value. Both stores use this rule, which
/// keeps "the pipeline ran" separate from "the corpus changed" for the
/// staleness checks downstream.
pub fn resolve_last_updated(
    previous: Option<DateTime<Utc>>,
    new_item_count: usize,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    if new_item_count > 0 {
        now
    } else {
        previous.unwrap_or(now)
    }
}

/// Read a JSON file, returning `None` when it does not exist
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    let value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Serialize fully, write a sibling temp file, then rename over the target.
/// A process killed mid-write leaves the previous file untouched.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T, pretty: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let content = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };

    let tmp_path = tmp_path_for(path);
    fs::write(&tmp_path, content)
        .await
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("failed to replace {}", path.display()))?;

    debug!("💾 Wrote {}", path.display());
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

pub async fn load_videos(path: &Path) -> Result<Option<VideosData>> {
    read_json(path).await
}

pub async fn load_tips(path: &Path) -> Result<Option<TipsData>> {
    read_json(path).await
}

/// Append-only record of every video extraction has been attempted on.
///
/// A record, not the presence of a transcript or of tips, is what keeps a
/// video from being extracted twice.
#[derive(Debug, Clone)]
pub struct ProcessedLedger {
    path: PathBuf,
    records: Vec<ProcessedVideoRecord>,
    index: HashMap<String, usize>,
}

impl ProcessedLedger {
    /// Load the ledger from disk; a missing file is an empty ledger
    pub async fn load(path: PathBuf) -> Result<Self> {
        let records: Vec<ProcessedVideoRecord> = read_json(&path).await?.unwrap_or_default();
        let mut ledger = Self {
            path,
            records: Vec::with_capacity(records.len()),
            index: HashMap::new(),
        };
        for record in records {
            ledger.insert(record);
        }

        info!("📒 Processed ledger loaded with {} videos", ledger.len());
        Ok(ledger)
    }

    /// Load the ledger, seeding it from existing tips when no ledger file exists yet.
    ///
    /// Corpora produced before the ledger existed only tell us which videos
    /// yielded tips; those are the ones we know were already extracted.
    pub async fn load_or_bootstrap(path: PathBuf, tips: Option<&TipsData>) -> Result<Self> {
        let existed = fs::try_exists(&path).await.unwrap_or(false);
        let mut ledger = Self::load(path).await?;

        if !existed {
            if let Some(tips) = tips {
                let now = Utc::now();
                let mut counts: HashMap<&str, usize> = HashMap::new();
                for tip in &tips.tips {
                    *counts.entry(tip.source.video_id.as_str()).or_default() += 1;
                }
                for (video_id, tip_count) in counts {
                    ledger.insert(ProcessedVideoRecord {
                        video_id: video_id.to_string(),
                        processed_at: now,
                        tip_count,
                    });
                }
                if !ledger.is_empty() {
                    warn!(
                        "No processed ledger found; seeded {} videos from existing tips",
                        ledger.len()
                    );
                }
            }
        }

        Ok(ledger)
    }

    pub fn contains(&self, video_id: &str) -> bool {
        self.index.contains_key(video_id)
    }

    pub fn get(&self, video_id: &str) -> Option<&ProcessedVideoRecord> {
        self.index.get(video_id).map(|&i| &self.records[i])
    }

    /// Record an attempt. A second record for the same video is ignored.
    pub fn record(&mut self, video_id: &str, tip_count: usize) -> bool {
        self.insert(ProcessedVideoRecord {
            video_id: video_id.to_string(),
            processed_at: Utc::now(),
            tip_count,
        })
    }

    fn insert(&mut self, record: ProcessedVideoRecord) -> bool {
        if self.index.contains_key(&record.video_id) {
            return false;
        }
        self.index.insert(record.video_id.clone(), self.records.len());
        self.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub async fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.records, true).await
    }
}
