//! Freshness checks on the published corpus and the deployed copy.
//!
//! Both commands report with exit codes: 0 OK, 1 stale or mismatched,
//! 2 usage or input error.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

const DAY_MS: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Stale,
    Error,
}

impl CheckStatus {
    pub fn exit_code(self) -> u8 {
        match self {
            CheckStatus::Ok => 0,
            CheckStatus::Stale => 1,
            CheckStatus::Error => 2,
        }
    }
}

impl From<CheckStatus> for ExitCode {
    fn from(status: CheckStatus) -> Self {
        ExitCode::from(status.exit_code())
    }
}

/// The only part of a tips file these checks look at
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedStamp {
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub total_tips: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StalenessReport {
    pub age_days: f64,
    pub threshold_days: f64,
    pub stale: bool,
}

/// Age is clamped at zero; stale only when strictly over the threshold
pub fn check_staleness(last_updated: DateTime<Utc>, now: DateTime<Utc>, threshold_days: f64) -> StalenessReport {
    let age_ms = (now - last_updated).num_milliseconds().max(0) as f64;
    StalenessReport {
        age_days: age_ms / DAY_MS,
        threshold_days,
        stale: age_ms > threshold_days * DAY_MS,
    }
}

/// Floor to one decimal place: 2.99 days reads "2.9", never "3"
pub fn format_days(days: f64) -> String {
    let floored = (days * 10.0).floor() / 10.0;
    format!("{}", floored)
}

pub fn validate_threshold(threshold_days: f64) -> Result<f64> {
    if threshold_days.is_finite() && threshold_days >= 0.0 {
        Ok(threshold_days)
    } else {
        Err(anyhow!("invalid threshold: {}", threshold_days))
    }
}

/// Read just the freshness stamp of a tips file
pub async fn read_stamp(path: &Path) -> Result<PublishedStamp> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("missing or invalid \"lastUpdated\" in {}", path.display()))
}

/// `check-staleness`: age of the published corpus, and optionally whether
/// the deployed copy carries the same stamp.
pub async fn run_check_staleness(
    tips_file: &Path,
    dist_file: Option<&Path>,
    threshold_days: f64,
    now: DateTime<Utc>,
) -> CheckStatus {
    let threshold = match validate_threshold(threshold_days) {
        Ok(t) => t,
        Err(e) => {
            error!("{:#}", e);
            return CheckStatus::Error;
        }
    };

    let published = match read_stamp(tips_file).await {
        Ok(stamp) => stamp,
        Err(e) => {
            error!("{:#}", e);
            return CheckStatus::Error;
        }
    };

    let report = check_staleness(published.last_updated, now, threshold);
    if report.stale {
        error!(
            "STALE: tips.json lastUpdated is {} days old (threshold: {} days)",
            format_days(report.age_days),
            threshold
        );
        return CheckStatus::Stale;
    }
    info!(
        "OK: tips.json lastUpdated is {} days old (threshold: {} days)",
        format_days(report.age_days),
        threshold
    );

    if let Some(dist_file) = dist_file {
        let deployed = match read_stamp(dist_file).await {
            Ok(stamp) => stamp,
            Err(e) => {
                error!("{:#}", e);
                return CheckStatus::Error;
            }
        };
        if deployed.last_updated != published.last_updated {
            error!(
                "STALE: {} lastUpdated {} does not match published {}",
                dist_file.display(),
                deployed.last_updated.to_rfc3339(),
                published.last_updated.to_rfc3339()
            );
            return CheckStatus::Stale;
        }
        info!("OK: deployed copy matches published lastUpdated");
    }

    CheckStatus::Ok
}

/// Options for `verify-live`
#[derive(Debug, Clone)]
pub struct LiveCheck {
    pub base_url: String,
    pub max_drift_seconds: i64,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiveStatus {
    Match,
    WithinDrift { drift_seconds: i64 },
    Stale { drift_seconds: i64 },
}

/// Compare the local stamp against the live one
pub fn compare_stamps(local: DateTime<Utc>, live: DateTime<Utc>, max_drift_seconds: i64) -> LiveStatus {
    if local == live {
        return LiveStatus::Match;
    }
    let drift_ms = (local - live).num_milliseconds().abs();
    let drift_seconds = (drift_ms + 500) / 1000;
    if drift_ms <= max_drift_seconds.saturating_mul(1000) {
        LiveStatus::WithinDrift { drift_seconds }
    } else {
        LiveStatus::Stale { drift_seconds }
    }
}

/// `verify-live`: the deployed site serves the same corpus as the local file
pub async fn run_verify_live(tips_file: &Path, check: &LiveCheck) -> CheckStatus {
    if check.max_drift_seconds < 0 {
        error!("[verify-live] invalid max drift: {}", check.max_drift_seconds);
        return CheckStatus::Error;
    }

    let local = match read_stamp(tips_file).await {
        Ok(stamp) => stamp,
        Err(e) => {
            error!("[verify-live] cannot read local tips: {:#}", e);
            return CheckStatus::Error;
        }
    };

    let base = check.base_url.trim_end_matches('/');
    let client = reqwest::Client::new();

    let live_url = format!("{}/tips.json", base);
    let live: Result<PublishedStamp> = async {
        let response = client.get(&live_url).timeout(check.request_timeout).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("{} returned {}", live_url, response.status()));
        }
        Ok(response.json().await?)
    }
    .await;

    let live = match live {
        Ok(stamp) => stamp,
        Err(e) => {
            error!("[verify-live] FAIL: cannot fetch {}: {:#}", live_url, e);
            return CheckStatus::Stale;
        }
    };

    log_health(&client, base, check.health_timeout).await;

    match compare_stamps(local.last_updated, live.last_updated, check.max_drift_seconds) {
        LiveStatus::Match => {
            info!(
                "[verify-live] OK: live matches local ({} tips, updated {})",
                local.total_tips,
                local.last_updated.to_rfc3339()
            );
            CheckStatus::Ok
        }
        LiveStatus::WithinDrift { drift_seconds } => {
            info!(
                "[verify-live] OK: live within tolerance (drift: {}s, max: {}s)",
                drift_seconds, check.max_drift_seconds
            );
            CheckStatus::Ok
        }
        LiveStatus::Stale { drift_seconds } => {
            error!(
                "[verify-live] STALE: local {} ({} tips), live {} ({} tips), drift {}s (max {}s)",
                local.last_updated.to_rfc3339(),
                local.total_tips,
                live.last_updated.to_rfc3339(),
                live.total_tips,
                drift_seconds,
                check.max_drift_seconds
            );
            CheckStatus::Stale
        }
    }
}

async fn log_health(client: &reqwest::Client, base: &str, timeout: Duration) {
    let url = format!("{}/api/health", base);
    let health: Result<Value> = async {
        let response = client.get(&url).timeout(timeout).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("{} returned {}", url, response.status()));
        }
        Ok(response.json().await?)
    }
    .await;

    match health {
        Ok(body) => info!(
            "[verify-live] health: tips={} embeddings={} semantic={}",
            body["tips"], body["embeddingsLoaded"], body["semanticSearch"]
        ),
        Err(e) => warn!("[verify-live] /api/health unreachable: {:#}", e),
    }
}
