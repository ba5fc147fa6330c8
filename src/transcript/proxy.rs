use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::captions::finalize_transcript;
use super::TranscriptSource;
use crate::config::TranscriptConfig;
use crate::error::PipelineError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptRequest<'a> {
    video_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    ok: bool,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Fetches captions through a remote caption proxy service
#[derive(Debug, Clone)]
pub struct ProxyApiSource {
    client: reqwest::Client,
    endpoint: String,
    bearer: Option<String>,
    max_attempts: u32,
    backoff: Duration,
}

impl ProxyApiSource {
    pub fn new(config: &TranscriptConfig) -> Result<Self> {
        let endpoint = config
            .proxy_api_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .ok_or(PipelineError::MissingCredential("YT_PROXY_URL"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bearer: config.proxy_api_bearer.clone(),
            max_attempts: config.proxy_api_max_attempts.max(1),
            backoff: Duration::from_millis(config.proxy_api_backoff_ms),
        })
    }

    async fn request(&self, video_id: &str) -> Result<Option<String>> {
        let url = format!("{}/transcript", self.endpoint);

        for attempt in 0..self.max_attempts {
            let mut builder = self.client.post(&url).json(&TranscriptRequest { video_id });
            if let Some(token) = &self.bearer {
                builder = builder.bearer_auth(token);
            }
            let response = builder.send().await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt + 1 < self.max_attempts {
                    let delay = self.backoff * (attempt + 1);
                    warn!("Caption proxy rate limited {}; retrying in {:?}", video_id, delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
                debug!("Caption proxy still rate limited for {}; giving up", video_id);
                return Ok(None);
            }

            if !response.status().is_success() {
                debug!("Caption proxy returned {} for {}", response.status(), video_id);
                return Ok(None);
            }

            let body: TranscriptResponse = response.json().await?;
            if !body.ok {
                debug!(
                    "Caption proxy has no transcript for {}: {}",
                    video_id,
                    body.error.as_deref().unwrap_or("unknown error")
                );
                return Ok(None);
            }

            return Ok(body.transcript.as_deref().and_then(finalize_transcript));
        }

        Ok(None)
    }
}

#[async_trait]
impl TranscriptSource for ProxyApiSource {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn fetch(&self, video_id: &str) -> Option<String> {
        match self.request(video_id).await {
            Ok(transcript) => transcript,
            Err(e) => {
                debug!("Caption proxy request failed for {}: {:#}", video_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GOOD: &str = "Skip the Fantasmic dinner package and grab a seat thirty minutes early instead.";

    fn config(url: String) -> TranscriptConfig {
        TranscriptConfig {
            proxy_api_url: Some(url),
            proxy_api_bearer: Some("secret".to_string()),
            proxy_api_backoff_ms: 10,
            ..TranscriptConfig::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcript"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({ "videoId": "abc" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "transcript": GOOD })))
            .expect(1)
            .mount(&server)
            .await;

        let source = ProxyApiSource::new(&config(server.uri())).unwrap();
        assert_eq!(source.fetch("abc").await.as_deref(), Some(GOOD));
    }

    #[tokio::test]
    async fn test_configured_proxy_source_is_built() {
        let cfg = TranscriptConfig {
            source: crate::config::TranscriptSourceKind::Proxy,
            ..config("http://127.0.0.1:9".to_string())
        };
        let source = crate::transcript::build_transcript_source(&cfg).await.unwrap();
        assert_eq!(source.name(), "proxy");
    }

    #[tokio::test]
    async fn test_rate_limit_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcript"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/transcript"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "transcript": GOOD })))
            .expect(1)
            .mount(&server)
            .await;

        let source = ProxyApiSource::new(&config(server.uri())).unwrap();
        assert_eq!(source.fetch("abc").await.as_deref(), Some(GOOD));
    }

    #[tokio::test]
    async fn test_persistent_rate_limit_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let source = ProxyApiSource::new(&config(server.uri())).unwrap();
        assert_eq!(source.fetch("abc").await, None);
    }

    #[tokio::test]
    async fn test_not_ok_and_short_transcripts_are_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({ "videoId": "nocaps" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": false, "error": "no captions" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_json(json!({ "videoId": "short" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "transcript": "[Music]" })))
            .mount(&server)
            .await;

        let source = ProxyApiSource::new(&config(server.uri())).unwrap();
        assert_eq!(source.fetch("nocaps").await, None);
        assert_eq!(source.fetch("short").await, None);
    }

    #[test]
    fn test_missing_url_is_fatal() {
        let err = ProxyApiSource::new(&TranscriptConfig::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingCredential("YT_PROXY_URL"))
        ));
    }
}
