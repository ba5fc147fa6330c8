use super::{ChatMessage, LLMConfig, LLMProvider, LLMResponse, ResponseFormat, LLM};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const LMSTUDIO_BASE: &str = "http://localhost:1234/v1";
const OPENAI_BASE: &str = "https://api.openai.com/v1";
const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

fn build_client(config: &LLMConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()?)
}

fn base_url<'a>(config: &'a LLMConfig, default: &'a str) -> &'a str {
    config
        .endpoint
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
}

// OpenAI-compatible chat completions, shared by LMStudio and OpenAI

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    total_tokens: u32,
}

fn openai_response_format(format: &ResponseFormat) -> Option<Value> {
    match format {
        ResponseFormat::Text => None,
        ResponseFormat::JsonSchema { name, schema } => Some(json!({
            "type": "json_schema",
            "json_schema": { "name": name, "schema": schema },
        })),
    }
}

async fn chat_completion(
    client: &reqwest::Client,
    label: &str,
    url: &str,
    api_key: Option<&str>,
    config: &LLMConfig,
    messages: Vec<ChatMessage>,
    format: &ResponseFormat,
) -> Result<LLMResponse> {
    let request = ChatCompletionRequest {
        model: config.model.clone(),
        messages,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        response_format: openai_response_format(format),
    };

    debug!("Sending request to {} at {}", label, url);

    let mut builder = client.post(url).json(&request);
    if let Some(key) = api_key {
        builder = builder.bearer_auth(key);
    }
    let response = builder.send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(anyhow!("{} API error {}: {}", label, status, text));
    }

    let completion: ChatCompletionResponse = response.json().await?;

    let content = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No response from {}", label))?
        .message
        .content;

    Ok(LLMResponse {
        content,
        tokens_used: completion.usage.map(|u| u.total_tokens),
    })
}

/// LMStudio provider implementation
pub struct LMStudioProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

impl LMStudioProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl LLM for LMStudioProvider {
    async fn chat(&self, messages: Vec<ChatMessage>, format: &ResponseFormat) -> Result<LLMResponse> {
        let url = format!("{}/chat/completions", base_url(&self.config, LMSTUDIO_BASE));
        chat_completion(&self.client, "LMStudio", &url, None, &self.config, messages, format).await
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", base_url(&self.config, LMSTUDIO_BASE));
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::LMStudio
    }
}

/// Gemini provider implementation
pub struct GeminiProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(rename = "responseSchema", skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "totalTokenCount")]
    total_token_count: u32,
}

impl GeminiProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(anyhow!("Gemini API key required"));
        }

        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    fn build_request(&self, messages: Vec<ChatMessage>, format: &ResponseFormat) -> GeminiRequest {
        let (system, conversation): (Vec<_>, Vec<_>) =
            messages.into_iter().partition(|m| m.role == "system");

        let system_instruction = (!system.is_empty()).then(|| GeminiContent {
            role: None,
            parts: system.into_iter().map(|m| GeminiPart { text: m.content }).collect(),
        });

        let contents = conversation
            .into_iter()
            .map(|m| GeminiContent {
                role: Some(if m.role == "assistant" { "model".to_string() } else { "user".to_string() }),
                parts: vec![GeminiPart { text: m.content }],
            })
            .collect();

        let (response_mime_type, response_schema) = match format {
            ResponseFormat::Text => (None, None),
            ResponseFormat::JsonSchema { schema, .. } => (Some("application/json"), Some(schema.clone())),
        };

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
                response_mime_type,
                response_schema,
            },
        }
    }
}

#[async_trait]
impl LLM for GeminiProvider {
    async fn chat(&self, messages: Vec<ChatMessage>, format: &ResponseFormat) -> Result<LLMResponse> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow!("Gemini API key not configured"))?;

        let request = self.build_request(messages, format);
        let url = format!(
            "{}/models/{}:generateContent",
            base_url(&self.config, GEMINI_BASE),
            self.config.model
        );

        debug!("Sending request to Gemini API ({})", self.config.model);

        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Gemini API error {}: {}", status, text));
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let content = gemini_response
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .filter(|text| !text.is_empty())
            .ok_or_else(|| anyhow!("No response from Gemini"))?;

        Ok(LLMResponse {
            content,
            tokens_used: gemini_response.usage_metadata.map(|u| u.total_token_count),
        })
    }

    async fn is_available(&self) -> bool {
        let Some(api_key) = &self.config.api_key else {
            return false;
        };
        let url = format!("{}/models", base_url(&self.config, GEMINI_BASE));

        match self.client.get(&url).query(&[("key", api_key)]).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::Gemini
    }
}

/// OpenAI provider implementation
pub struct OpenAIProvider {
    config: LLMConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: LLMConfig) -> Result<Self> {
        if config.api_key.is_none() {
            return Err(anyhow!("OpenAI API key required"));
        }

        let client = build_client(&config)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl LLM for OpenAIProvider {
    async fn chat(&self, messages: Vec<ChatMessage>, format: &ResponseFormat) -> Result<LLMResponse> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("OpenAI API key not configured"))?;

        let url = format!("{}/chat/completions", base_url(&self.config, OPENAI_BASE));
        chat_completion(&self.client, "OpenAI", &url, Some(api_key), &self.config, messages, format)
            .await
    }

    async fn is_available(&self) -> bool {
        let Some(api_key) = &self.config.api_key else {
            return false;
        };
        let url = format!("{}/models", base_url(&self.config, OPENAI_BASE));

        match self.client.get(&url).bearer_auth(api_key).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn provider_type(&self) -> LLMProvider {
        LLMProvider::OpenAI
    }
}
