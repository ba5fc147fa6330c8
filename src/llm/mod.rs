pub mod providers;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::PipelineError;

/// LLM provider types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LLMProvider {
    LMStudio,
    Gemini,
    OpenAI,
}

impl LLMProvider {
    /// Case-insensitive parse of the `LLM_PROVIDER` value
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lmstudio" | "lm-studio" | "local" => Some(LLMProvider::LMStudio),
            "gemini" | "google" => Some(LLMProvider::Gemini),
            "openai" => Some(LLMProvider::OpenAI),
            _ => None,
        }
    }

    /// Environment variable holding this provider's credential
    pub fn credential_var(&self) -> Option<&'static str> {
        match self {
            LLMProvider::LMStudio => None,
            LLMProvider::Gemini => Some("GEMINI_API_KEY"),
            LLMProvider::OpenAI => Some("OPENAI_API_KEY"),
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    /// Base URL override; each provider has its own public default
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Gemini,
            endpoint: None,
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            max_tokens: 8192,
            temperature: 0.2,
            timeout_seconds: 120,
        }
    }
}

/// Chat message for LLM communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Output constraint passed along with a chat request
#[derive(Debug, Clone)]
pub enum ResponseFormat {
    Text,
    /// JSON matching a schema (OpenAPI-style subset understood by every provider)
    JsonSchema {
        name: &'static str,
        schema: serde_json::Value,
    },
}

/// LLM response
#[derive(Debug, Clone)]
pub struct LLMResponse {
    pub content: String,
    pub tokens_used: Option<u32>,
}

/// Trait for LLM providers
#[async_trait]
pub trait LLM: Send + Sync {
    async fn chat(&self, messages: Vec<ChatMessage>, format: &ResponseFormat) -> Result<LLMResponse>;
    async fn is_available(&self) -> bool;
    fn provider_type(&self) -> LLMProvider;
}

/// Create LLM instance based on configuration.
///
/// A hosted provider without its API key is a fatal precondition.
pub fn create_llm(config: &LLMConfig) -> Result<Arc<dyn LLM>> {
    if let Some(var) = config.provider.credential_var() {
        if config.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            return Err(PipelineError::MissingCredential(var).into());
        }
    }

    match config.provider {
        LLMProvider::LMStudio => Ok(Arc::new(providers::LMStudioProvider::new(config.clone())?)),
        LLMProvider::Gemini => Ok(Arc::new(providers::GeminiProvider::new(config.clone())?)),
        LLMProvider::OpenAI => Ok(Arc::new(providers::OpenAIProvider::new(config.clone())?)),
    }
}

/// Strip markdown code fences some models wrap around JSON output
pub fn clean_llm_response(content: &str) -> String {
    let content = content.trim();

    if content.starts_with("```") {
        if let Some(start) = content.find('\n') {
            if let Some(end) = content.rfind("```") {
                if end > start {
                    return content[start + 1..end].trim().to_string();
                }
            }
        }
    }

    content.replace("```", "").trim().to_string()
}
