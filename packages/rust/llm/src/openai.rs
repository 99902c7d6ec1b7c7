//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use copilot_shared::{AppConfig, CopilotError, Result, resolve_api_key};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{Generation, GenerationBackend, Sampling};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("copilot/", env!("CARGO_PKG_VERSION"));

/// Connection settings shared by every cached client.
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub model: String,
    /// API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub timeout_secs: u64,
}

impl OpenAiSettings {
    /// Resolve settings from config, reading the API key from the configured env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            api_key: resolve_api_key(config)?,
            model: config.llm.model.clone(),
            base_url: config.llm.base_url.clone(),
            timeout_secs: config.llm.request_timeout_secs,
        })
    }
}

/// One client per sampling configuration; cheap to share behind an `Arc`.
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    sampling: Sampling,
}

impl OpenAiClient {
    pub fn new(settings: OpenAiSettings, sampling: Sampling) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| CopilotError::Backend(format!("client build: {e}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key: settings.api_key,
            model: settings.model,
            sampling,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl GenerationBackend for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model, temperature = self.sampling.temperature))]
    async fn invoke(&self, system: &str, user: &str) -> Result<Generation> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.sampling.temperature,
            max_tokens: self.sampling.max_output_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| CopilotError::Backend(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CopilotError::Backend(format!(
                "authentication failed (HTTP {status}); check the API key"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(CopilotError::Backend(format!("HTTP {status}: {snippet}")));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CopilotError::Backend(format!("invalid response body: {e}")))?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CopilotError::Backend("response contained no message content".into()))?;

        let (input_tokens, output_tokens) = body
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));

        debug!(input_tokens, output_tokens, chars = text.len(), "completion received");

        Ok(Generation {
            text: text.trim().to_string(),
            input_tokens,
            output_tokens,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
