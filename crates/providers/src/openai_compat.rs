//! OpenAI-compatible backend implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/v1/chat/completions`.
//!
//! The assembled safety profile has no equivalent in this API and is not
//! sent; content filtering is detected from `finish_reason`.

use async_trait::async_trait;
use chorus_core::error::BackendError;
use chorus_core::{AssembledPrompt, Backend, Generation, PersonaDefinition, Role, SafetyMode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An OpenAI-compatible chat completions backend.
pub struct OpenAiCompatBackend {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// Create a new OpenAI-compatible backend.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        }
    }

    /// Create an OpenAI backend (convenience constructor).
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key, model)
    }

    /// Create an Ollama backend (convenience constructor).
    pub fn ollama(base_url: Option<&str>, model: impl Into<String>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
            model,
        )
    }

    /// Convert the assembled prompt to OpenAI API messages.
    fn to_api_messages(prompt: &AssembledPrompt) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(prompt.turns.len() + 1);
        messages.push(ApiMessage {
            role: "system".into(),
            content: Some(prompt.system_instruction.clone()),
            name: None,
        });
        messages.extend(prompt.turns.iter().map(|t| ApiMessage {
            role: match t.role {
                Role::User => "user".into(),
                Role::Assistant => "assistant".into(),
                Role::System => "system".into(),
                Role::Function => "function".into(),
            },
            content: Some(t.content.clone()),
            name: t.function_name.clone(),
        }));
        messages
    }

    /// Turn a parsed response into a generation or a categorized failure.
    fn interpret(response: ApiResponse) -> Result<Generation, BackendError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(BackendError::Empty)?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(BackendError::Blocked("content_filter".into()));
        }

        let text = choice.message.content.unwrap_or_default();
        if text.trim().is_empty() {
            return Err(BackendError::Empty);
        }

        let generation = Generation::new(text);
        Ok(match response.model {
            Some(model) => generation.with_model(model),
            None => generation,
        })
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &AssembledPrompt,
        _persona: Option<&PersonaDefinition>,
        mode: SafetyMode,
    ) -> Result<Generation, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(prompt),
            "stream": false,
        });

        debug!(
            backend = %self.name,
            model = %self.model,
            turns = prompt.turns.len(),
            mode = ?mode,
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %error_body, "Backend returned error");
            return Err(BackendError::from_status(status.as_u16(), error_body));
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| {
            BackendError::Server {
                status_code: status.as_u16(),
                message: format!("Failed to parse response: {e}"),
            }
        })?;

        Self::interpret(api_response)
    }

    async fn health_check(&self) -> Result<bool, BackendError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- API wire types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}
