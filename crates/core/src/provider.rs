//! Backend trait: the abstraction over generative-text services.
//!
//! A Backend takes an assembled prompt and returns generated text.
//! Implementations: OpenAI-compatible endpoints, adapters layered on top of
//! them, and scripted stubs in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::persona::{PersonaDefinition, SafetyMode};
use crate::prompt::AssembledPrompt;

/// A completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    text: String,

    /// Which model actually responded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Generation {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// The generated text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// The core Backend trait.
///
/// The orchestrator calls `generate()` without knowing which service is
/// behind it. Implementations must classify failures into [`BackendError`]
/// so callers can surface categorized notifications.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name (e.g., "openai", "gemini").
    fn name(&self) -> &str;

    /// Generate a reply for the assembled prompt.
    async fn generate(
        &self,
        prompt: &AssembledPrompt,
        persona: Option<&PersonaDefinition>,
        mode: SafetyMode,
    ) -> std::result::Result<Generation, BackendError>;

    /// Can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, BackendError> {
        Ok(true)
    }
}
