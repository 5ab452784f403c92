//! Persona definitions: the presentational identities replies are delivered under.

use serde::{Deserialize, Serialize};

/// Content safety mode, selecting instruction variants and the safety profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyMode {
    /// Strict filtering
    #[default]
    Sfw,
    /// Permissive filtering
    Nsfw,
}

impl SafetyMode {
    pub fn is_strict(self) -> bool {
        self == SafetyMode::Sfw
    }
}

impl std::str::FromStr for SafetyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sfw" => Ok(Self::Sfw),
            "nsfw" => Ok(Self::Nsfw),
            other => Err(format!("Unknown safety mode: {other}")),
        }
    }
}

/// A named persona: display name, personality text and avatar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaDefinition {
    /// Name shown on delivered messages
    pub display_name: String,

    #[serde(default)]
    pub personality: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub scenario: String,

    /// Avatar URL or local path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl PersonaDefinition {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            personality: String::new(),
            description: String::new(),
            scenario: String::new(),
            avatar: None,
        }
    }

    /// The avatar, but only if it is a URL the platform can fetch.
    pub fn avatar_url(&self) -> Option<&str> {
        self.avatar
            .as_deref()
            .filter(|a| a.starts_with("https://") || a.starts_with("http://"))
    }
}
