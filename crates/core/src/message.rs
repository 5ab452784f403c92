//! Conversation turn domain types.
//!
//! These are the value objects that flow into the prompt assembler:
//! Platform history fetch → `ConversationTurn`s → PromptAssembler → Backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human caller
    User,
    /// Text previously produced by the backend (under any persona)
    Assistant,
    /// Out-of-band instructions
    System,
    /// Output of a function invocation
    Function,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Function => "function",
        };
        f.write_str(s)
    }
}

/// A media attachment referenced by a turn (image, file, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// URL of the attachment
    pub url: String,

    /// MIME type, if the platform reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A single turn of conversation history. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Display name of whoever produced the turn
    pub speaker: String,

    /// Role of the turn
    pub role: Role,

    /// The text content
    pub text: String,

    /// When the turn was produced
    pub timestamp: DateTime<Utc>,

    /// Attached media
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,

    /// For function turns, the function that produced the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

impl ConversationTurn {
    fn new(role: Role, speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            function_name: None,
        }
    }

    /// Create a turn authored by a human caller.
    pub fn user(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Role::User, speaker, text)
    }

    /// Create a turn previously produced by the backend.
    pub fn assistant(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, speaker, text)
    }

    /// Create a system turn.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, "system", text)
    }

    /// Create a function output turn.
    pub fn function(name: impl Into<String>, text: impl Into<String>) -> Self {
        let name = name.into();
        let mut turn = Self::new(Role::Function, name.clone(), text);
        turn.function_name = Some(name);
        turn
    }

    /// Attach media references.
    pub fn with_media(mut self, media: Vec<MediaRef>) -> Self {
        self.media = media;
        self
    }

    /// Override the timestamp (history fetched from a platform keeps its own).
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_turn() {
        let turn = ConversationTurn::user("alice", "Hello there");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.speaker, "alice");
        assert!(turn.media.is_empty());
    }

    #[test]
    fn function_turn_records_name() {
        let turn = ConversationTurn::function("dice", "rolled 4");
        assert_eq!(turn.role, Role::Function);
        assert_eq!(turn.function_name.as_deref(), Some("dice"));
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        assert_eq!(Role::Function.to_string(), "function");
    }
}
