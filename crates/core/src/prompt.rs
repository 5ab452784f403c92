//! The backend-ready prompt produced by the assembler.

use serde::{Deserialize, Serialize};

use crate::message::{MediaRef, Role};

/// One retained turn, rendered with its speaker prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTurn {
    pub role: Role,

    /// Name the turn is attributed to (speaker or persona)
    pub name: String,

    /// Rendered `"{name}: {text}"` content
    pub content: String,

    /// Token cost of `content`
    pub cost: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,

    /// True for the placeholder inserted by the leading-role fix
    #[serde(default)]
    pub synthetic: bool,
}

/// A harm category / block threshold pair sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

/// Ordered table of safety settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyProfile {
    pub settings: Vec<SafetySetting>,
}

/// The assembled request: system instruction, pruned turns, safety profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledPrompt {
    pub system_instruction: String,

    /// Token cost of `system_instruction`
    pub instruction_tokens: usize,

    /// Retained turns in chronological order
    pub turns: Vec<PromptTurn>,

    pub safety_profile: SafetyProfile,

    /// The budget the prompt was assembled against
    pub budget: usize,

    /// History turns dropped by pruning
    pub dropped_turns: usize,
}

impl AssembledPrompt {
    /// Total tokens: instruction plus retained turns.
    pub fn total_tokens(&self) -> usize {
        self.instruction_tokens + self.turns.iter().map(|t| t.cost).sum::<usize>()
    }
}
