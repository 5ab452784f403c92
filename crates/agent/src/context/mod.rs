//! Prompt assembly pipeline.
//!
//! | Part | Source | Trim Strategy |
//! |------|--------|---------------|
//! | System instruction | Persona + caller + mode | Never trimmed |
//! | Conversation history | Recent turns | Oldest turns dropped |
//! | Leading placeholder | Synthetic | Only when history starts off a user turn |
//! | Safety profile | Mode | Fixed table |

pub mod assembler;
pub mod instructions;
pub mod safety;
pub mod token;

pub use assembler::PromptAssembler;
pub use safety::safety_profile;
pub use token::{HeuristicTokenCounter, estimate_tokens};
