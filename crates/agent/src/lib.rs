//! Prompt assembly: the part of Chorus that talks the backend's language.
//!
//! Given an ordered conversation history and an optional persona, the
//! [`PromptAssembler`] produces:
//!
//! 1. **System instruction** (persona directive + caller note + formatting guide + persona tags)
//! 2. **Pruned history** (newest turns kept until the token budget runs out)
//! 3. **Safety profile** (category/threshold table selected by mode)

pub mod context;

pub use context::{HeuristicTokenCounter, PromptAssembler, estimate_tokens, safety_profile};
