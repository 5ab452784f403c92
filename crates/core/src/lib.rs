//! # Chorus Core
//!
//! Domain types, capability traits, and error definitions for the Chorus
//! persona relay. This crate has **zero framework dependencies**. It defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here:
//! - [`Backend`]: the generative-text backend
//! - [`TokenCounter`]: deterministic prompt cost estimation
//! - [`MessagingPlatform`]: persona delivery handles on a chat platform
//!
//! Implementations live in their respective crates, which keeps the
//! orchestration layer testable with in-process stubs.

pub mod channel;
pub mod error;
pub mod message;
pub mod persona;
pub mod prompt;
pub mod provider;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use channel::{
    DeliveryHandle, DestinationId, HandleId, HasAuthor, HasContent, MessagingPlatform, SentMessage,
};
pub use error::{BackendError, DeliveryError, PlatformError};
pub use message::{ConversationTurn, MediaRef, Role};
pub use persona::{PersonaDefinition, SafetyMode};
pub use prompt::{AssembledPrompt, PromptTurn, SafetyProfile, SafetySetting};
pub use provider::{Backend, Generation};
pub use token::TokenCounter;
