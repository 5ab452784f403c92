//! Generative backend implementations for Chorus.
//!
//! All backends implement the `chorus_core::Backend` trait. Adapters such as
//! [`StrictAlternation`] wrap another backend and reshape the assembled
//! prompt for services with stricter turn rules.

pub mod alternation;
pub mod builder;
pub mod openai_compat;

pub use alternation::{StrictAlternation, collapse_alternation};
pub use builder::build_from_config;
pub use openai_compat::OpenAiCompatBackend;
