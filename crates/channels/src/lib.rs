//! Persona delivery for Chorus.
//!
//! Generated text is posted through platform *delivery handles* (webhooks)
//! named after the persona. Platforms cap live handles per destination, so
//! handles are cached, reused, and evicted oldest-first when the cap is hit.
//!
//! - **PersonaChannelRegistry**: cache + quota-aware handle lifecycle
//! - **Attribution**: "requested by" markers that survive edits and rerolls
//! - **InMemoryPlatform**: in-process platform for the CLI relay and tests

pub mod attribution;
pub mod in_memory;
pub mod persona;

pub use in_memory::InMemoryPlatform;
pub use persona::PersonaChannelRegistry;
