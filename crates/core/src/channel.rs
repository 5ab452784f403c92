//! MessagingPlatform trait: the abstraction over chat platforms.
//!
//! A platform hosts *destinations* (channels, direct conversations) and, at
//! each destination, a limited number of named *delivery handles* (webhooks)
//! through which text can be posted under a persona's name and avatar.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PlatformError;

/// Identifier of a messaging context (channel or direct conversation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DestinationId(pub String);

impl DestinationId {
    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for DestinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Platform identifier of a delivery handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub String);

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live, named messaging endpoint at one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryHandle {
    pub id: HandleId,
    pub destination: DestinationId,

    /// Display name messages are posted under
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// A message posted through a delivery handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: String,
    pub destination: DestinationId,
    pub handle_id: HandleId,

    /// Name the message was posted under
    pub author_name: String,

    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Records that know who authored them.
pub trait HasAuthor {
    /// Platform identifier of the author.
    fn author_id(&self) -> &str;

    /// Human-readable author name.
    fn author_name(&self) -> &str;
}

/// Records that carry text content.
pub trait HasContent {
    fn content(&self) -> &str;
}

impl HasAuthor for SentMessage {
    fn author_id(&self) -> &str {
        &self.handle_id.0
    }

    fn author_name(&self) -> &str {
        &self.author_name
    }
}

impl HasContent for SentMessage {
    fn content(&self) -> &str {
        &self.content
    }
}

/// The platform capabilities the persona registry consumes.
///
/// Every call may fail with a [`PlatformError`]; adapters translate the
/// SDK's own errors. `HandleNotFound` must be used when the platform reports
/// that a handle was deleted upstream.
#[async_trait]
pub trait MessagingPlatform: Send + Sync {
    /// Human-readable platform name (e.g., "discord").
    fn name(&self) -> &str;

    /// List all live handles at a destination.
    async fn list_handles(
        &self,
        destination: &DestinationId,
    ) -> std::result::Result<Vec<DeliveryHandle>, PlatformError>;

    /// Create a new handle at a destination.
    async fn create_handle(
        &self,
        destination: &DestinationId,
        name: &str,
        avatar_url: Option<&str>,
    ) -> std::result::Result<DeliveryHandle, PlatformError>;

    /// Delete a handle, recording `reason` in the platform audit log.
    async fn delete_handle(
        &self,
        handle: &DeliveryHandle,
        reason: &str,
    ) -> std::result::Result<(), PlatformError>;

    /// Cheap no-op call proving the handle still exists.
    async fn validate_handle(
        &self,
        handle: &DeliveryHandle,
    ) -> std::result::Result<(), PlatformError>;

    /// Post content through a handle.
    async fn send_via(
        &self,
        handle: &DeliveryHandle,
        content: &str,
    ) -> std::result::Result<SentMessage, PlatformError>;

    /// Replace the content of a message previously posted through a handle.
    async fn edit_via(
        &self,
        handle: &DeliveryHandle,
        message_id: &str,
        content: &str,
    ) -> std::result::Result<SentMessage, PlatformError>;
}
