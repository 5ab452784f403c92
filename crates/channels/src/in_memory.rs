//! In-process messaging platform.
//!
//! Implements [`MessagingPlatform`] entirely in memory. The CLI relay uses it
//! to print deliveries; tests use it to seed handles, simulate upstream
//! deletions, inject failures, and count platform calls.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chorus_core::error::PlatformError;
use chorus_core::{DeliveryHandle, DestinationId, HandleId, MessagingPlatform, SentMessage};
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

/// An in-memory messaging platform.
#[derive(Default)]
pub struct InMemoryPlatform {
    handles: Mutex<HashMap<DestinationId, Vec<DeliveryHandle>>>,
    messages: Mutex<Vec<SentMessage>>,
    deleted: Mutex<Vec<DeliveryHandle>>,
    /// Hard limit enforced by the platform itself (`None` = unlimited)
    hard_limit: Option<usize>,
    /// Artificial latency on handle creation, to widen race windows
    create_latency: Option<Duration>,
    fail_create: AtomicBool,
    fail_delete: AtomicBool,
    creates: AtomicUsize,
    lists: AtomicUsize,
    validations: AtomicUsize,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse handle creation past `limit` live handles per destination.
    pub fn with_hard_limit(mut self, limit: usize) -> Self {
        self.hard_limit = Some(limit);
        self
    }

    pub fn with_create_latency(mut self, latency: Duration) -> Self {
        self.create_latency = Some(latency);
        self
    }

    /// Add an existing handle, as if created earlier by anyone.
    pub fn seed_handle(
        &self,
        destination: &DestinationId,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> DeliveryHandle {
        let handle = DeliveryHandle {
            id: HandleId(Uuid::new_v4().to_string()),
            destination: destination.clone(),
            name: name.to_string(),
            avatar_url: None,
            created_at,
        };
        self.lock_handles()
            .entry(destination.clone())
            .or_default()
            .push(handle.clone());
        handle
    }

    /// Delete a handle behind the registry's back.
    pub fn remove_upstream(&self, destination: &DestinationId, name: &str) -> bool {
        let mut handles = self.lock_handles();
        let Some(live) = handles.get_mut(destination) else {
            return false;
        };
        let before = live.len();
        live.retain(|h| h.name != name);
        live.len() != before
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Live handles at a destination.
    pub fn live_handles(&self, destination: &DestinationId) -> Vec<DeliveryHandle> {
        self.lock_handles()
            .get(destination)
            .cloned()
            .unwrap_or_default()
    }

    pub fn deleted_handles(&self) -> Vec<DeliveryHandle> {
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn validation_calls(&self) -> usize {
        self.validations.load(Ordering::SeqCst)
    }

    fn lock_handles(&self) -> std::sync::MutexGuard<'_, HashMap<DestinationId, Vec<DeliveryHandle>>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_live(&self, handle: &DeliveryHandle) -> bool {
        self.lock_handles()
            .get(&handle.destination)
            .is_some_and(|live| live.iter().any(|h| h.id == handle.id))
    }
}

#[async_trait]
impl MessagingPlatform for InMemoryPlatform {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn list_handles(
        &self,
        destination: &DestinationId,
    ) -> Result<Vec<DeliveryHandle>, PlatformError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        Ok(self.live_handles(destination))
    }

    async fn create_handle(
        &self,
        destination: &DestinationId,
        name: &str,
        avatar_url: Option<&str>,
    ) -> Result<DeliveryHandle, PlatformError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.create_latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(PlatformError::Request("handle creation failed".into()));
        }

        let mut handles = self.lock_handles();
        let live = handles.entry(destination.clone()).or_default();
        if self.hard_limit.is_some_and(|limit| live.len() >= limit) {
            return Err(PlatformError::Request(format!(
                "maximum number of handles reached at {destination}"
            )));
        }

        let handle = DeliveryHandle {
            id: HandleId(Uuid::new_v4().to_string()),
            destination: destination.clone(),
            name: name.to_string(),
            avatar_url: avatar_url.map(String::from),
            created_at: Utc::now(),
        };
        live.push(handle.clone());
        debug!(destination = %destination, name, "Created in-memory handle");
        Ok(handle)
    }

    async fn delete_handle(
        &self,
        handle: &DeliveryHandle,
        reason: &str,
    ) -> Result<(), PlatformError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(PlatformError::Forbidden("manage handles".into()));
        }

        let removed = {
            let mut handles = self.lock_handles();
            let live = handles
                .get_mut(&handle.destination)
                .ok_or_else(|| PlatformError::DestinationNotFound(handle.destination.0.clone()))?;
            let before = live.len();
            live.retain(|h| h.id != handle.id);
            live.len() != before
        };

        if !removed {
            return Err(PlatformError::HandleNotFound(handle.id.0.clone()));
        }
        debug!(handle = %handle.id, reason, "Deleted in-memory handle");
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle.clone());
        Ok(())
    }

    async fn validate_handle(&self, handle: &DeliveryHandle) -> Result<(), PlatformError> {
        self.validations.fetch_add(1, Ordering::SeqCst);
        if self.is_live(handle) {
            Ok(())
        } else {
            Err(PlatformError::HandleNotFound(handle.id.0.clone()))
        }
    }

    async fn send_via(
        &self,
        handle: &DeliveryHandle,
        content: &str,
    ) -> Result<SentMessage, PlatformError> {
        if !self.is_live(handle) {
            return Err(PlatformError::HandleNotFound(handle.id.0.clone()));
        }
        let message = SentMessage {
            id: Uuid::new_v4().to_string(),
            destination: handle.destination.clone(),
            handle_id: handle.id.clone(),
            author_name: handle.name.clone(),
            content: content.to_string(),
            sent_at: Utc::now(),
        };
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(message)
    }

    async fn edit_via(
        &self,
        handle: &DeliveryHandle,
        message_id: &str,
        content: &str,
    ) -> Result<SentMessage, PlatformError> {
        if !self.is_live(handle) {
            return Err(PlatformError::HandleNotFound(handle.id.0.clone()));
        }
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let message = messages
            .iter_mut()
            .find(|m| m.id == message_id && m.destination == handle.destination)
            .ok_or_else(|| PlatformError::MessageNotFound(message_id.to_string()))?;
        message.content = content.to_string();
        message.handle_id = handle.id.clone();
        Ok(message.clone())
    }
}
