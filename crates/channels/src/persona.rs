//! Persona channel registry: delivery handle lifecycle per (destination, persona).
//!
//! Handles are cached after first use and validated cheaply on reuse. When a
//! destination is at its handle ceiling the oldest live handle is evicted to
//! make room. Creation runs under a per-destination lock, so concurrent
//! requests for the same persona create one handle and concurrent requests
//! for different personas cannot jointly overshoot the ceiling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chorus_core::error::{DeliveryError, PlatformError};
use chorus_core::{
    DeliveryHandle, DestinationId, HasAuthor, HasContent, MessagingPlatform, PersonaDefinition,
    SentMessage,
};
use tracing::{debug, info, warn};

use crate::attribution;

type CacheKey = (DestinationId, String);

/// Caches and manages persona delivery handles on one platform.
pub struct PersonaChannelRegistry {
    platform: Arc<dyn MessagingPlatform>,
    ceiling: usize,
    cache: Mutex<HashMap<CacheKey, DeliveryHandle>>,
    creation_locks: Mutex<HashMap<DestinationId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PersonaChannelRegistry {
    pub fn new(platform: Arc<dyn MessagingPlatform>, ceiling: usize) -> Self {
        Self {
            platform,
            ceiling,
            cache: Mutex::new(HashMap::new()),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn platform(&self) -> &Arc<dyn MessagingPlatform> {
        &self.platform
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Get a live handle for `persona` at `destination`, creating one (and
    /// evicting the oldest handle if the destination is full) when needed.
    pub async fn get_handle(
        &self,
        destination: &DestinationId,
        persona: &PersonaDefinition,
    ) -> Result<DeliveryHandle, DeliveryError> {
        let name = persona.display_name.as_str();

        if let Some(handle) = self.cached(destination, name) {
            match self.platform.validate_handle(&handle).await {
                Ok(()) => return Ok(handle),
                Err(e) => {
                    warn!(destination = %destination, persona = %name, error = %e, "Cached handle failed validation");
                    self.forget(&handle);
                }
            }
        }

        let lock = self.creation_lock(destination);
        let result = {
            let _guard = lock.lock().await;
            self.resolve_locked(destination, persona).await
        };
        self.release_creation_lock(destination, lock);
        result
    }

    /// Reuse, or make room for and create, a handle. Runs under the
    /// destination's creation lock.
    async fn resolve_locked(
        &self,
        destination: &DestinationId,
        persona: &PersonaDefinition,
    ) -> Result<DeliveryHandle, DeliveryError> {
        let name = persona.display_name.as_str();

        // Another request may have created it while we waited
        if let Some(handle) = self.cached(destination, name) {
            return Ok(handle);
        }

        let mut live = self.platform.list_handles(destination).await?;
        if let Some(existing) = live.iter().find(|h| h.name == name) {
            debug!(destination = %destination, persona = %name, "Reusing existing handle");
            self.remember(destination, name, existing.clone());
            return Ok(existing.clone());
        }

        if live.len() >= self.ceiling {
            if let Some(oldest) = live.iter().min_by_key(|h| h.created_at).cloned() {
                info!(
                    destination = %destination,
                    evicted = %oldest.name,
                    live = live.len(),
                    "Handle ceiling reached, evicting oldest handle"
                );
                let reason = format!("Making room for persona {name}");
                match self.platform.delete_handle(&oldest, &reason).await {
                    Ok(()) => self.forget(&oldest),
                    Err(e) => warn!(destination = %destination, error = %e, "Failed to evict handle"),
                }
            }

            live = self.platform.list_handles(destination).await?;
            if live.len() >= self.ceiling {
                warn!(destination = %destination, persona = %name, "Handle quota exhausted");
                return Err(DeliveryError::QuotaExhausted {
                    destination: destination.0.clone(),
                    ceiling: self.ceiling,
                });
            }
        }

        let handle = self
            .platform
            .create_handle(destination, name, persona.avatar_url())
            .await?;
        info!(destination = %destination, persona = %name, handle = %handle.id, "Created delivery handle");
        self.remember(destination, name, handle.clone());
        Ok(handle)
    }

    /// Post `body` as `persona`, attributed to `requester`.
    pub async fn send(
        &self,
        destination: &DestinationId,
        persona: &PersonaDefinition,
        body: &str,
        requester: &str,
    ) -> Result<SentMessage, DeliveryError> {
        let handle = self.get_handle(destination, persona).await?;
        let content = attribution::compose(body, requester);
        self.platform
            .send_via(&handle, &content)
            .await
            .map_err(|e| self.on_platform_error(&handle, e))
    }

    /// Replace the content of an earlier persona message (edit or reroll).
    ///
    /// The requester recorded in `prior` is kept; `caller` is used only when
    /// the prior message carries no attribution.
    pub async fn edit(
        &self,
        destination: &DestinationId,
        persona: &PersonaDefinition,
        message_id: &str,
        prior: &(dyn HasContent + Sync),
        body: &str,
        caller: &(dyn HasAuthor + Sync),
    ) -> Result<SentMessage, DeliveryError> {
        let handle = self.get_handle(destination, persona).await?;
        let requester = attribution::resolve_requester(Some(prior), caller);
        let content = attribution::compose(body, &requester);
        self.platform
            .edit_via(&handle, message_id, &content)
            .await
            .map_err(|e| self.on_platform_error(&handle, e))
    }

    /// Drop the cached handle for a persona. Returns whether one was cached.
    pub fn invalidate(&self, destination: &DestinationId, persona_name: &str) -> bool {
        self.lock_cache()
            .remove(&(destination.clone(), persona_name.to_string()))
            .is_some()
    }

    pub fn cached_count(&self) -> usize {
        self.lock_cache().len()
    }

    fn on_platform_error(&self, handle: &DeliveryHandle, error: PlatformError) -> DeliveryError {
        if matches!(error, PlatformError::HandleNotFound(_)) {
            warn!(destination = %handle.destination, handle = %handle.id, "Handle deleted upstream");
            self.forget(handle);
        }
        DeliveryError::Platform(error)
    }

    fn cached(&self, destination: &DestinationId, name: &str) -> Option<DeliveryHandle> {
        self.lock_cache()
            .get(&(destination.clone(), name.to_string()))
            .cloned()
    }

    fn remember(&self, destination: &DestinationId, name: &str, handle: DeliveryHandle) {
        self.lock_cache()
            .insert((destination.clone(), name.to_string()), handle);
    }

    /// Remove every cache entry pointing at `handle`.
    fn forget(&self, handle: &DeliveryHandle) {
        self.lock_cache().retain(|_, cached| cached.id != handle.id);
    }

    fn creation_lock(&self, destination: &DestinationId) -> Arc<tokio::sync::Mutex<()>> {
        self.creation_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(destination.clone())
            .or_default()
            .clone()
    }

    /// Drop the destination's lock entry once no other request holds it.
    fn release_creation_lock(
        &self,
        destination: &DestinationId,
        lock: Arc<tokio::sync::Mutex<()>>,
    ) {
        drop(lock);
        let mut locks = self.creation_locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(destination)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(destination);
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, DeliveryHandle>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryPlatform;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    const CEILING: usize = 15;

    struct Member(&'static str);

    impl HasAuthor for Member {
        fn author_id(&self) -> &str {
            self.0
        }

        fn author_name(&self) -> &str {
            self.0
        }
    }

    fn setup() -> (Arc<InMemoryPlatform>, PersonaChannelRegistry) {
        let platform = Arc::new(InMemoryPlatform::new());
        let registry = PersonaChannelRegistry::new(platform.clone(), CEILING);
        (platform, registry)
    }

    fn fill(platform: &InMemoryPlatform, dest: &DestinationId, count: usize) {
        for i in 0..count {
            // handle-0 is the oldest
            let created_at = Utc::now() - ChronoDuration::minutes((count - i) as i64);
            platform.seed_handle(dest, &format!("handle-{i}"), created_at);
        }
    }

    #[tokio::test]
    async fn full_destination_evicts_exactly_the_oldest() {
        let (platform, registry) = setup();
        let dest = DestinationId::from("general");
        fill(&platform, &dest, CEILING);

        let handle = registry
            .get_handle(&dest, &PersonaDefinition::new("Mira"))
            .await
            .unwrap();

        assert_eq!(handle.name, "Mira");
        let deleted = platform.deleted_handles();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].name, "handle-0");
        assert_eq!(platform.live_handles(&dest).len(), CEILING);
    }

    #[tokio::test]
    async fn cache_hit_only_validates() {
        let (platform, registry) = setup();
        let dest = DestinationId::from("general");
        let persona = PersonaDefinition::new("Mira");

        let first = registry.get_handle(&dest, &persona).await.unwrap();
        let second = registry.get_handle(&dest, &persona).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(platform.create_calls(), 1);
        assert_eq!(platform.list_calls(), 1);
        assert_eq!(platform.validation_calls(), 1);
        assert_eq!(registry.cached_count(), 1);
    }

    #[tokio::test]
    async fn existing_handle_with_persona_name_is_reused() {
        let (platform, registry) = setup();
        let dest = DestinationId::from("general");
        let seeded = platform.seed_handle(&dest, "Mira", Utc::now());

        let handle = registry
            .get_handle(&dest, &PersonaDefinition::new("Mira"))
            .await
            .unwrap();

        assert_eq!(handle.id, seeded.id);
        assert_eq!(platform.create_calls(), 0);
    }

    #[tokio::test]
    async fn upstream_deletion_triggers_recreation() {
        let (platform, registry) = setup();
        let dest = DestinationId::from("general");
        let persona = PersonaDefinition::new("Mira");

        let first = registry.get_handle(&dest, &persona).await.unwrap();
        platform.remove_upstream(&dest, "Mira");
        let second = registry.get_handle(&dest, &persona).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(platform.create_calls(), 2);
    }

    #[tokio::test]
    async fn quota_exhausted_when_eviction_frees_nothing() {
        let (platform, registry) = setup();
        let dest = DestinationId::from("general");
        fill(&platform, &dest, CEILING);
        platform.fail_deletes(true);

        let result = registry
            .get_handle(&dest, &PersonaDefinition::new("Mira"))
            .await;

        assert!(matches!(
            result,
            Err(DeliveryError::QuotaExhausted { ceiling: CEILING, .. })
        ));
        assert_eq!(platform.create_calls(), 0);
        assert_eq!(platform.live_handles(&dest).len(), CEILING);
    }

    #[tokio::test]
    async fn creation_failure_surfaces_as_platform_error() {
        let (platform, registry) = setup();
        platform.fail_creates(true);

        let result = registry
            .get_handle(&DestinationId::from("general"), &PersonaDefinition::new("Mira"))
            .await;

        assert!(matches!(result, Err(DeliveryError::Platform(_))));
        assert_eq!(registry.cached_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_create_one_handle() {
        let platform =
            Arc::new(InMemoryPlatform::new().with_create_latency(Duration::from_millis(50)));
        let registry = PersonaChannelRegistry::new(platform.clone(), CEILING);
        let dest = DestinationId::from("general");
        let persona = PersonaDefinition::new("Mira");

        let (a, b) = futures::join!(
            registry.get_handle(&dest, &persona),
            registry.get_handle(&dest, &persona)
        );

        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(platform.create_calls(), 1);
        assert_eq!(platform.live_handles(&dest).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_personas_respect_the_ceiling() {
        let platform =
            Arc::new(InMemoryPlatform::new().with_create_latency(Duration::from_millis(50)));
        let registry = PersonaChannelRegistry::new(platform.clone(), CEILING);
        let dest = DestinationId::from("general");
        fill(&platform, &dest, CEILING - 1);

        let mira = PersonaDefinition::new("Mira");
        let orin = PersonaDefinition::new("Orin");
        let (a, b) = futures::join!(
            registry.get_handle(&dest, &mira),
            registry.get_handle(&dest, &orin)
        );

        assert!(a.is_ok() && b.is_ok());
        assert_eq!(platform.live_handles(&dest).len(), CEILING);
        assert_eq!(platform.deleted_handles().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn creation_locks_are_released_after_use() {
        let platform =
            Arc::new(InMemoryPlatform::new().with_create_latency(Duration::from_millis(50)));
        let registry = PersonaChannelRegistry::new(platform.clone(), CEILING);
        let persona = PersonaDefinition::new("Mira");
        let first = DestinationId::from("general");
        let second = DestinationId::from("random");

        let (a, b, c) = futures::join!(
            registry.get_handle(&first, &persona),
            registry.get_handle(&first, &persona),
            registry.get_handle(&second, &persona)
        );

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(platform.create_calls(), 2);
        assert!(registry.creation_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_avatar_paths_are_not_sent() {
        let (_platform, registry) = setup();
        let dest = DestinationId::from("general");

        let mut local = PersonaDefinition::new("Mira");
        local.avatar = Some("avatars/mira.png".into());
        let mut remote = PersonaDefinition::new("Orin");
        remote.avatar = Some("https://cdn.example.com/orin.png".into());

        let local_handle = registry.get_handle(&dest, &local).await.unwrap();
        let remote_handle = registry.get_handle(&dest, &remote).await.unwrap();

        assert_eq!(local_handle.avatar_url, None);
        assert_eq!(
            remote_handle.avatar_url.as_deref(),
            Some("https://cdn.example.com/orin.png")
        );
    }

    #[tokio::test]
    async fn send_attaches_attribution() {
        let (platform, registry) = setup();
        let dest = DestinationId::from("general");

        let sent = registry
            .send(&dest, &PersonaDefinition::new("Mira"), "Hello!", "alice")
            .await
            .unwrap();

        assert_eq!(sent.author_name, "Mira");
        assert_eq!(sent.content, "Hello!\n-# Requested by alice");
        assert_eq!(platform.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn reroll_keeps_original_requester() {
        let (_platform, registry) = setup();
        let dest = DestinationId::from("general");
        let persona = PersonaDefinition::new("Mira");

        let sent = registry.send(&dest, &persona, "First take", "alice").await.unwrap();
        let edited = registry
            .edit(&dest, &persona, &sent.id, &sent, "Second take", &Member("bob"))
            .await
            .unwrap();

        assert_eq!(edited.id, sent.id);
        assert_eq!(edited.content, "Second take\n-# Requested by alice");
    }

    #[tokio::test]
    async fn edit_of_unattributed_message_credits_the_caller() {
        let (platform, registry) = setup();
        let dest = DestinationId::from("general");
        let persona = PersonaDefinition::new("Mira");

        let handle = registry.get_handle(&dest, &persona).await.unwrap();
        let bare = platform.send_via(&handle, "No marker here").await.unwrap();
        let edited = registry
            .edit(&dest, &persona, &bare.id, &bare, "Rewritten", &Member("bob"))
            .await
            .unwrap();

        assert_eq!(edited.content, "Rewritten\n-# Requested by bob");
    }

    #[tokio::test]
    async fn send_through_deleted_handle_invalidates_cache() {
        let (platform, registry) = setup();
        let dest = DestinationId::from("general");
        let persona = PersonaDefinition::new("Mira");

        let handle = registry.get_handle(&dest, &persona).await.unwrap();
        platform.remove_upstream(&dest, "Mira");

        let result = registry
            .platform()
            .send_via(&handle, "hi")
            .await
            .map_err(|e| registry.on_platform_error(&handle, e));

        assert!(matches!(
            result,
            Err(DeliveryError::Platform(PlatformError::HandleNotFound(_)))
        ));
        assert_eq!(registry.cached_count(), 0);
    }

    #[tokio::test]
    async fn invalidate_drops_cache_entry() {
        let (_platform, registry) = setup();
        let dest = DestinationId::from("general");
        registry
            .get_handle(&dest, &PersonaDefinition::new("Mira"))
            .await
            .unwrap();

        assert!(registry.invalidate(&dest, "Mira"));
        assert!(!registry.invalidate(&dest, "Mira"));
        assert_eq!(registry.cached_count(), 0);
    }
}
