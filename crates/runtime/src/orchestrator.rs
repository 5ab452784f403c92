//! Orchestrator: the caller-facing request surface.
//!
//! Each request passes admission for its caller, waits for a work-queue slot,
//! has its prompt assembled within the backend's token budget, is sent to the
//! backend under a timeout, and is delivered through the persona's handle.
//! Denied requests are deferred and replayed through the same pipeline once
//! the caller's window resets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chorus_agent::PromptAssembler;
use chorus_channels::PersonaChannelRegistry;
use chorus_config::AppConfig;
use chorus_core::error::{BackendError, DeliveryError};
use chorus_core::{
    Backend, ConversationTurn, DestinationId, HasAuthor, MessagingPlatform, PersonaDefinition,
    SafetyMode, SentMessage,
};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionController, AdmissionLimits};
use crate::work_queue::{QueueError, TaskHandle, WorkQueue};

/// The human who triggered a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Stable identity used for admission
    pub id: String,
    /// Name shown to the model and in attribution markers
    pub display_name: String,
}

impl HasAuthor for Caller {
    fn author_id(&self) -> &str {
        &self.id
    }

    fn author_name(&self) -> &str {
        &self.display_name
    }
}

impl Caller {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// One generation request.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub destination: DestinationId,
    pub persona: Option<PersonaDefinition>,
    pub caller: Caller,
    /// Conversation history, oldest first
    pub history: Vec<ConversationTurn>,
    pub mode: SafetyMode,
    /// Earlier persona message to replace instead of posting a new one
    pub replaces: Option<SentMessage>,
}

impl InferenceRequest {
    pub fn new(destination: DestinationId, caller: Caller, history: Vec<ConversationTurn>) -> Self {
        Self {
            destination,
            persona: None,
            caller,
            history,
            mode: SafetyMode::default(),
            replaces: None,
        }
    }

    pub fn with_persona(mut self, persona: PersonaDefinition) -> Self {
        self.persona = Some(persona);
        self
    }

    pub fn with_mode(mut self, mode: SafetyMode) -> Self {
        self.mode = mode;
        self
    }

    /// Reroll: edit `message` in place, keeping its original requester.
    pub fn replacing(mut self, message: SentMessage) -> Self {
        self.replaces = Some(message);
        self
    }
}

/// Why a reply goes back directly instead of through a persona handle.
#[derive(Debug, Clone)]
pub enum FallbackReason {
    NoPersona,
    DeliveryFailed(DeliveryError),
}

/// Settled result of a deferred request.
pub type PendingOutcome = TaskHandle<Result<DeliveryOutcome, OrchestratorError>>;

/// What happened to a request.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Posted (or edited) through the persona's handle.
    Delivered { message: SentMessage, persona: String },
    /// The caller should post `text` itself.
    ReplyDirectly { text: String, reason: FallbackReason },
    /// Admission denied; `pending` settles when the request is replayed.
    /// `retry_after` estimates the wait, including any backlog ahead of it.
    Deferred {
        retry_after: Duration,
        pending: PendingOutcome,
    },
}

/// Coarse failure categories for user-facing notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ClientError,
    BackendUnavailable,
    Blocked,
    QuotaExhausted,
    Internal,
}

impl ErrorKind {
    /// Short message suitable for an auto-expiring notice.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::ClientError => "The model rejected this request.",
            Self::BackendUnavailable => "The model is unavailable right now. Try again later.",
            Self::Blocked => "The response was blocked by the content filter.",
            Self::QuotaExhausted => "This channel has no room for another persona webhook.",
            Self::Internal => "Something went wrong while generating a reply.",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Backend(BackendError::Client { .. }) => ErrorKind::ClientError,
            Self::Backend(e) if e.is_content_filtered() => ErrorKind::Blocked,
            Self::Backend(_) => ErrorKind::BackendUnavailable,
            Self::Delivery(DeliveryError::QuotaExhausted { .. }) => ErrorKind::QuotaExhausted,
            Self::Delivery(_) | Self::Queue(_) => ErrorKind::Internal,
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}

/// In-process request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub admitted: u64,
    pub deferred: u64,
    pub completed: u64,
    pub failed: u64,
    pub running: usize,
    pub pending: usize,
}

#[derive(Default)]
struct Counters {
    admitted: AtomicU64,
    deferred: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Everything after admission: assemble, generate, deliver.
struct Pipeline {
    assembler: PromptAssembler,
    backend: Arc<dyn Backend>,
    registry: Arc<PersonaChannelRegistry>,
    backend_timeout: Duration,
    counters: Counters,
}

impl Pipeline {
    async fn run(&self, request: InferenceRequest) -> Result<DeliveryOutcome, OrchestratorError> {
        let InferenceRequest {
            destination,
            persona,
            caller,
            history,
            mode,
            replaces,
        } = request;

        let prompt = self
            .assembler
            .assemble(&history, &caller.display_name, persona.as_ref(), mode);
        debug!(
            destination = %destination,
            caller = %caller.id,
            tokens = prompt.total_tokens(),
            dropped = prompt.dropped_turns,
            "Prompt assembled"
        );

        let generation = tokio::time::timeout(
            self.backend_timeout,
            self.backend.generate(&prompt, persona.as_ref(), mode),
        )
        .await
        .map_err(|_| BackendError::Timeout {
            timeout_secs: self.backend_timeout.as_secs(),
        })??;
        let text = generation.into_text();

        let Some(persona) = persona else {
            return Ok(DeliveryOutcome::ReplyDirectly {
                text,
                reason: FallbackReason::NoPersona,
            });
        };

        if let Some(prior) = replaces {
            let message = self
                .registry
                .edit(&destination, &persona, &prior.id, &prior, &text, &caller)
                .await?;
            return Ok(DeliveryOutcome::Delivered {
                message,
                persona: persona.display_name,
            });
        }

        match self
            .registry
            .send(&destination, &persona, &text, &caller.display_name)
            .await
        {
            Ok(message) => Ok(DeliveryOutcome::Delivered {
                message,
                persona: persona.display_name,
            }),
            Err(e) => {
                warn!(
                    destination = %destination,
                    persona = %persona.display_name,
                    error = %e,
                    "Persona delivery failed, falling back to direct reply"
                );
                Ok(DeliveryOutcome::ReplyDirectly {
                    text,
                    reason: FallbackReason::DeliveryFailed(e),
                })
            }
        }
    }

    fn record(&self, result: &Result<DeliveryOutcome, OrchestratorError>) {
        match result {
            Ok(_) => self.counters.completed.fetch_add(1, Ordering::Relaxed),
            Err(e) => {
                warn!(error = %e, kind = ?e.kind(), "Request failed");
                self.counters.failed.fetch_add(1, Ordering::Relaxed)
            }
        };
    }
}

/// Run a request through the queue and flatten the queue's own failure.
async fn execute(
    queue: WorkQueue,
    pipeline: Arc<Pipeline>,
    request: InferenceRequest,
) -> Result<DeliveryOutcome, OrchestratorError> {
    let worker = Arc::clone(&pipeline);
    let result = match queue.submit(async move { worker.run(request).await }).await {
        Ok(result) => result,
        Err(e) => Err(e.into()),
    };
    pipeline.record(&result);
    result
}

/// Composes admission, the work queue, prompt assembly, the backend and
/// persona delivery.
pub struct Orchestrator {
    admission: Arc<AdmissionController>,
    queue: WorkQueue,
    pipeline: Arc<Pipeline>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: Arc<PersonaChannelRegistry>,
        assembler: PromptAssembler,
        limits: AdmissionLimits,
        parallelism: usize,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            admission: Arc::new(AdmissionController::new(limits)),
            queue: WorkQueue::new(parallelism),
            pipeline: Arc::new(Pipeline {
                assembler,
                backend,
                registry,
                backend_timeout,
                counters: Counters::default(),
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Build from configuration and start the admission sweeper.
    /// Must be called from within a Tokio runtime.
    pub fn from_config(
        config: &AppConfig,
        backend: Arc<dyn Backend>,
        platform: Arc<dyn MessagingPlatform>,
    ) -> Self {
        let backend_config = config.backend();
        let registry = Arc::new(PersonaChannelRegistry::new(
            platform,
            config.personas.handle_ceiling,
        ));
        let orchestrator = Self::new(
            backend,
            registry,
            PromptAssembler::with_heuristic_counter(backend_config.token_budget),
            AdmissionLimits::from_config(&config.admission),
            config.queue.parallelism,
            backend_config.timeout(),
        );
        orchestrator.start_sweeper(Duration::from_secs(config.admission.sweep_interval_secs));
        info!(
            backend = %orchestrator.pipeline.backend.name(),
            parallelism = orchestrator.queue.parallelism(),
            token_budget = backend_config.token_budget,
            "Orchestrator ready"
        );
        orchestrator
    }

    /// Periodically drop stale admission windows. Replaces any running sweeper.
    pub fn start_sweeper(&self, every: Duration) {
        let handle = self.admission.spawn_sweeper(every);
        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Submit a request.
    ///
    /// Admitted requests are run to completion before this returns. Denied
    /// requests return [`DeliveryOutcome::Deferred`] immediately.
    pub async fn submit(
        &self,
        request: InferenceRequest,
    ) -> Result<DeliveryOutcome, OrchestratorError> {
        let identity = request.caller.id.clone();
        let counters = &self.pipeline.counters;

        if self.admission.try_admit(&identity) {
            counters.admitted.fetch_add(1, Ordering::Relaxed);
            return execute(self.queue.clone(), Arc::clone(&self.pipeline), request).await;
        }

        counters.deferred.fetch_add(1, Ordering::Relaxed);
        let (settle, pending) = TaskHandle::pair();
        let queue = self.queue.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let retry_after = self.admission.defer_until_reset(&identity, async move {
            let result = execute(queue, pipeline, request).await;
            // Nobody may be waiting on a deferred request
            let _ = settle.send(Ok(result));
        });

        Ok(DeliveryOutcome::Deferred {
            retry_after,
            pending,
        })
    }

    pub fn registry(&self) -> &Arc<PersonaChannelRegistry> {
        &self.pipeline.registry
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn stats(&self) -> OrchestratorStats {
        let counters = &self.pipeline.counters;
        OrchestratorStats {
            admitted: counters.admitted.load(Ordering::Relaxed),
            deferred: counters.deferred.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            running: self.queue.running(),
            pending: self.queue.pending(),
        }
    }

    /// Stop the sweeper and wait for queued work to finish. Deferred
    /// requests that have not been replayed yet are not waited for.
    pub async fn shutdown(&self) {
        if let Some(sweeper) = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            sweeper.abort();
        }
        self.queue.wait_idle().await;
        info!(stats = ?self.stats(), "Orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chorus_channels::InMemoryPlatform;
    use chorus_core::{AssembledPrompt, Generation};

    struct Scripted(Result<&'static str, BackendError>);

    #[async_trait]
    impl Backend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _prompt: &AssembledPrompt,
            _persona: Option<&PersonaDefinition>,
            _mode: SafetyMode,
        ) -> Result<Generation, BackendError> {
            self.0.clone().map(Generation::new)
        }
    }

    struct Slow;

    #[async_trait]
    impl Backend for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(
            &self,
            _prompt: &AssembledPrompt,
            _persona: Option<&PersonaDefinition>,
            _mode: SafetyMode,
        ) -> Result<Generation, BackendError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(Generation::new("late"))
        }
    }

    fn orchestrator(backend: Arc<dyn Backend>, platform: Arc<InMemoryPlatform>) -> Orchestrator {
        Orchestrator::new(
            backend,
            Arc::new(PersonaChannelRegistry::new(platform, 15)),
            PromptAssembler::with_heuristic_counter(4096),
            AdmissionLimits::new(Duration::from_secs(60), 10),
            2,
            Duration::from_secs(30),
        )
    }

    fn request() -> InferenceRequest {
        InferenceRequest::new(
            DestinationId::from("general"),
            Caller::new("u-1", "alice"),
            vec![ConversationTurn::user("alice", "Hi!")],
        )
    }

    #[tokio::test]
    async fn persona_reply_is_delivered() {
        let platform = Arc::new(InMemoryPlatform::new());
        let orch = orchestrator(Arc::new(Scripted(Ok("Hello, alice."))), platform.clone());

        let outcome = orch
            .submit(request().with_persona(PersonaDefinition::new("Mira")))
            .await
            .unwrap();

        let DeliveryOutcome::Delivered { message, persona } = outcome else {
            panic!("expected delivery");
        };
        assert_eq!(persona, "Mira");
        assert_eq!(message.content, "Hello, alice.\n-# Requested by alice");
        assert_eq!(orch.stats().completed, 1);
    }

    #[tokio::test]
    async fn no_persona_replies_directly() {
        let platform = Arc::new(InMemoryPlatform::new());
        let orch = orchestrator(Arc::new(Scripted(Ok("plain"))), platform.clone());

        let outcome = orch.submit(request()).await.unwrap();

        assert!(matches!(
            outcome,
            DeliveryOutcome::ReplyDirectly { ref text, reason: FallbackReason::NoPersona } if text == "plain"
        ));
        assert!(platform.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_falls_back_to_direct_reply() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.fail_creates(true);
        let orch = orchestrator(Arc::new(Scripted(Ok("text"))), platform);

        let outcome = orch
            .submit(request().with_persona(PersonaDefinition::new("Mira")))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            DeliveryOutcome::ReplyDirectly {
                reason: FallbackReason::DeliveryFailed(DeliveryError::Platform(_)),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn backend_errors_are_categorized() {
        let cases = [
            (BackendError::from_status(400, "bad"), ErrorKind::ClientError),
            (BackendError::from_status(503, "down"), ErrorKind::BackendUnavailable),
            (BackendError::Blocked("SAFETY".into()), ErrorKind::Blocked),
            (BackendError::Empty, ErrorKind::Blocked),
        ];

        for (error, kind) in cases {
            let platform = Arc::new(InMemoryPlatform::new());
            let orch = orchestrator(Arc::new(Scripted(Err(error))), platform);
            let err = orch.submit(request()).await.unwrap_err();
            assert_eq!(err.kind(), kind);
            assert!(!err.user_message().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let platform = Arc::new(InMemoryPlatform::new());
        let orch = orchestrator(Arc::new(Slow), platform);

        let err = orch.submit(request()).await.unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Backend(BackendError::Timeout { timeout_secs: 30 })
        ));
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
        assert_eq!(orch.stats().failed, 1);
    }

    #[tokio::test]
    async fn reroll_edits_the_prior_message() {
        let platform = Arc::new(InMemoryPlatform::new());
        let orch = orchestrator(Arc::new(Scripted(Ok("again"))), platform.clone());
        let persona = PersonaDefinition::new("Mira");

        let DeliveryOutcome::Delivered { message, .. } =
            orch.submit(request().with_persona(persona.clone())).await.unwrap()
        else {
            panic!("expected delivery");
        };

        let mut reroll = request().with_persona(persona).replacing(message.clone());
        reroll.caller = Caller::new("u-2", "bob");
        let DeliveryOutcome::Delivered { message: edited, .. } = orch.submit(reroll).await.unwrap()
        else {
            panic!("expected delivery");
        };

        assert_eq!(edited.id, message.id);
        assert!(edited.content.ends_with("Requested by alice"));
        assert_eq!(platform.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_waits_for_idle_queue() {
        let platform = Arc::new(InMemoryPlatform::new());
        let orch = orchestrator(Arc::new(Scripted(Ok("ok"))), platform);
        orch.start_sweeper(Duration::from_secs(300));

        orch.submit(request()).await.unwrap();
        orch.shutdown().await;

        let stats = orch.stats();
        assert_eq!((stats.running, stats.pending), (0, 0));
        assert_eq!(stats.admitted, 1);
    }
}
