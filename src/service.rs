//! Lifecycle controller and per-queue operations
//!
//! `SqsService` builds the registries on `init`, starts every consumer, and
//! stops them on `shutdown`. The transitions only go forward:
//!
//! ```text
//! Uninitialized -> Initializing -> Running -> Stopping -> Stopped
//! ```
//!
//! A stopped service cannot be restarted; build a new one instead.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::Serialize;
use tracing::{Instrument, Span, error, info, info_span, warn};

use crate::core::config::SqsOptions;
use crate::core::models::{Message, OutboundMessage, Payload, SendReceipt};
use crate::errors::SqsError;
use crate::handlers::HandlerRegistry;
use crate::queue::{Consumer, Producer, QueueRegistry};
use crate::transport::SharedTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Running,
    Stopping,
    Stopped,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SqsService {
    options: SqsOptions,
    handlers: HandlerRegistry,
    span: Span,
    state: Mutex<LifecycleState>,
    registry: OnceLock<QueueRegistry>,
}

impl SqsService {
    #[must_use]
    pub fn new(options: SqsOptions, handlers: HandlerRegistry) -> Self {
        let span = options
            .span
            .clone()
            .unwrap_or_else(|| info_span!("sqs_service"));
        Self {
            options,
            handlers,
            span,
            state: Mutex::new(LifecycleState::Uninitialized),
            registry: OnceLock::new(),
        }
    }

    /// Resolve options from an async factory (secrets, remote config) first.
    ///
    /// # Errors
    ///
    /// Returns whatever error the factory returns.
    pub async fn from_async_options<F, Fut>(
        factory: F,
        handlers: HandlerRegistry,
    ) -> Result<Self, SqsError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SqsOptions, SqsError>>,
    {
        let options = factory().await?;
        Ok(Self::new(options, handlers))
    }

    #[must_use]
    pub fn options(&self) -> &SqsOptions {
        &self.options
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: LifecycleState) {
        *self.lock_state() = state;
    }

    /// Build producers and consumers, then start every consumer.
    ///
    /// Must run inside a Tokio runtime. The registry is complete before the
    /// first consumer polls.
    ///
    /// # Errors
    ///
    /// Returns [`SqsError::InvalidState`] unless the service is
    /// uninitialized or if `shutdown` ran while it was initializing, or the
    /// first configuration error found. A failed init leaves the service
    /// stopped.
    pub fn init(&self) -> Result<(), SqsError> {
        {
            let mut state = self.lock_state();
            if *state != LifecycleState::Uninitialized {
                return Err(SqsError::InvalidState {
                    expected: LifecycleState::Uninitialized.as_str(),
                    actual: state.as_str(),
                });
            }
            *state = LifecycleState::Initializing;
        }

        let _entered = self.span.enter();
        let registry = match QueueRegistry::build(&self.options, &self.handlers, &self.span) {
            Ok(registry) => registry,
            Err(e) => {
                error!("Failed to build SQS registry: {}", e);
                self.set_state(LifecycleState::Stopped);
                return Err(e);
            }
        };

        // Publish the registry under the state lock so a concurrent shutdown
        // either sees it and stops every consumer, or wins before it exists.
        let registry = {
            let state = self.lock_state();
            if *state != LifecycleState::Initializing {
                warn!(
                    state = %state.as_str(),
                    "Shutdown requested during init; not starting consumers"
                );
                return Err(SqsError::InvalidState {
                    expected: LifecycleState::Initializing.as_str(),
                    actual: state.as_str(),
                });
            }
            self.registry.get_or_init(|| registry)
        };

        if let Err(e) = registry.start_all() {
            error!("Failed to start consumers: {}", e);
            registry.stop_all();
            self.set_state(LifecycleState::Stopped);
            return Err(e);
        }

        let interrupted = {
            let mut state = self.lock_state();
            if *state == LifecycleState::Initializing {
                *state = LifecycleState::Running;
                None
            } else {
                Some(*state)
            }
        };
        if let Some(actual) = interrupted {
            // Consumers latch the stop, so none started after shutdown.
            registry.stop_all();
            return Err(SqsError::InvalidState {
                expected: LifecycleState::Initializing.as_str(),
                actual: actual.as_str(),
            });
        }

        info!(
            consumers = registry.consumer_count(),
            producers = registry.producer_count(),
            "SQS service running"
        );
        Ok(())
    }

    /// Ask every consumer to stop. Returns without waiting for them.
    pub fn shutdown(&self) {
        {
            let mut state = self.lock_state();
            match *state {
                LifecycleState::Stopped | LifecycleState::Stopping => return,
                LifecycleState::Uninitialized => {
                    *state = LifecycleState::Stopped;
                    return;
                }
                LifecycleState::Initializing | LifecycleState::Running => {
                    *state = LifecycleState::Stopping;
                }
            }
        }

        let _entered = self.span.enter();
        if let Some(registry) = self.registry.get() {
            registry.stop_all();
        }
        self.set_state(LifecycleState::Stopped);
        info!("SQS service stopped");
    }

    /// Wait for every consumer's poll loop to exit after `shutdown`.
    pub async fn wait_stopped(&self) {
        if let Some(registry) = self.registry.get() {
            registry.join_all().await;
        }
    }

    #[must_use]
    pub fn registry(&self) -> Option<&QueueRegistry> {
        self.registry.get()
    }

    #[must_use]
    pub fn consumer(&self, name: &str) -> Option<&Arc<Consumer>> {
        self.registry.get().and_then(|r| r.consumer(name))
    }

    #[must_use]
    pub fn producer(&self, name: &str) -> Option<&Arc<Producer>> {
        self.registry.get().and_then(|r| r.producer(name))
    }

    fn require_producer(&self, name: &str) -> Result<&Arc<Producer>, SqsError> {
        self.producer(name)
            .ok_or_else(|| SqsError::ProducerNotFound(name.to_string()))
    }

    fn queue_target(&self, name: &str) -> Result<(&SharedTransport, &str), SqsError> {
        self.registry
            .get()
            .ok_or_else(|| SqsError::QueueNotFound(name.to_string()))?
            .queue_target(name)
    }

    /// Send one message or an ordered batch through the producer of `name`.
    ///
    /// Messages without an id get a UUID; non-string bodies are sent as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`SqsError::ProducerNotFound`] if `name` has no producer, a
    /// serialization error, or the producer's send error.
    pub async fn send<T: Serialize>(
        &self,
        name: &str,
        payload: impl Into<Payload<T>>,
    ) -> Result<Vec<SendReceipt>, SqsError> {
        let producer = self.require_producer(name)?;
        let messages = payload
            .into()
            .into_messages()
            .into_iter()
            .map(Message::prepare)
            .collect::<Result<Vec<OutboundMessage>, _>>()?;

        producer.send(messages).instrument(self.span.clone()).await
    }

    /// # Errors
    ///
    /// Returns [`SqsError::QueueNotFound`] if `name` is neither a consumer nor
    /// a producer, or the transport error.
    pub async fn purge_queue(&self, name: &str) -> Result<(), SqsError> {
        let (transport, queue_url) = self.queue_target(name)?;
        transport
            .purge(queue_url)
            .instrument(self.span.clone())
            .await?;
        info!(parent: &self.span, queue = %name, "Purged queue");
        Ok(())
    }

    /// All attributes of the queue behind `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SqsError::QueueNotFound`] if `name` is neither a consumer nor
    /// a producer, or the transport error.
    pub async fn get_queue_attributes(
        &self,
        name: &str,
    ) -> Result<HashMap<String, String>, SqsError> {
        let (transport, queue_url) = self.queue_target(name)?;
        transport
            .queue_attributes(queue_url)
            .instrument(self.span.clone())
            .await
    }

    /// Pending-send count of the producer of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SqsError::ProducerNotFound`] if `name` has no producer.
    pub fn get_producer_queue_size(&self, name: &str) -> Result<usize, SqsError> {
        Ok(self.require_producer(name)?.queue_size())
    }
}

impl fmt::Debug for SqsService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsService")
            .field("state", &self.state())
            .field("consumers", &self.options.consumers.len())
            .field("producers", &self.options.producers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ConsumerOptions, ProducerOptions};
    use crate::transport::InMemoryTransport;

    fn options() -> SqsOptions {
        SqsOptions::default()
            .sqs(Arc::new(InMemoryTransport::new()))
            .consumer(ConsumerOptions::new("a", "http://local/a").wait_time_seconds(0))
            .producer(ProducerOptions::new("a", "http://local/a"))
    }

    #[tokio::test]
    async fn lifecycle_moves_forward_only() {
        let service = SqsService::new(options(), HandlerRegistry::new());
        assert_eq!(service.state(), LifecycleState::Uninitialized);

        service.init().unwrap();
        assert_eq!(service.state(), LifecycleState::Running);

        let err = service.init().unwrap_err();
        assert!(matches!(err, SqsError::InvalidState { actual: "running", .. }));

        service.shutdown();
        assert_eq!(service.state(), LifecycleState::Stopped);
        service.wait_stopped().await;

        service.shutdown();
        assert_eq!(service.state(), LifecycleState::Stopped);
        assert!(service.init().is_err());
    }

    #[tokio::test]
    async fn failed_init_leaves_service_stopped() {
        let options = options().producer(ProducerOptions::new("a", "http://local/other"));
        let service = SqsService::new(options, HandlerRegistry::new());

        let err = service.init().unwrap_err();
        assert!(matches!(err, SqsError::DuplicateProducer(ref n) if n == "a"));
        assert_eq!(service.state(), LifecycleState::Stopped);
        assert!(service.registry().is_none());
    }

    #[test]
    fn shutdown_before_init_stops() {
        let service = SqsService::new(options(), HandlerRegistry::new());
        service.shutdown();
        assert_eq!(service.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn operations_before_init_report_unregistered_names() {
        let service = SqsService::new(options(), HandlerRegistry::new());
        assert!(matches!(
            service.send("a", Message::new("x")).await,
            Err(SqsError::ProducerNotFound(_))
        ));
        assert!(matches!(
            service.purge_queue("a").await,
            Err(SqsError::QueueNotFound(_))
        ));
        assert!(matches!(
            service.get_producer_queue_size("a"),
            Err(SqsError::ProducerNotFound(_))
        ));
    }
}
