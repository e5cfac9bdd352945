use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{ConsumerEvent, ConsumerEventData, EventListener, MessageHandler};
use crate::core::config::ConsumerOptions;
use crate::core::models::{QueueName, ReceivedMessage};
use crate::errors::SqsError;

/// A listener bound to one event of one queue.
#[derive(Clone)]
pub struct EventBinding {
    pub queue: QueueName,
    pub event: ConsumerEvent,
    pub listener: EventListener,
}

/// Handlers the host registers up front, keyed by queue name.
///
/// Handlers capture whatever state they need by closure; nothing is bound
/// implicitly at discovery time.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    message_handlers: HashMap<QueueName, MessageHandler>,
    event_bindings: Vec<EventBinding>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` as the message handler of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SqsError::DuplicateHandler`] if `name` already has one.
    pub fn handler(
        &mut self,
        name: impl Into<QueueName>,
        handler: MessageHandler,
    ) -> Result<&mut Self, SqsError> {
        let name = name.into();
        if self.message_handlers.contains_key(&name) {
            return Err(SqsError::DuplicateHandler(name));
        }
        self.message_handlers.insert(name, handler);
        Ok(self)
    }

    /// Register a handler invoked once per message.
    ///
    /// # Errors
    ///
    /// Returns [`SqsError::DuplicateHandler`] if `name` already has one.
    pub fn message_handler<F, Fut>(
        &mut self,
        name: impl Into<QueueName>,
        handler: F,
    ) -> Result<&mut Self, SqsError>
    where
        F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handler(name, MessageHandler::single(handler))
    }

    /// Register a handler invoked once per received batch.
    ///
    /// # Errors
    ///
    /// Returns [`SqsError::DuplicateHandler`] if `name` already has one.
    pub fn batch_handler<F, Fut>(
        &mut self,
        name: impl Into<QueueName>,
        handler: F,
    ) -> Result<&mut Self, SqsError>
    where
        F: Fn(Vec<ReceivedMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handler(name, MessageHandler::batch(handler))
    }

    /// Listen for `event` on the consumer of `name`. Any number of listeners
    /// may be attached to the same queue.
    pub fn event_handler<F>(
        &mut self,
        name: impl Into<QueueName>,
        event: ConsumerEvent,
        listener: F,
    ) -> &mut Self
    where
        F: Fn(&ConsumerEventData<'_>) + Send + Sync + 'static,
    {
        self.event_bindings.push(EventBinding {
            queue: name.into(),
            event,
            listener: Arc::new(listener),
        });
        self
    }

    /// Number of queues with a message handler.
    #[must_use]
    pub fn len(&self) -> usize {
        self.message_handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.message_handlers.is_empty()
    }

    /// Match registered handlers against the configured consumers.
    ///
    /// Never invokes a handler. Consumers without a message handler are
    /// reported (and logged) but not rejected.
    #[must_use]
    pub fn discover(&self, consumers: &[ConsumerOptions]) -> DiscoveredHandlers<'_> {
        debug!(
            handlers = self.len(),
            listeners = self.event_bindings.len(),
            consumers = consumers.len(),
            "Discovering handlers"
        );
        if self.is_empty() && !consumers.is_empty() {
            warn!("No message handlers registered; no consumer will poll");
        }
        let configured: HashSet<&str> = consumers.iter().map(|c| c.name.as_str()).collect();

        let missing: Vec<QueueName> = consumers
            .iter()
            .filter(|c| !self.message_handlers.contains_key(&c.name))
            .map(|c| c.name.clone())
            .collect();
        for name in &missing {
            warn!(queue = %name, "No handler found for: {}", name);
        }

        let mut unbound: Vec<QueueName> = self
            .message_handlers
            .keys()
            .map(String::as_str)
            .chain(self.event_bindings.iter().map(|b| b.queue.as_str()))
            .filter(|name| !configured.contains(name))
            .map(str::to_string)
            .collect();
        unbound.sort();
        unbound.dedup();
        for name in &unbound {
            debug!(queue = %name, "Handler registered for a queue with no consumer");
        }

        DiscoveredHandlers {
            registry: self,
            missing,
            unbound,
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message_handlers", &self.message_handlers)
            .field(
                "event_bindings",
                &self
                    .event_bindings
                    .iter()
                    .map(|b| (b.queue.as_str(), b.event))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Result of [`HandlerRegistry::discover`].
pub struct DiscoveredHandlers<'a> {
    registry: &'a HandlerRegistry,
    /// Configured consumers with no message handler.
    pub missing: Vec<QueueName>,
    /// Queue names with handlers but no configured consumer.
    pub unbound: Vec<QueueName>,
}

impl<'a> DiscoveredHandlers<'a> {
    #[must_use]
    pub fn message_handler(&self, name: &str) -> Option<&'a MessageHandler> {
        self.registry.message_handlers.get(name)
    }

    /// Listeners bound to `name`, in registration order.
    #[must_use]
    pub fn event_handlers(&self, name: &str) -> Vec<(ConsumerEvent, EventListener)> {
        self.registry
            .event_bindings
            .iter()
            .filter(|binding| binding.queue == name)
            .map(|binding| (binding.event, Arc::clone(&binding.listener)))
            .collect()
    }
}
