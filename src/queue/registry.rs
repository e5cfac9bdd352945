use std::collections::HashMap;
use std::sync::Arc;

use tracing::{Span, debug};

use super::{Consumer, Producer};
use crate::core::config::SqsOptions;
use crate::core::models::QueueName;
use crate::errors::SqsError;
use crate::handlers::HandlerRegistry;
use crate::transport::SharedTransport;

/// Consumers and producers keyed by queue name. Built once, read-only after.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    consumers: HashMap<QueueName, Arc<Consumer>>,
    consumer_order: Vec<QueueName>,
    producers: HashMap<QueueName, Arc<Producer>>,
}

fn resolve_transport(
    name: &str,
    dedicated: Option<&SharedTransport>,
    default: Option<&SharedTransport>,
) -> Result<SharedTransport, SqsError> {
    dedicated
        .or(default)
        .map(Arc::clone)
        .ok_or_else(|| SqsError::MissingTransport(name.to_string()))
}

impl QueueRegistry {
    /// Construct every producer, then every consumer with its handlers.
    /// Nothing is started.
    ///
    /// # Errors
    ///
    /// Fails on the first duplicate name, invalid option, or queue with no
    /// transport.
    pub fn build(
        options: &SqsOptions,
        handlers: &HandlerRegistry,
        span: &Span,
    ) -> Result<Self, SqsError> {
        let mut registry = Self::default();

        for producer_options in &options.producers {
            let name = &producer_options.name;
            if registry.producers.contains_key(name) {
                return Err(SqsError::DuplicateProducer(name.clone()));
            }
            producer_options.validate()?;

            let transport =
                resolve_transport(name, producer_options.sqs.as_ref(), options.sqs.as_ref())?;
            let producer = Producer::new(producer_options.clone(), transport);
            debug!(queue = %name, "Create producer: {}", name);
            registry.producers.insert(name.clone(), Arc::new(producer));
        }

        let discovered = handlers.discover(&options.consumers);

        for consumer_options in &options.consumers {
            let name = &consumer_options.name;
            if registry.consumers.contains_key(name) {
                return Err(SqsError::DuplicateConsumer(name.clone()));
            }
            consumer_options.validate()?;

            let transport =
                resolve_transport(name, consumer_options.sqs.as_ref(), options.sqs.as_ref())?;
            let handler = discovered.message_handler(name).cloned();
            let mut consumer =
                Consumer::new(consumer_options.clone(), transport, handler, span.clone());
            for (event, listener) in discovered.event_handlers(name) {
                consumer.add_listener(event, listener);
            }

            debug!(queue = %name, batch = consumer.is_batch(), "Create consumer: {}", name);
            registry.consumer_order.push(name.clone());
            registry.consumers.insert(name.clone(), Arc::new(consumer));
        }

        Ok(registry)
    }

    /// Start every consumer in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first start failure; consumers started before it keep running.
    pub fn start_all(&self) -> Result<(), SqsError> {
        for consumer in self.consumers() {
            consumer.start()?;
        }
        Ok(())
    }

    /// Request every consumer to stop without waiting for any of them.
    pub fn stop_all(&self) {
        for consumer in self.consumers() {
            consumer.stop();
        }
    }

    /// Wait until every consumer's poll loop has exited.
    pub async fn join_all(&self) {
        futures::future::join_all(self.consumers().map(|c| c.join())).await;
    }

    #[must_use]
    pub fn consumer(&self, name: &str) -> Option<&Arc<Consumer>> {
        self.consumers.get(name)
    }

    #[must_use]
    pub fn producer(&self, name: &str) -> Option<&Arc<Producer>> {
        self.producers.get(name)
    }

    /// Consumers in registration order.
    pub fn consumers(&self) -> impl Iterator<Item = &Arc<Consumer>> {
        self.consumer_order
            .iter()
            .filter_map(|name| self.consumers.get(name))
    }

    pub fn producers(&self) -> impl Iterator<Item = &Arc<Producer>> {
        self.producers.values()
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    #[must_use]
    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    /// Transport and queue URL for `name`, preferring the consumer's.
    ///
    /// # Errors
    ///
    /// Returns [`SqsError::QueueNotFound`] if `name` is neither a consumer
    /// nor a producer.
    pub fn queue_target(&self, name: &str) -> Result<(&SharedTransport, &str), SqsError> {
        if let Some(consumer) = self.consumers.get(name) {
            return Ok((consumer.transport(), consumer.queue_url()));
        }
        if let Some(producer) = self.producers.get(name) {
            return Ok((producer.transport(), producer.queue_url()));
        }
        Err(SqsError::QueueNotFound(name.to_string()))
    }
}
