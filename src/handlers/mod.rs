//! Handler types bound to consumers
//!
//! Message handlers are async closures the host registers per queue name,
//! either once per message or once per received batch. Event listeners are
//! synchronous callbacks fired on consumer lifecycle events.

pub mod discovery;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::core::models::ReceivedMessage;

pub use discovery::{DiscoveredHandlers, HandlerRegistry};

pub type SingleHandlerFn =
    Arc<dyn Fn(ReceivedMessage) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
pub type BatchHandlerFn =
    Arc<dyn Fn(Vec<ReceivedMessage>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A queue's message handler. The mode is fixed per queue.
#[derive(Clone)]
pub enum MessageHandler {
    Single(SingleHandlerFn),
    Batch(BatchHandlerFn),
}

impl MessageHandler {
    pub fn single<F, Fut>(handler: F) -> Self
    where
        F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        MessageHandler::Single(Arc::new(move |message| handler(message).boxed()))
    }

    pub fn batch<F, Fut>(handler: F) -> Self
    where
        F: Fn(Vec<ReceivedMessage>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        MessageHandler::Batch(Arc::new(move |messages| handler(messages).boxed()))
    }

    #[must_use]
    pub fn is_batch(&self) -> bool {
        matches!(self, MessageHandler::Batch(_))
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageHandler::Single(_) => f.write_str("MessageHandler::Single"),
            MessageHandler::Batch(_) => f.write_str("MessageHandler::Batch"),
        }
    }
}

/// Events a consumer emits over its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerEvent {
    Started,
    Stopped,
    Empty,
    MessageReceived,
    MessageProcessed,
    ResponseProcessed,
    ProcessingError,
    TimeoutError,
    Error,
}

impl ConsumerEvent {
    pub const ALL: [ConsumerEvent; 9] = [
        ConsumerEvent::Started,
        ConsumerEvent::Stopped,
        ConsumerEvent::Empty,
        ConsumerEvent::MessageReceived,
        ConsumerEvent::MessageProcessed,
        ConsumerEvent::ResponseProcessed,
        ConsumerEvent::ProcessingError,
        ConsumerEvent::TimeoutError,
        ConsumerEvent::Error,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ConsumerEvent::Started => "started",
            ConsumerEvent::Stopped => "stopped",
            ConsumerEvent::Empty => "empty",
            ConsumerEvent::MessageReceived => "message_received",
            ConsumerEvent::MessageProcessed => "message_processed",
            ConsumerEvent::ResponseProcessed => "response_processed",
            ConsumerEvent::ProcessingError => "processing_error",
            ConsumerEvent::TimeoutError => "timeout_error",
            ConsumerEvent::Error => "error",
        }
    }
}

impl fmt::Display for ConsumerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsumerEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConsumerEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| format!("Unknown consumer event: {s}"))
    }
}

/// What a listener sees when an event fires.
///
/// `error` is set for `processing_error`, `timeout_error`, and `error`.
/// `messages` holds the message (or batch) the event concerns, if any.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerEventData<'a> {
    pub event: ConsumerEvent,
    pub queue: &'a str,
    pub error: Option<&'a anyhow::Error>,
    pub messages: &'a [ReceivedMessage],
}

pub type EventListener = Arc<dyn Fn(&ConsumerEventData<'_>) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_round_trip() {
        for event in ConsumerEvent::ALL {
            assert_eq!(event.as_str().parse::<ConsumerEvent>().unwrap(), event);
        }
        assert!("processing-error".parse::<ConsumerEvent>().is_err());
    }

    #[test]
    fn handler_mode_is_reported() {
        let single = MessageHandler::single(|_m| async { Ok(()) });
        let batch = MessageHandler::batch(|_m| async { Ok(()) });
        assert!(!single.is_batch());
        assert!(batch.is_batch());
        assert_eq!(format!("{batch:?}"), "MessageHandler::Batch");
    }
}
