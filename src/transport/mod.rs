//! Queue transport seam
//!
//! Consumers and producers talk to SQS only through [`QueueTransport`]. The
//! AWS-backed implementation lives in [`aws`]; [`memory`] keeps queues in
//! process for tests and local runs.

pub mod aws;
pub mod memory;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::models::{BatchSendOutcome, OutboundMessage, ReceivedMessage};
use crate::errors::SqsError;

pub use aws::AwsSqsTransport;
pub use memory::InMemoryTransport;

/// Transport handle shared between the service, consumers, and producers.
pub type SharedTransport = Arc<dyn QueueTransport>;

/// Parameters of one `ReceiveMessage` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_messages: i32,
    pub wait_time_seconds: i32,
    pub visibility_timeout: Option<i32>,
    pub attribute_names: Vec<String>,
    pub message_attribute_names: Vec<String>,
}

#[async_trait]
pub trait QueueTransport: Send + Sync + Debug {
    /// Long-poll for up to `request.max_messages` messages.
    async fn receive(
        &self,
        queue_url: &str,
        request: &ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, SqsError>;

    async fn delete(&self, queue_url: &str, messages: &[ReceivedMessage]) -> Result<(), SqsError>;

    async fn change_visibility(
        &self,
        queue_url: &str,
        messages: &[ReceivedMessage],
        visibility_timeout: i32,
    ) -> Result<(), SqsError>;

    /// Send at most ten messages in one call.
    async fn send_batch(
        &self,
        queue_url: &str,
        messages: &[OutboundMessage],
    ) -> Result<BatchSendOutcome, SqsError>;

    async fn purge(&self, queue_url: &str) -> Result<(), SqsError>;

    async fn queue_attributes(&self, queue_url: &str) -> Result<HashMap<String, String>, SqsError>;
}
