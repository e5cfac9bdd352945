//! sqs-bridge - binds application message handlers to managed SQS consumers and producers.
//!
//! The host registers handlers per queue name, lists its consumer and
//! producer queues, and hands both to [`SqsService`]. On `init` the service
//! builds one producer per producer entry, one consumer per consumer entry
//! (wired to the matching handler and event listeners), and starts every
//! consumer's poll loop. On `shutdown` every consumer is asked to stop.
//!
//! # Architecture
//!
//! The system uses:
//! - `aws-sdk-sqs` behind the [`transport::QueueTransport`] seam
//! - Tokio tasks for the per-queue poll loops
//! - `tracing` for structured logs, scoped by an optional span
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sqs_bridge::core::config::{ConsumerOptions, ProducerOptions, SqsOptions};
//! use sqs_bridge::core::models::Message;
//! use sqs_bridge::handlers::{ConsumerEvent, HandlerRegistry};
//! use sqs_bridge::transport::AwsSqsTransport;
//! use sqs_bridge::SqsService;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     sqs_bridge::setup_logging();
//!
//!     let transport = AwsSqsTransport::from_env(Some("http://localhost:4566")).await;
//!     let url = "http://localhost:4566/000000000000/orders";
//!
//!     let mut handlers = HandlerRegistry::new();
//!     handlers
//!         .message_handler("orders", |message| async move {
//!             let order: serde_json::Value = message.json()?;
//!             tracing::info!(?order, "Order received");
//!             Ok(())
//!         })?
//!         .event_handler("orders", ConsumerEvent::ProcessingError, |event| {
//!             tracing::error!(error = ?event.error, "Order failed");
//!         });
//!
//!     let options = SqsOptions::default()
//!         .sqs(Arc::new(transport))
//!         .consumer(ConsumerOptions::new("orders", url).batch_size(10))
//!         .producer(ProducerOptions::new("orders", url));
//!
//!     let service = SqsService::new(options, handlers);
//!     service.init()?;
//!     service
//!         .send("orders", Message::new(serde_json::json!({ "sku": "A-1", "qty": 2 })))
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     service.shutdown();
//!     service.wait_stopped().await;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod errors;
pub mod handlers;
pub mod queue;
pub mod service;
pub mod transport;

pub use crate::core::config::{ConsumerOptions, ProducerOptions, SqsOptions};
pub use crate::core::models::{Message, ReceivedMessage};
pub use errors::SqsError;
pub use handlers::{ConsumerEvent, ConsumerEventData, HandlerRegistry, MessageHandler};
pub use service::{LifecycleState, SqsService};

/// Configure structured logging with JSON output.
///
/// Honors `RUST_LOG` (defaults to `info`). Calling it more than once is harmless;
/// only the first call installs the subscriber.
///
/// # Example
///
/// ```
/// sqs_bridge::setup_logging();
/// ```
pub fn setup_logging() {
    use tracing_subscriber::prelude::*;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
