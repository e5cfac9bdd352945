// Standalone worker: consumes every configured queue and logs each message.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqs_bridge::SqsService;
use sqs_bridge::core::config::{SqsOptions, WorkerConfig};
use sqs_bridge::handlers::{ConsumerEvent, HandlerRegistry};
use sqs_bridge::transport::AwsSqsTransport;
use tracing::{error, info, warn};

fn logging_handlers(options: &SqsOptions) -> Result<HandlerRegistry> {
    let mut handlers = HandlerRegistry::new();
    for consumer in &options.consumers {
        handlers
            .message_handler(consumer.name.clone(), |message| async move {
                info!(
                    message_id = %message.message_id,
                    body = %message.body,
                    "Received message"
                );
                Ok(())
            })?
            .event_handler(
                consumer.name.clone(),
                ConsumerEvent::ProcessingError,
                |event| {
                    warn!(queue = %event.queue, error = ?event.error, "Processing error");
                },
            )
            .event_handler(consumer.name.clone(), ConsumerEvent::Error, |event| {
                error!(queue = %event.queue, error = ?event.error, "Consumer error");
            });
    }
    Ok(handlers)
}

#[tokio::main]
async fn main() -> Result<()> {
    sqs_bridge::setup_logging();

    let config = WorkerConfig::from_env().map_err(|e| {
        error!("Config error: {}", e);
        anyhow::anyhow!(e)
    })?;

    let transport = AwsSqsTransport::from_env(config.endpoint_url.as_deref()).await;
    let options = SqsOptions::from_file(&config.options_path)
        .with_context(|| format!("Failed to load {}", config.options_path))?
        .sqs(Arc::new(transport));
    let handlers = logging_handlers(&options)?;

    let service = SqsService::new(options, handlers);
    service.init()?;
    info!("Worker running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    service.shutdown();
    service.wait_stopped().await;
    Ok(())
}
