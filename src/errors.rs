use aws_sdk_sqs::error::{BuildError, DisplayErrorContext, SdkError};
use thiserror::Error;

use crate::core::models::FailedSend;

#[derive(Debug, Error)]
pub enum SqsError {
    #[error("Producer already exists: {0}")]
    DuplicateProducer(String),

    #[error("Consumer already exists: {0}")]
    DuplicateConsumer(String),

    #[error("Message handler already registered for: {0}")]
    DuplicateHandler(String),

    #[error("Producer does not exist: {0}")]
    ProducerNotFound(String),

    #[error("Consumer/Producer does not exist: {0}")]
    QueueNotFound(String),

    #[error("No SQS transport configured for: {0}")]
    MissingTransport(String),

    #[error("Invalid lifecycle state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Tokio runtime unavailable: {0}")]
    Runtime(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to serialize message body: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to send {} message(s) to {queue}", .failed.len())]
    SendFailed {
        queue: String,
        failed: Vec<FailedSend>,
    },

    #[error("Failed to interact with AWS services: {0}")]
    AwsError(String),
}

// Generic implementation for AWS SDK errors
impl<E, R> From<SdkError<E, R>> for SqsError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    fn from(error: SdkError<E, R>) -> Self {
        SqsError::AwsError(DisplayErrorContext(&error).to_string())
    }
}

impl From<BuildError> for SqsError {
    fn from(error: BuildError) -> Self {
        SqsError::AwsError(format!("Invalid SQS request: {error}"))
    }
}
