use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::Span;

use crate::core::models::QueueName;
use crate::errors::SqsError;
use crate::transport::SharedTransport;

/// SQS caps `ReceiveMessage` and `SendMessageBatch` at ten entries.
pub const MAX_BATCH_SIZE: i32 = 10;
/// Longest long-poll wait SQS accepts.
pub const MAX_WAIT_TIME_SECONDS: i32 = 20;

fn default_wait_time_seconds() -> i32 {
    MAX_WAIT_TIME_SECONDS
}

fn default_consumer_batch_size() -> i32 {
    1
}

fn default_producer_batch_size() -> i32 {
    MAX_BATCH_SIZE
}

fn default_true() -> bool {
    true
}

fn default_polling_error_backoff_ms() -> u64 {
    10_000
}

/// Settings for one consumer.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerOptions {
    pub name: QueueName,
    pub queue_url: String,
    #[serde(default = "default_wait_time_seconds")]
    pub wait_time_seconds: i32,
    #[serde(default = "default_consumer_batch_size")]
    pub batch_size: i32,
    #[serde(default)]
    pub attribute_names: Vec<String>,
    #[serde(default)]
    pub message_attribute_names: Vec<String>,
    pub visibility_timeout: Option<i32>,
    #[serde(default)]
    pub terminate_visibility_timeout: bool,
    #[serde(default = "default_true")]
    pub should_delete_messages: bool,
    pub handle_message_timeout_ms: Option<u64>,
    #[serde(default)]
    pub polling_wait_time_ms: u64,
    #[serde(default = "default_polling_error_backoff_ms")]
    pub polling_error_backoff_ms: u64,
    /// Dedicated transport; falls back to [`SqsOptions::sqs`].
    #[serde(skip)]
    pub sqs: Option<SharedTransport>,
}

impl ConsumerOptions {
    pub fn new(name: impl Into<QueueName>, queue_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue_url: queue_url.into(),
            wait_time_seconds: default_wait_time_seconds(),
            batch_size: default_consumer_batch_size(),
            attribute_names: Vec::new(),
            message_attribute_names: Vec::new(),
            visibility_timeout: None,
            terminate_visibility_timeout: false,
            should_delete_messages: true,
            handle_message_timeout_ms: None,
            polling_wait_time_ms: 0,
            polling_error_backoff_ms: default_polling_error_backoff_ms(),
            sqs: None,
        }
    }

    #[must_use]
    pub fn wait_time_seconds(mut self, seconds: i32) -> Self {
        self.wait_time_seconds = seconds;
        self
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn attribute_names(mut self, names: Vec<String>) -> Self {
        self.attribute_names = names;
        self
    }

    #[must_use]
    pub fn message_attribute_names(mut self, names: Vec<String>) -> Self {
        self.message_attribute_names = names;
        self
    }

    #[must_use]
    pub fn visibility_timeout(mut self, seconds: i32) -> Self {
        self.visibility_timeout = Some(seconds);
        self
    }

    #[must_use]
    pub fn terminate_visibility_timeout(mut self, terminate: bool) -> Self {
        self.terminate_visibility_timeout = terminate;
        self
    }

    #[must_use]
    pub fn should_delete_messages(mut self, delete: bool) -> Self {
        self.should_delete_messages = delete;
        self
    }

    #[must_use]
    pub fn handle_message_timeout(mut self, timeout: Duration) -> Self {
        self.handle_message_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn polling_wait_time(mut self, wait: Duration) -> Self {
        self.polling_wait_time_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn polling_error_backoff(mut self, backoff: Duration) -> Self {
        self.polling_error_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn sqs(mut self, transport: SharedTransport) -> Self {
        self.sqs = Some(transport);
        self
    }

    /// # Errors
    ///
    /// Returns an error if a field is outside the range SQS accepts.
    pub fn validate(&self) -> Result<(), SqsError> {
        validate_common(&self.name, &self.queue_url)?;
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(SqsError::InvalidConfig(format!(
                "{}: batch_size must be between 1 and {MAX_BATCH_SIZE}",
                self.name
            )));
        }
        if !(0..=MAX_WAIT_TIME_SECONDS).contains(&self.wait_time_seconds) {
            return Err(SqsError::InvalidConfig(format!(
                "{}: wait_time_seconds must be between 0 and {MAX_WAIT_TIME_SECONDS}",
                self.name
            )));
        }
        if self.visibility_timeout.is_some_and(|v| v < 0) {
            return Err(SqsError::InvalidConfig(format!(
                "{}: visibility_timeout must not be negative",
                self.name
            )));
        }
        Ok(())
    }
}

/// Settings for one producer.
#[derive(Debug, Clone, Deserialize)]
pub struct ProducerOptions {
    pub name: QueueName,
    pub queue_url: String,
    #[serde(default = "default_producer_batch_size")]
    pub batch_size: i32,
    /// Dedicated transport; falls back to [`SqsOptions::sqs`].
    #[serde(skip)]
    pub sqs: Option<SharedTransport>,
}

impl ProducerOptions {
    pub fn new(name: impl Into<QueueName>, queue_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue_url: queue_url.into(),
            batch_size: default_producer_batch_size(),
            sqs: None,
        }
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn sqs(mut self, transport: SharedTransport) -> Self {
        self.sqs = Some(transport);
        self
    }

    /// # Errors
    ///
    /// Returns an error if a field is outside the range SQS accepts.
    pub fn validate(&self) -> Result<(), SqsError> {
        validate_common(&self.name, &self.queue_url)?;
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(SqsError::InvalidConfig(format!(
                "{}: batch_size must be between 1 and {MAX_BATCH_SIZE}",
                self.name
            )));
        }
        Ok(())
    }
}

fn validate_common(name: &str, queue_url: &str) -> Result<(), SqsError> {
    if name.is_empty() {
        return Err(SqsError::InvalidConfig("queue name must not be empty".to_string()));
    }
    if queue_url.is_empty() {
        return Err(SqsError::InvalidConfig(format!("{name}: queue_url must not be empty")));
    }
    Ok(())
}

/// Everything the service needs to build its registries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SqsOptions {
    #[serde(default)]
    pub consumers: Vec<ConsumerOptions>,
    #[serde(default)]
    pub producers: Vec<ProducerOptions>,
    /// Default transport for queues without a dedicated one.
    #[serde(skip)]
    pub sqs: Option<SharedTransport>,
    /// Span that scopes every log line the service and its consumers emit.
    #[serde(skip)]
    pub span: Option<Span>,
}

impl SqsOptions {
    /// # Errors
    ///
    /// Returns an error if the JSON does not describe valid options.
    pub fn from_json(json: &str) -> Result<Self, SqsError> {
        serde_json::from_str(json)
            .map_err(|e| SqsError::InvalidConfig(format!("Failed to parse SQS options: {e}")))
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SqsError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SqsError::InvalidConfig(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    #[must_use]
    pub fn consumer(mut self, options: ConsumerOptions) -> Self {
        self.consumers.push(options);
        self
    }

    #[must_use]
    pub fn producer(mut self, options: ProducerOptions) -> Self {
        self.producers.push(options);
        self
    }

    #[must_use]
    pub fn sqs(mut self, transport: SharedTransport) -> Self {
        self.sqs = Some(transport);
        self
    }

    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

/// Environment for the `sqs-worker` binary.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub options_path: String,
    pub endpoint_url: Option<String>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            options_path: env::var("SQS_OPTIONS_PATH")
                .map_err(|e| format!("SQS_OPTIONS_PATH: {}", e))?,
            endpoint_url: env::var("SQS_ENDPOINT_URL").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_options_with_defaults() {
        let options = SqsOptions::from_json(
            r#"{
                "consumers": [
                    { "name": "test1", "queue_url": "http://localhost:4566/000000000000/test1",
                      "batch_size": 3, "terminate_visibility_timeout": true,
                      "message_attribute_names": ["All"] },
                    { "name": "test2", "queue_url": "http://localhost:4566/000000000000/test2",
                      "wait_time_seconds": 1 }
                ],
                "producers": [
                    { "name": "test1", "queue_url": "http://localhost:4566/000000000000/test1" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(options.consumers.len(), 2);
        assert_eq!(options.producers.len(), 1);

        let first = &options.consumers[0];
        assert_eq!(first.batch_size, 3);
        assert_eq!(first.wait_time_seconds, 20);
        assert!(first.terminate_visibility_timeout);
        assert!(first.should_delete_messages);
        assert_eq!(first.polling_error_backoff_ms, 10_000);

        assert_eq!(options.consumers[1].wait_time_seconds, 1);
        assert_eq!(options.consumers[1].batch_size, 1);
        assert_eq!(options.producers[0].batch_size, 10);
        assert!(options.sqs.is_none());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = SqsOptions::from_json("{ \"consumers\": 3 }").unwrap_err();
        assert!(matches!(err, SqsError::InvalidConfig(_)));
    }

    #[test]
    fn validation_bounds() {
        assert!(ConsumerOptions::new("q", "url").validate().is_ok());
        assert!(ConsumerOptions::new("q", "url").batch_size(11).validate().is_err());
        assert!(ConsumerOptions::new("q", "url").batch_size(0).validate().is_err());
        assert!(ConsumerOptions::new("q", "url").wait_time_seconds(21).validate().is_err());
        assert!(ConsumerOptions::new("", "url").validate().is_err());
        assert!(ConsumerOptions::new("q", "").validate().is_err());
        assert!(ProducerOptions::new("q", "url").batch_size(11).validate().is_err());
        assert!(ProducerOptions::new("q", "url").validate().is_ok());
    }
}
