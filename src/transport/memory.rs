//! In-process queues with SQS-like visibility semantics.
//!
//! Queues are created on first use. Received messages stay in flight until
//! deleted or until their visibility timeout lapses. FIFO queues (URL ending
//! in `.fifo`) reject entries without a group id, as SQS does.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::{QueueTransport, ReceiveRequest};
use crate::core::models::{
    BatchSendOutcome, FailedSend, MessageAttribute, OutboundMessage, ReceivedMessage, SendReceipt,
};
use crate::errors::SqsError;

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_TICK: Duration = Duration::from_millis(25);
/// Oldest entries of the per-queue send log are dropped past this.
const SENT_LOG_LIMIT: usize = 1_000;

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    message_attributes: HashMap<String, MessageAttribute>,
    sent_timestamp: u128,
    receive_count: u32,
    available_at: Instant,
}

#[derive(Debug)]
struct InFlight {
    message: StoredMessage,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlight>,
    sent: VecDeque<OutboundMessage>,
}

impl QueueState {
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in expired {
            if let Some(flight) = self.in_flight.remove(&handle) {
                self.messages.push_back(flight.message);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTransport {
    queues: Mutex<HashMap<String, QueueState>>,
    receive_failures: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `receive` call fail with `message`.
    pub fn fail_next_receive(&self, message: impl Into<String>) {
        if let Ok(mut failures) = self.receive_failures.lock() {
            failures.push_back(message.into());
        }
    }

    /// Messages waiting to be received (visible or delayed).
    #[must_use]
    pub fn queued(&self, queue_url: &str) -> usize {
        self.with_queue(queue_url, |q| q.messages.len())
    }

    /// Messages received but not yet deleted.
    #[must_use]
    pub fn in_flight(&self, queue_url: &str) -> usize {
        self.with_queue(queue_url, |q| q.in_flight.len())
    }

    /// Messages accepted by `send_batch` for this queue since the last purge,
    /// in order. Only the most recent ones are kept.
    #[must_use]
    pub fn sent(&self, queue_url: &str) -> Vec<OutboundMessage> {
        self.with_queue(queue_url, |q| q.sent.iter().cloned().collect())
    }

    fn with_queue<T>(&self, queue_url: &str, f: impl FnOnce(&mut QueueState) -> T) -> T {
        let mut queues = self
            .queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(queues.entry(queue_url.to_string()).or_default())
    }

    fn take(&self, queue_url: &str, request: &ReceiveRequest) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        let visibility = request
            .visibility_timeout
            .and_then(|v| u64::try_from(v).ok())
            .map_or(DEFAULT_VISIBILITY_TIMEOUT, Duration::from_secs);
        let max = usize::try_from(request.max_messages.max(1)).unwrap_or(1);

        self.with_queue(queue_url, |queue| {
            queue.release_expired(now);

            let mut taken = Vec::new();
            let mut remaining = VecDeque::with_capacity(queue.messages.len());
            while let Some(mut message) = queue.messages.pop_front() {
                if taken.len() >= max || message.available_at > now {
                    remaining.push_back(message);
                    continue;
                }
                message.receive_count += 1;
                let receipt_handle = Uuid::new_v4().to_string();
                taken.push(to_received(&message, &receipt_handle, request));
                queue.in_flight.insert(
                    receipt_handle,
                    InFlight {
                        message,
                        visible_at: now + visibility,
                    },
                );
            }
            queue.messages = remaining;
            taken
        })
    }
}

fn wants(filter: &[String], name: &str) -> bool {
    filter.iter().any(|f| f == "All" || f == name)
}

fn to_received(message: &StoredMessage, receipt_handle: &str, request: &ReceiveRequest) -> ReceivedMessage {
    let mut attributes = HashMap::new();
    if wants(&request.attribute_names, "ApproximateReceiveCount") {
        attributes.insert(
            "ApproximateReceiveCount".to_string(),
            message.receive_count.to_string(),
        );
    }
    if wants(&request.attribute_names, "SentTimestamp") {
        attributes.insert(
            "SentTimestamp".to_string(),
            message.sent_timestamp.to_string(),
        );
    }

    let message_attributes = message
        .message_attributes
        .iter()
        .filter(|(name, _)| wants(&request.message_attribute_names, name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    ReceivedMessage {
        message_id: message.message_id.clone(),
        receipt_handle: receipt_handle.to_string(),
        body: message.body.clone(),
        attributes,
        message_attributes,
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn receive(
        &self,
        queue_url: &str,
        request: &ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, SqsError> {
        // Stand-in for network I/O so a zero-wait poll loop still yields.
        tokio::task::yield_now().await;

        let failure = self
            .receive_failures
            .lock()
            .ok()
            .and_then(|mut failures| failures.pop_front());
        if let Some(message) = failure {
            return Err(SqsError::AwsError(message));
        }

        let wait = Duration::from_secs(u64::try_from(request.wait_time_seconds).unwrap_or(0));
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.take(queue_url, request);
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            let _ = tokio::time::timeout_at(deadline.min(now + POLL_TICK), notified).await;
        }
    }

    async fn delete(&self, queue_url: &str, messages: &[ReceivedMessage]) -> Result<(), SqsError> {
        self.with_queue(queue_url, |queue| {
            for message in messages {
                queue.in_flight.remove(&message.receipt_handle);
            }
        });
        Ok(())
    }

    async fn change_visibility(
        &self,
        queue_url: &str,
        messages: &[ReceivedMessage],
        visibility_timeout: i32,
    ) -> Result<(), SqsError> {
        let timeout = Duration::from_secs(u64::try_from(visibility_timeout).unwrap_or(0));
        let now = Instant::now();
        self.with_queue(queue_url, |queue| {
            for message in messages {
                if let Some(flight) = queue.in_flight.get_mut(&message.receipt_handle) {
                    flight.visible_at = now + timeout;
                }
            }
            queue.release_expired(now);
        });
        self.notify.notify_waiters();
        Ok(())
    }

    async fn send_batch(
        &self,
        queue_url: &str,
        messages: &[OutboundMessage],
    ) -> Result<BatchSendOutcome, SqsError> {
        let fifo = queue_url.ends_with(".fifo");
        let now = Instant::now();
        let sent_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        let outcome = self.with_queue(queue_url, |queue| {
            let mut outcome = BatchSendOutcome::default();
            for message in messages {
                if fifo && message.group_id.is_none() {
                    outcome.failed.push(FailedSend {
                        id: message.id.clone(),
                        code: "MissingParameter".to_string(),
                        message: Some("The request must contain the parameter MessageGroupId.".to_string()),
                        sender_fault: true,
                    });
                    continue;
                }

                let delay = Duration::from_secs(
                    message
                        .delay_seconds
                        .and_then(|d| u64::try_from(d).ok())
                        .unwrap_or(0),
                );
                let message_id = Uuid::new_v4().to_string();
                if queue.sent.len() == SENT_LOG_LIMIT {
                    queue.sent.pop_front();
                }
                queue.sent.push_back(message.clone());
                queue.messages.push_back(StoredMessage {
                    message_id: message_id.clone(),
                    body: message.body.clone(),
                    message_attributes: message.message_attributes.clone(),
                    sent_timestamp,
                    receive_count: 0,
                    available_at: now + delay,
                });
                outcome.successful.push(SendReceipt {
                    id: message.id.clone(),
                    message_id,
                });
            }
            outcome
        });

        self.notify.notify_waiters();
        Ok(outcome)
    }

    async fn purge(&self, queue_url: &str) -> Result<(), SqsError> {
        self.with_queue(queue_url, |queue| {
            queue.messages.clear();
            queue.in_flight.clear();
            queue.sent.clear();
        });
        Ok(())
    }

    async fn queue_attributes(&self, queue_url: &str) -> Result<HashMap<String, String>, SqsError> {
        let now = Instant::now();
        let queue_name = queue_url.rsplit('/').next().unwrap_or(queue_url).to_string();
        Ok(self.with_queue(queue_url, |queue| {
            queue.release_expired(now);
            let delayed = queue.messages.iter().filter(|m| m.available_at > now).count();
            HashMap::from([
                (
                    "ApproximateNumberOfMessages".to_string(),
                    (queue.messages.len() - delayed).to_string(),
                ),
                (
                    "ApproximateNumberOfMessagesNotVisible".to_string(),
                    queue.in_flight.len().to_string(),
                ),
                (
                    "ApproximateNumberOfMessagesDelayed".to_string(),
                    delayed.to_string(),
                ),
                (
                    "QueueArn".to_string(),
                    format!("arn:aws:sqs:local:000000000000:{queue_name}"),
                ),
            ])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound(id: &str, body: &str) -> OutboundMessage {
        OutboundMessage {
            id: id.to_string(),
            body: body.to_string(),
            group_id: None,
            deduplication_id: None,
            delay_seconds: None,
            message_attributes: HashMap::new(),
        }
    }

    fn request(max_messages: i32) -> ReceiveRequest {
        ReceiveRequest {
            max_messages,
            wait_time_seconds: 0,
            ..ReceiveRequest::default()
        }
    }

    #[tokio::test]
    async fn received_messages_stay_in_flight_until_deleted() {
        let transport = InMemoryTransport::new();
        transport
            .send_batch("q", &[outbound("1", "a"), outbound("2", "b")])
            .await
            .unwrap();

        let got = transport.receive("q", &request(1)).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].body, "a");
        assert_eq!(transport.queued("q"), 1);
        assert_eq!(transport.in_flight("q"), 1);

        transport.delete("q", &got).await.unwrap();
        assert_eq!(transport.in_flight("q"), 0);
    }

    #[tokio::test]
    async fn zero_visibility_returns_message_to_queue() {
        let transport = InMemoryTransport::new();
        transport.send_batch("q", &[outbound("1", "a")]).await.unwrap();

        let got = transport.receive("q", &request(10)).await.unwrap();
        transport.change_visibility("q", &got, 0).await.unwrap();

        let again = transport.receive("q", &request(10)).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].message_id, got[0].message_id);
    }

    #[tokio::test]
    async fn fifo_queue_rejects_missing_group_id() {
        let transport = InMemoryTransport::new();
        let mut grouped = outbound("2", "b");
        grouped.group_id = Some("g".to_string());

        let outcome = transport
            .send_batch("q.fifo", &[outbound("1", "a"), grouped])
            .await
            .unwrap();
        assert_eq!(outcome.successful.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].id, "1");
        assert_eq!(outcome.failed[0].code, "MissingParameter");
    }

    #[tokio::test]
    async fn attributes_report_counts() {
        let transport = InMemoryTransport::new();
        transport
            .send_batch("http://local/000/jobs", &[outbound("1", "a"), outbound("2", "b")])
            .await
            .unwrap();
        transport
            .receive("http://local/000/jobs", &request(1))
            .await
            .unwrap();

        let attrs = transport.queue_attributes("http://local/000/jobs").await.unwrap();
        assert_eq!(attrs["ApproximateNumberOfMessages"], "1");
        assert_eq!(attrs["ApproximateNumberOfMessagesNotVisible"], "1");
        assert!(attrs["QueueArn"].ends_with(":jobs"));
    }

    #[tokio::test]
    async fn injected_receive_failure_is_returned_once() {
        let transport = InMemoryTransport::new();
        transport.fail_next_receive("AccessDenied");

        let err = transport.receive("q", &request(1)).await.unwrap_err();
        assert!(err.to_string().contains("AccessDenied"));
        assert!(transport.receive("q", &request(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_log_is_bounded_and_cleared_by_purge() {
        let transport = InMemoryTransport::new();
        for i in 0..SENT_LOG_LIMIT + 5 {
            transport
                .send_batch("q", &[outbound(&i.to_string(), "x")])
                .await
                .unwrap();
        }

        let sent = transport.sent("q");
        assert_eq!(sent.len(), SENT_LOG_LIMIT);
        assert_eq!(sent[0].id, "5");

        transport.purge("q").await.unwrap();
        assert!(transport.sent("q").is_empty());
        assert_eq!(transport.queued("q"), 0);
    }
}
