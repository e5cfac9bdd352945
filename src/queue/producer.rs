use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::core::config::ProducerOptions;
use crate::core::models::{OutboundMessage, QueueName, SendReceipt};
use crate::errors::SqsError;
use crate::transport::SharedTransport;

/// Sends prepared messages to one queue, in batches of `batch_size`.
#[derive(Debug)]
pub struct Producer {
    name: QueueName,
    queue_url: String,
    batch_size: usize,
    transport: SharedTransport,
    pending: AtomicUsize,
}

// Releases whatever part of a send is still counted as pending, including
// when the send future is dropped midway.
struct PendingGuard<'a> {
    counter: &'a AtomicUsize,
    remaining: usize,
}

impl PendingGuard<'_> {
    fn settle(&mut self, count: usize) {
        let count = count.min(self.remaining);
        self.counter.fetch_sub(count, Ordering::SeqCst);
        self.remaining -= count;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(self.remaining, Ordering::SeqCst);
    }
}

impl Producer {
    #[must_use]
    pub fn new(options: ProducerOptions, transport: SharedTransport) -> Self {
        Self {
            name: options.name,
            queue_url: options.queue_url,
            batch_size: usize::try_from(options.batch_size.max(1)).unwrap_or(1),
            transport,
            pending: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    #[must_use]
    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    /// Messages handed to `send` that the queue has not yet acknowledged.
    ///
    /// This is local accounting, not the queue's depth.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Returns [`SqsError::SendFailed`] listing every rejected entry, or the
    /// transport error if a batch call fails outright.
    pub async fn send(&self, messages: Vec<OutboundMessage>) -> Result<Vec<SendReceipt>, SqsError> {
        self.pending.fetch_add(messages.len(), Ordering::SeqCst);
        let mut guard = PendingGuard {
            counter: &self.pending,
            remaining: messages.len(),
        };

        let mut receipts = Vec::with_capacity(messages.len());
        let mut failed = Vec::new();
        for chunk in messages.chunks(self.batch_size) {
            let outcome = self.transport.send_batch(&self.queue_url, chunk).await?;
            guard.settle(chunk.len());
            receipts.extend(outcome.successful);
            failed.extend(outcome.failed);
        }

        if !failed.is_empty() {
            warn!(queue = %self.name, failed = failed.len(), "Some messages were rejected");
            return Err(SqsError::SendFailed {
                queue: self.name.clone(),
                failed,
            });
        }

        debug!(queue = %self.name, count = receipts.len(), "Sent messages");
        Ok(receipts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Message;
    use crate::transport::InMemoryTransport;
    use std::sync::Arc;

    fn producer(transport: Arc<InMemoryTransport>, batch_size: i32) -> Producer {
        Producer::new(
            ProducerOptions::new("jobs", "http://local/jobs").batch_size(batch_size),
            transport,
        )
    }

    #[tokio::test]
    async fn splits_sends_into_batches() {
        let transport = Arc::new(InMemoryTransport::new());
        let producer = producer(Arc::clone(&transport), 2);

        let messages = (0..5)
            .map(|i| Message::new(i).prepare().unwrap())
            .collect();
        let receipts = producer.send(messages).await.unwrap();

        assert_eq!(receipts.len(), 5);
        assert_eq!(transport.queued("http://local/jobs"), 5);
        assert_eq!(producer.queue_size(), 0);
    }

    #[tokio::test]
    async fn rejected_entries_are_reported() {
        let transport = Arc::new(InMemoryTransport::new());
        let producer = Producer::new(
            ProducerOptions::new("orders", "http://local/orders.fifo"),
            transport,
        );

        let messages = vec![
            Message::new("a").with_id("no-group").prepare().unwrap(),
            Message::new("b")
                .with_id("grouped")
                .with_group_id("g1")
                .prepare()
                .unwrap(),
        ];
        let err = producer.send(messages).await.unwrap_err();

        match err {
            SqsError::SendFailed { queue, failed } => {
                assert_eq!(queue, "orders");
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].id, "no-group");
            }
            other => panic!("Unexpected error: {other}"),
        }
        assert_eq!(producer.queue_size(), 0);
    }
}
