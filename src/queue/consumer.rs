//! Long-polling consumer bound to one queue

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::core::config::ConsumerOptions;
use crate::core::models::{QueueName, ReceivedMessage};
use crate::errors::SqsError;
use crate::handlers::{ConsumerEvent, ConsumerEventData, EventListener, MessageHandler};
use crate::transport::{ReceiveRequest, SharedTransport};

type Listeners = HashMap<ConsumerEvent, Vec<EventListener>>;

struct Running {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RunSlot {
    running: Option<Running>,
    // Latched by `stop`; a consumer never starts after it.
    stop_requested: bool,
}

/// A consumer polls its queue on a dedicated task once started.
///
/// A consumer built without a handler still starts, but never polls: its
/// messages are left on the queue.
pub struct Consumer {
    name: QueueName,
    options: Arc<ConsumerOptions>,
    transport: SharedTransport,
    handler: Option<MessageHandler>,
    listeners: Arc<Listeners>,
    span: Span,
    run: Mutex<RunSlot>,
}

impl Consumer {
    #[must_use]
    pub fn new(
        options: ConsumerOptions,
        transport: SharedTransport,
        handler: Option<MessageHandler>,
        span: Span,
    ) -> Self {
        Self {
            name: options.name.clone(),
            options: Arc::new(options),
            transport,
            handler,
            listeners: Arc::new(HashMap::new()),
            span,
            run: Mutex::new(RunSlot::default()),
        }
    }

    pub fn add_listener(&mut self, event: ConsumerEvent, listener: EventListener) {
        Arc::make_mut(&mut self.listeners)
            .entry(event)
            .or_default()
            .push(listener);
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn queue_url(&self) -> &str {
        &self.options.queue_url
    }

    #[must_use]
    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    #[must_use]
    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    #[must_use]
    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.handler.as_ref().is_some_and(MessageHandler::is_batch)
    }

    #[must_use]
    pub fn listener_count(&self, event: ConsumerEvent) -> usize {
        self.listeners.get(&event).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_run()
            .running
            .as_ref()
            .is_some_and(|running| !running.token.is_cancelled())
    }

    fn lock_run(&self) -> std::sync::MutexGuard<'_, RunSlot> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poll_loop(&self) -> PollLoop {
        PollLoop {
            name: self.name.clone(),
            options: Arc::clone(&self.options),
            transport: Arc::clone(&self.transport),
            handler: self.handler.clone(),
            listeners: Arc::clone(&self.listeners),
        }
    }

    /// Begin polling. A consumer starts at most once; later calls are ignored,
    /// as are calls after [`Consumer::stop`].
    ///
    /// # Errors
    ///
    /// Returns an error if called outside a Tokio runtime.
    pub fn start(&self) -> Result<(), SqsError> {
        let mut run = self.lock_run();
        if run.stop_requested {
            debug!(queue = %self.name, "Consumer stopped before it started; not starting");
            return Ok(());
        }
        if run.running.is_some() {
            warn!(queue = %self.name, "Consumer already started");
            return Ok(());
        }

        let poll_loop = self.poll_loop();
        let token = CancellationToken::new();

        if self.handler.is_some() {
            let runtime = tokio::runtime::Handle::try_current()
                .map_err(|e| SqsError::Runtime(e.to_string()))?;
            let task = runtime.spawn(poll_loop.run(token.clone()).instrument(self.span.clone()));
            run.running = Some(Running {
                token,
                task: Some(task),
            });
            return Ok(());
        }

        run.running = Some(Running { token, task: None });
        drop(run);

        let _entered = self.span.enter();
        warn!(queue = %self.name, "Consumer started without a handler; not polling");
        poll_loop.emit(ConsumerEvent::Started, None, &[]);
        Ok(())
    }

    /// Request the poll loop to stop after its current receive. Does not wait.
    ///
    /// A consumer that has not started yet will refuse to start afterwards.
    pub fn stop(&self) {
        let mut run = self.lock_run();
        run.stop_requested = true;
        let Some(running) = run.running.as_ref() else {
            debug!(queue = %self.name, "Stop requested for a consumer that never started");
            return;
        };
        if running.token.is_cancelled() {
            return;
        }
        running.token.cancel();
        let idle = running.task.is_none();
        drop(run);

        if idle {
            let _entered = self.span.enter();
            self.poll_loop().emit(ConsumerEvent::Stopped, None, &[]);
            info!(queue = %self.name, "Consumer stopped");
        }
    }

    /// Wait for the poll loop to exit. Returns immediately if it never ran.
    pub async fn join(&self) {
        let task = self
            .lock_run()
            .running
            .as_mut()
            .and_then(|running| running.task.take());
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!(queue = %self.name, "Consumer task ended abnormally: {}", e);
        }
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("name", &self.name)
            .field("queue_url", &self.options.queue_url)
            .field("handler", &self.handler)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

enum Failure {
    Handler(anyhow::Error),
    Timeout(anyhow::Error),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

struct PollLoop {
    name: QueueName,
    options: Arc<ConsumerOptions>,
    transport: SharedTransport,
    handler: Option<MessageHandler>,
    listeners: Arc<Listeners>,
}

impl PollLoop {
    fn emit(&self, event: ConsumerEvent, error: Option<&anyhow::Error>, messages: &[ReceivedMessage]) {
        let Some(listeners) = self.listeners.get(&event) else {
            return;
        };
        let data = ConsumerEventData {
            event,
            queue: &self.name,
            error,
            messages,
        };
        for listener in listeners {
            listener(&data);
        }
    }

    fn receive_request(&self) -> ReceiveRequest {
        ReceiveRequest {
            max_messages: self.options.batch_size,
            wait_time_seconds: self.options.wait_time_seconds,
            visibility_timeout: self.options.visibility_timeout,
            attribute_names: self.options.attribute_names.clone(),
            message_attribute_names: self.options.message_attribute_names.clone(),
        }
    }

    async fn run(self, token: CancellationToken) {
        let request = self.receive_request();
        let polling_wait = Duration::from_millis(self.options.polling_wait_time_ms);
        let error_backoff = Duration::from_millis(self.options.polling_error_backoff_ms);

        info!(queue = %self.name, "Consumer started");
        self.emit(ConsumerEvent::Started, None, &[]);

        loop {
            let received = tokio::select! {
                biased;
                () = token.cancelled() => break,
                received = self.transport.receive(&self.options.queue_url, &request) => received,
            };

            let delay = match received {
                Ok(messages) => {
                    if messages.is_empty() {
                        self.emit(ConsumerEvent::Empty, None, &[]);
                    } else {
                        debug!(queue = %self.name, count = messages.len(), "Received messages");
                        self.handle(messages).await;
                    }
                    self.emit(ConsumerEvent::ResponseProcessed, None, &[]);
                    polling_wait
                }
                Err(e) => {
                    error!(queue = %self.name, "Failed to receive messages: {}", e);
                    let err = anyhow::Error::from(e);
                    self.emit(ConsumerEvent::Error, Some(&err), &[]);
                    error_backoff
                }
            };

            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.emit(ConsumerEvent::Stopped, None, &[]);
        info!(queue = %self.name, "Consumer stopped");
    }

    async fn handle(&self, messages: Vec<ReceivedMessage>) {
        for message in &messages {
            self.emit(
                ConsumerEvent::MessageReceived,
                None,
                std::slice::from_ref(message),
            );
        }

        match &self.handler {
            Some(MessageHandler::Single(handler)) => {
                join_all(messages.into_iter().map(|message| {
                    let fut = handler(message.clone());
                    async move {
                        let outcome = self.invoke(fut).await;
                        self.settle(outcome, vec![message]).await;
                    }
                }))
                .await;
            }
            Some(MessageHandler::Batch(handler)) => {
                let outcome = self.invoke(handler(messages.clone())).await;
                self.settle(outcome, messages).await;
            }
            None => {}
        }
    }

    async fn invoke(&self, fut: BoxFuture<'static, anyhow::Result<()>>) -> Result<(), Failure> {
        let guarded = AssertUnwindSafe(fut).catch_unwind();
        let result = match self.options.handle_message_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), guarded).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(Failure::Timeout(anyhow!(
                        "Message handler timed out after {ms}ms"
                    )));
                }
            },
            None => guarded.await,
        };

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Failure::Handler(e)),
            Err(payload) => Err(Failure::Handler(anyhow!(
                "Message handler panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    async fn settle(&self, outcome: Result<(), Failure>, messages: Vec<ReceivedMessage>) {
        let queue_url = &self.options.queue_url;
        match outcome {
            Ok(()) => {
                if self.options.should_delete_messages
                    && let Err(e) = self.transport.delete(queue_url, &messages).await
                {
                    error!(queue = %self.name, "Failed to delete messages: {}", e);
                    let err = anyhow::Error::from(e);
                    self.emit(ConsumerEvent::Error, Some(&err), &messages);
                    return;
                }
                for message in &messages {
                    self.emit(
                        ConsumerEvent::MessageProcessed,
                        None,
                        std::slice::from_ref(message),
                    );
                }
            }
            Err(failure) => {
                let (event, err) = match failure {
                    Failure::Handler(e) => (ConsumerEvent::ProcessingError, e),
                    Failure::Timeout(e) => (ConsumerEvent::TimeoutError, e),
                };
                warn!(queue = %self.name, event = %event, "Message processing failed: {:#}", err);
                self.emit(event, Some(&err), &messages);

                if self.options.terminate_visibility_timeout
                    && let Err(e) = self.transport.change_visibility(queue_url, &messages, 0).await
                {
                    error!(queue = %self.name, "Failed to reset message visibility: {}", e);
                    let err = anyhow::Error::from(e);
                    self.emit(ConsumerEvent::Error, Some(&err), &messages);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use std::sync::OnceLock;

    fn options(name: &str) -> ConsumerOptions {
        ConsumerOptions::new(name, format!("http://local/{name}")).wait_time_seconds(0)
    }

    fn handler() -> MessageHandler {
        MessageHandler::single(|_m| async { Ok(()) })
    }

    #[tokio::test]
    async fn stop_before_start_prevents_polling() {
        let consumer = Consumer::new(
            options("late"),
            Arc::new(InMemoryTransport::new()),
            Some(handler()),
            Span::none(),
        );

        consumer.stop();
        consumer.start().unwrap();

        assert!(!consumer.is_running());
        consumer.join().await;
    }

    #[tokio::test]
    async fn stopped_consumer_does_not_restart() {
        let consumer = Consumer::new(
            options("once"),
            Arc::new(InMemoryTransport::new()),
            Some(handler()),
            Span::none(),
        );

        consumer.start().unwrap();
        assert!(consumer.is_running());
        consumer.stop();
        consumer.join().await;

        consumer.start().unwrap();
        assert!(!consumer.is_running());
    }

    #[test]
    fn listeners_may_call_back_into_an_idle_consumer() {
        let cell: Arc<OnceLock<Arc<Consumer>>> = Arc::new(OnceLock::new());
        let seen: Arc<Mutex<Vec<(ConsumerEvent, bool)>>> = Arc::new(Mutex::new(Vec::new()));

        let mut consumer = Consumer::new(
            options("idle"),
            Arc::new(InMemoryTransport::new()),
            None,
            Span::none(),
        );
        for event in [ConsumerEvent::Started, ConsumerEvent::Stopped] {
            let cell = Arc::clone(&cell);
            let seen = Arc::clone(&seen);
            consumer.add_listener(
                event,
                Arc::new(move |data: &ConsumerEventData<'_>| {
                    if let Some(consumer) = cell.get() {
                        seen.lock().unwrap().push((data.event, consumer.is_running()));
                    }
                }),
            );
        }
        let consumer = Arc::new(consumer);
        cell.set(Arc::clone(&consumer)).unwrap();

        consumer.start().unwrap();
        consumer.stop();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(ConsumerEvent::Started, true), (ConsumerEvent::Stopped, false)]
        );
    }
}
