#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqs_bridge::ReceivedMessage;

pub const ENDPOINT: &str = "http://localhost:4566/000000000000";

pub fn queue_url(name: &str) -> String {
    format!("{ENDPOINT}/{name}")
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collects what handlers and listeners saw.
#[derive(Clone, Default)]
pub struct Recorder<T> {
    calls: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, value: T) {
        self.calls.lock().unwrap().push(value);
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<T> {
        self.calls.lock().unwrap().clone()
    }
}

pub type MessageRecorder = Recorder<Vec<ReceivedMessage>>;
