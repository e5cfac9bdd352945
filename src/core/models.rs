use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Name a consumer or producer is registered under.
pub type QueueName = String;

/// A typed message attribute (`String`, `Number`, or a custom `String.*` type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttribute {
    pub data_type: String,
    pub string_value: Option<String>,
}

impl MessageAttribute {
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self {
            data_type: "String".to_string(),
            string_value: Some(value.into()),
        }
    }

    #[must_use]
    pub fn number(value: impl ToString) -> Self {
        Self {
            data_type: "Number".to_string(),
            string_value: Some(value.to_string()),
        }
    }
}

/// A message handed to [`crate::SqsService::send`].
///
/// The body may be any serializable value. Bodies that serialize to a JSON
/// string are sent as-is; everything else is sent as its JSON encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message<T> {
    pub id: Option<String>,
    pub body: T,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
    pub delay_seconds: Option<i32>,
    #[serde(default)]
    pub message_attributes: HashMap<String, MessageAttribute>,
}

impl<T> Message<T> {
    pub fn new(body: T) -> Self {
        Self {
            id: None,
            body,
            group_id: None,
            deduplication_id: None,
            delay_seconds: None,
            message_attributes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    #[must_use]
    pub fn with_deduplication_id(mut self, deduplication_id: impl Into<String>) -> Self {
        self.deduplication_id = Some(deduplication_id.into());
        self
    }

    #[must_use]
    pub fn with_delay_seconds(mut self, delay_seconds: i32) -> Self {
        self.delay_seconds = Some(delay_seconds);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: MessageAttribute) -> Self {
        self.message_attributes.insert(name.into(), value);
        self
    }
}

impl<T: Serialize> Message<T> {
    /// Assign a generated id if none was given and encode the body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized to JSON.
    pub fn prepare(self) -> Result<OutboundMessage, serde_json::Error> {
        let body = encode_body(&self.body)?;
        Ok(OutboundMessage {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            body,
            group_id: self.group_id,
            deduplication_id: self.deduplication_id,
            delay_seconds: self.delay_seconds,
            message_attributes: self.message_attributes,
        })
    }
}

/// Encode a message body for the wire.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized to JSON.
pub fn encode_body<T: Serialize + ?Sized>(body: &T) -> Result<String, serde_json::Error> {
    match serde_json::to_value(body)? {
        Value::String(raw) => Ok(raw),
        _ => serde_json::to_string(body),
    }
}

/// One message or an ordered batch, as accepted by `send`.
#[derive(Debug, Clone)]
pub enum Payload<T> {
    One(Message<T>),
    Many(Vec<Message<T>>),
}

impl<T> Payload<T> {
    #[must_use]
    pub fn into_messages(self) -> Vec<Message<T>> {
        match self {
            Payload::One(message) => vec![message],
            Payload::Many(messages) => messages,
        }
    }
}

impl<T> From<Message<T>> for Payload<T> {
    fn from(message: Message<T>) -> Self {
        Payload::One(message)
    }
}

impl<T> From<Vec<Message<T>>> for Payload<T> {
    fn from(messages: Vec<Message<T>>) -> Self {
        Payload::Many(messages)
    }
}

/// A message ready for the transport: id assigned, body encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub id: String,
    pub body: String,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
    pub delay_seconds: Option<i32>,
    pub message_attributes: HashMap<String, MessageAttribute>,
}

/// Returned for every message the queue accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub id: String,
    pub message_id: String,
}

/// A batch entry the queue rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSend {
    pub id: String,
    pub code: String,
    pub message: Option<String>,
    pub sender_fault: bool,
}

/// Outcome of a single `SendMessageBatch` call.
#[derive(Debug, Clone, Default)]
pub struct BatchSendOutcome {
    pub successful: Vec<SendReceipt>,
    pub failed: Vec<FailedSend>,
}

/// A message delivered to a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    pub message_attributes: HashMap<String, MessageAttribute>,
}

impl ReceivedMessage {
    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_bodies_are_sent_raw() {
        assert_eq!(encode_body("plain text").unwrap(), "plain text");
        assert_eq!(encode_body(&"x".to_string()).unwrap(), "x");
    }

    #[test]
    fn object_bodies_are_json_encoded() {
        let body = json!({ "test": true, "i": 2 });
        let encoded = encode_body(&body).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, body);
        assert_eq!(encode_body(&42).unwrap(), "42");
    }

    #[test]
    fn prepare_keeps_explicit_id() {
        let prepared = Message::new(json!({ "a": 1 }))
            .with_id("fixed")
            .with_delay_seconds(5)
            .prepare()
            .unwrap();
        assert_eq!(prepared.id, "fixed");
        assert_eq!(prepared.delay_seconds, Some(5));
    }

    #[test]
    fn prepare_generates_uuid_when_missing() {
        let a = Message::new("a").prepare().unwrap();
        let b = Message::new("b").prepare().unwrap();
        assert!(Uuid::parse_str(&a.id).is_ok());
        assert_ne!(a.id, b.id);
    }
}
