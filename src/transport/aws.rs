//! `aws-sdk-sqs` backed transport

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_sqs::Client as SqsClient;
use aws_sdk_sqs::types::{
    ChangeMessageVisibilityBatchRequestEntry, DeleteMessageBatchRequestEntry, Message,
    MessageAttributeValue, MessageSystemAttributeName, QueueAttributeName,
    SendMessageBatchRequestEntry,
};
use tracing::{debug, warn};

use super::{QueueTransport, ReceiveRequest};
use crate::core::config::MAX_BATCH_SIZE;
use crate::core::models::{
    BatchSendOutcome, FailedSend, MessageAttribute, OutboundMessage, ReceivedMessage, SendReceipt,
};
use crate::errors::SqsError;

#[derive(Debug, Clone)]
pub struct AwsSqsTransport {
    client: SqsClient,
}

impl AwsSqsTransport {
    #[must_use]
    pub fn new(client: SqsClient) -> Self {
        Self { client }
    }

    /// Build a client from the ambient AWS configuration (env, profile, IMDS).
    ///
    /// `endpoint_url` overrides the service endpoint, e.g. for LocalStack.
    pub async fn from_env(endpoint_url: Option<&str>) -> Self {
        let shared_config = aws_config::from_env().load().await;
        let client = match endpoint_url {
            Some(url) => {
                debug!(endpoint_url = %url, "Using custom SQS endpoint");
                let config = aws_sdk_sqs::config::Builder::from(&shared_config)
                    .endpoint_url(url)
                    .build();
                SqsClient::from_conf(config)
            }
            None => SqsClient::new(&shared_config),
        };
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &SqsClient {
        &self.client
    }
}

fn to_sdk_attribute(attribute: &MessageAttribute) -> Result<MessageAttributeValue, SqsError> {
    Ok(MessageAttributeValue::builder()
        .data_type(&attribute.data_type)
        .set_string_value(attribute.string_value.clone())
        .build()?)
}

fn from_sdk_message(message: &Message) -> ReceivedMessage {
    let attributes = message
        .attributes()
        .map(|attrs| {
            attrs
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                .collect()
        })
        .unwrap_or_default();

    let message_attributes = message
        .message_attributes()
        .map(|attrs| {
            attrs
                .iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        MessageAttribute {
                            data_type: v.data_type().to_string(),
                            string_value: v.string_value().map(str::to_string),
                        },
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    ReceivedMessage {
        message_id: message.message_id().unwrap_or_default().to_string(),
        receipt_handle: message.receipt_handle().unwrap_or_default().to_string(),
        body: message.body().unwrap_or_default().to_string(),
        attributes,
        message_attributes,
    }
}

fn batch_size() -> usize {
    usize::try_from(MAX_BATCH_SIZE).unwrap_or(10)
}

#[async_trait]
impl QueueTransport for AwsSqsTransport {
    async fn receive(
        &self,
        queue_url: &str,
        request: &ReceiveRequest,
    ) -> Result<Vec<ReceivedMessage>, SqsError> {
        let mut call = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(request.max_messages)
            .wait_time_seconds(request.wait_time_seconds)
            .set_visibility_timeout(request.visibility_timeout);

        for name in &request.attribute_names {
            call = call.message_system_attribute_names(MessageSystemAttributeName::from(
                name.as_str(),
            ));
        }
        for name in &request.message_attribute_names {
            call = call.message_attribute_names(name);
        }

        let output = call.send().await?;
        Ok(output.messages().iter().map(from_sdk_message).collect())
    }

    async fn delete(&self, queue_url: &str, messages: &[ReceivedMessage]) -> Result<(), SqsError> {
        for chunk in messages.chunks(batch_size()) {
            let entries = chunk
                .iter()
                .enumerate()
                .map(|(i, message)| {
                    DeleteMessageBatchRequestEntry::builder()
                        .id(i.to_string())
                        .receipt_handle(&message.receipt_handle)
                        .build()
                })
                .collect::<Result<Vec<_>, _>>()?;

            let output = self
                .client
                .delete_message_batch()
                .queue_url(queue_url)
                .set_entries(Some(entries))
                .send()
                .await?;

            if !output.failed().is_empty() {
                let codes: Vec<&str> = output.failed().iter().map(|f| f.code()).collect();
                warn!(queue_url, ?codes, "Some messages could not be deleted");
                return Err(SqsError::AwsError(format!(
                    "Failed to delete {} message(s): {}",
                    codes.len(),
                    codes.join(", ")
                )));
            }
        }
        Ok(())
    }

    async fn change_visibility(
        &self,
        queue_url: &str,
        messages: &[ReceivedMessage],
        visibility_timeout: i32,
    ) -> Result<(), SqsError> {
        for chunk in messages.chunks(batch_size()) {
            let entries = chunk
                .iter()
                .enumerate()
                .map(|(i, message)| {
                    ChangeMessageVisibilityBatchRequestEntry::builder()
                        .id(i.to_string())
                        .receipt_handle(&message.receipt_handle)
                        .visibility_timeout(visibility_timeout)
                        .build()
                })
                .collect::<Result<Vec<_>, _>>()?;

            self.client
                .change_message_visibility_batch()
                .queue_url(queue_url)
                .set_entries(Some(entries))
                .send()
                .await?;
        }
        Ok(())
    }

    async fn send_batch(
        &self,
        queue_url: &str,
        messages: &[OutboundMessage],
    ) -> Result<BatchSendOutcome, SqsError> {
        let mut entries = Vec::with_capacity(messages.len());
        for message in messages {
            let attributes = if message.message_attributes.is_empty() {
                None
            } else {
                Some(
                    message
                        .message_attributes
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), to_sdk_attribute(v)?)))
                        .collect::<Result<HashMap<_, _>, SqsError>>()?,
                )
            };

            entries.push(
                SendMessageBatchRequestEntry::builder()
                    .id(&message.id)
                    .message_body(&message.body)
                    .set_delay_seconds(message.delay_seconds)
                    .set_message_group_id(message.group_id.clone())
                    .set_message_deduplication_id(message.deduplication_id.clone())
                    .set_message_attributes(attributes)
                    .build()?,
            );
        }

        let output = self
            .client
            .send_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await?;

        Ok(BatchSendOutcome {
            successful: output
                .successful()
                .iter()
                .map(|entry| SendReceipt {
                    id: entry.id().to_string(),
                    message_id: entry.message_id().to_string(),
                })
                .collect(),
            failed: output
                .failed()
                .iter()
                .map(|entry| FailedSend {
                    id: entry.id().to_string(),
                    code: entry.code().to_string(),
                    message: entry.message().map(str::to_string),
                    sender_fault: entry.sender_fault(),
                })
                .collect(),
        })
    }

    async fn purge(&self, queue_url: &str) -> Result<(), SqsError> {
        self.client.purge_queue().queue_url(queue_url).send().await?;
        Ok(())
    }

    async fn queue_attributes(&self, queue_url: &str) -> Result<HashMap<String, String>, SqsError> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(queue_url)
            .attribute_names(QueueAttributeName::All)
            .send()
            .await?;

        Ok(output
            .attributes()
            .map(|attrs| {
                attrs
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
