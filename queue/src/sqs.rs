use crate::client::{QueueClient, ReceiveSettings};
use crate::envelope::{CLUSTER_NAME_ATTRIBUTE, Envelope, OutgoingMessage, TYPE_ATTRIBUTE};
use crate::errors::QueueError;
use async_trait::async_trait;
use aws_sdk_sqs::Client;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{
    Message, MessageAttributeValue, MessageSystemAttributeName, QueueAttributeName,
};
use std::time::Duration;

const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, Default)]
pub struct SqsConfig {
    pub queue_name: String,
    /// Overrides the region of the shared SDK config.
    pub region: Option<String>,
    /// Endpoint override, e.g. a local SQS emulator.
    pub endpoint: Option<String>,
}

pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    /// Builds the client and resolves the queue URL. Failing to resolve the
    /// URL is fatal at boot.
    pub async fn new(sdk_config: &aws_config::SdkConfig, config: SqsConfig) -> Result<Self, QueueError> {
        let mut builder = aws_sdk_sqs::config::Builder::from(sdk_config);
        if let Some(region) = config.region.filter(|r| !r.is_empty()) {
            builder = builder.region(aws_sdk_sqs::config::Region::new(region));
        }
        if let Some(endpoint) = config.endpoint.filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(builder.build());

        let output = client
            .get_queue_url()
            .queue_name(&config.queue_name)
            .send()
            .await
            .map_err(|e| QueueError::QueueUrl {
                name: config.queue_name.clone(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        let queue_url = output
            .queue_url()
            .ok_or_else(|| QueueError::QueueUrl {
                name: config.queue_name.clone(),
                reason: "empty queue url".into(),
            })?
            .to_string();

        tracing::info!(queue_url = %queue_url, "Resolved SQS queue");
        Ok(Self::from_client(client, queue_url))
    }

    pub fn from_client(client: Client, queue_url: String) -> Self {
        SqsQueue { client, queue_url }
    }

    fn string_attribute(value: &str) -> Result<MessageAttributeValue, QueueError> {
        MessageAttributeValue::builder()
            .data_type("String")
            .string_value(value)
            .build()
            .map_err(|e| QueueError::Send(e.to_string()))
    }

    fn to_envelope(message: &Message) -> Envelope {
        let attribute = |name: &str| {
            message
                .message_attributes()
                .and_then(|attrs| attrs.get(name))
                .and_then(|value| value.string_value())
                .unwrap_or_default()
                .to_string()
        };
        let sent_timestamp = message
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::SentTimestamp))
            .cloned()
            .unwrap_or_default();

        Envelope {
            message_id: message.message_id().unwrap_or_default().to_string(),
            event_type: attribute(TYPE_ATTRIBUTE),
            cluster_name: attribute(CLUSTER_NAME_ATTRIBUTE),
            body: message.body().unwrap_or_default().to_string(),
            sent_timestamp,
            receipt_handle: message.receipt_handle().unwrap_or_default().to_string(),
        }
    }
}

#[async_trait]
impl QueueClient for SqsQueue {
    async fn send(&self, message: OutgoingMessage) -> Result<String, QueueError> {
        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(message.body)
            .delay_seconds(message.delay_seconds)
            .message_attributes(TYPE_ATTRIBUTE, Self::string_attribute(&message.event_type)?)
            .message_attributes(
                CLUSTER_NAME_ATTRIBUTE,
                Self::string_attribute(&message.cluster_name)?,
            )
            .send()
            .await
            .map_err(|e| QueueError::Send(DisplayErrorContext(&e).to_string()))?;

        Ok(output.message_id().unwrap_or_default().to_string())
    }

    async fn receive(&self, settings: ReceiveSettings) -> Result<Vec<Envelope>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(settings.batch_size)
            .wait_time_seconds(settings.wait_seconds)
            .visibility_timeout(settings.visibility_timeout)
            .message_attribute_names("All")
            .message_system_attribute_names(MessageSystemAttributeName::SentTimestamp)
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        Ok(output.messages().iter().map(Self::to_envelope).collect())
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn status(&self) -> Result<(), QueueError> {
        let request = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send();

        match tokio::time::timeout(STATUS_TIMEOUT, request).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(QueueError::Status(DisplayErrorContext(&e).to_string())),
            Err(_) => Err(QueueError::StatusTimeout),
        }
    }
}
