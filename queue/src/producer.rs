use crate::client::QueueClient;
use crate::envelope::OutgoingMessage;
use crate::errors::QueueError;
use crate::metrics_defs::MESSAGES_SENT;
use model::{ClusterSpec, EVENT_CLUSTER_UPDATE, EVENT_PARTIAL_CLUSTER_UPDATE};
use serde::Serialize;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;

/// Publishes typed events. Retrying is left to the caller.
#[derive(Clone)]
pub struct Producer {
    client: Arc<dyn QueueClient>,
}

impl Producer {
    pub fn new(client: Arc<dyn QueueClient>) -> Self {
        Producer { client }
    }

    /// Enqueues a `cluster-update` event carrying the full spec.
    pub async fn send(&self, spec: &ClusterSpec, delay: Option<Duration>) -> Result<String, QueueError> {
        self.send_event(EVENT_CLUSTER_UPDATE, &spec.name, spec, delay)
            .await
    }

    /// Enqueues a `partial-cluster-update` event carrying a merge patch.
    pub async fn send_patch(
        &self,
        cluster_name: &str,
        patch: &serde_json::Value,
        delay: Option<Duration>,
    ) -> Result<String, QueueError> {
        self.send_event(EVENT_PARTIAL_CLUSTER_UPDATE, cluster_name, patch, delay)
            .await
    }

    pub async fn send_event<T: Serialize + ?Sized>(
        &self,
        event_type: &str,
        cluster_name: &str,
        body: &T,
        delay: Option<Duration>,
    ) -> Result<String, QueueError> {
        let body = serde_json::to_string(body)?;
        let delay_seconds = delay
            .map(|d| i32::try_from(d.as_secs()).unwrap_or(i32::MAX))
            .unwrap_or(0);

        let id = self
            .client
            .send(OutgoingMessage {
                event_type: event_type.to_string(),
                cluster_name: cluster_name.to_string(),
                body,
                delay_seconds,
            })
            .await?;

        counter!(MESSAGES_SENT, "type" => event_type.to_string()).increment(1);
        tracing::debug!(message_id = %id, cluster = %cluster_name, event_type, "Message sent");
        Ok(id)
    }
}
