use crate::envelope::{Envelope, OutgoingMessage};
use crate::errors::QueueError;
use async_trait::async_trait;

/// Long-poll parameters for a single receive call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReceiveSettings {
    pub batch_size: i32,
    pub wait_seconds: i32,
    pub visibility_timeout: i32,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        ReceiveSettings {
            batch_size: 1,
            wait_seconds: 20,
            visibility_timeout: 120,
        }
    }
}

/// Transport used by the producer and the receiver.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Enqueues a message and returns its id.
    async fn send(&self, message: OutgoingMessage) -> Result<String, QueueError>;

    async fn receive(&self, settings: ReceiveSettings) -> Result<Vec<Envelope>, QueueError>;

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Liveness probe for the readiness endpoint.
    async fn status(&self) -> Result<(), QueueError>;
}
