use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to resolve queue {name}: {reason}")]
    QueueUrl { name: String, reason: String },

    #[error("Failed to send message: {0}")]
    Send(String),

    #[error("Failed to receive messages: {0}")]
    Receive(String),

    #[error("Failed to delete message: {0}")]
    Delete(String),

    #[error("Queue status check failed: {0}")]
    Status(String),

    #[error("Queue status check timed out")]
    StatusTimeout,

    #[error("Failed to encode message body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid receiver config: {0}")]
    InvalidConfig(String),
}
