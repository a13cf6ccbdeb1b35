use chrono::{DateTime, Utc};
use model::ModelError;

/// Message attribute carrying the event type.
pub const TYPE_ATTRIBUTE: &str = "Type";
/// Message attribute carrying the cluster name.
pub const CLUSTER_NAME_ATTRIBUTE: &str = "ClusterName";

/// A message received from the queue.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub message_id: String,
    pub event_type: String,
    pub cluster_name: String,
    pub body: String,
    /// Broker assigned send time in milliseconds since the epoch. This is the
    /// ordering clock for last-writer-wins.
    pub sent_timestamp: String,
    pub receipt_handle: String,
}

impl Envelope {
    pub fn sent_at(&self) -> Result<DateTime<Utc>, ModelError> {
        model::time::parse_millis(&self.sent_timestamp)
    }
}

/// A message about to be enqueued.
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingMessage {
    pub event_type: String,
    pub cluster_name: String,
    pub body: String,
    pub delay_seconds: i32,
}
