//! Ingestion of queue events into the store.
//!
//! The [`Dispatcher`] routes each message to the handler registered for its
//! `Type` attribute. A message is deleted only after its handler succeeded,
//! so every failure is retried once the visibility timeout expires.

pub mod cluster_update;
pub mod partial_update;

use crate::cache::{CLUSTERS_TAG, ResponseCache};
use crate::config::UnknownEventPolicy;
use crate::errors::IngestError;
use crate::metrics_defs::{INGEST_HANDLED, INGEST_SKIPPED, INGEST_UNHANDLED};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::ClusterSpec;
use model::time::{format_rfc3339_nano, parse_rfc3339};
use queue::{Envelope, MessageHandler, QueueClient};
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;

pub use cluster_update::ClusterUpdateHandler;
pub use partial_update::PartialUpdateHandler;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The store was written.
    Applied,
    /// A newer update was already stored.
    Skipped,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> &'static str;

    async fn handle(&self, envelope: &Envelope) -> Result<Outcome, IngestError>;
}

pub struct Dispatcher {
    handlers: HashMap<&'static str, Arc<dyn EventHandler>>,
    queue: Arc<dyn QueueClient>,
    cache: Arc<ResponseCache>,
    policy: UnknownEventPolicy,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn QueueClient>, cache: Arc<ResponseCache>, policy: UnknownEventPolicy) -> Self {
        Dispatcher {
            handlers: HashMap::new(),
            queue,
            cache,
            policy,
        }
    }

    pub fn register(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(handler.event_type(), handler);
        self
    }

    async fn unhandled(&self, envelope: &Envelope) -> Result<(), IngestError> {
        counter!(INGEST_UNHANDLED, "type" => envelope.event_type.clone()).increment(1);
        match self.policy {
            UnknownEventPolicy::Skip => Err(IngestError::UnhandledType(envelope.event_type.clone())),
            UnknownEventPolicy::Delete => {
                tracing::warn!(
                    message_id = %envelope.message_id,
                    event_type = %envelope.event_type,
                    "Deleting message with unhandled event type"
                );
                self.queue.delete(&envelope.receipt_handle).await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    type Error = IngestError;

    async fn handle(&self, envelope: Envelope) -> Result<(), IngestError> {
        let Some(handler) = self.handlers.get(envelope.event_type.as_str()) else {
            return self.unhandled(&envelope).await;
        };

        let outcome = handler.handle(&envelope).await?;
        self.queue.delete(&envelope.receipt_handle).await?;

        match outcome {
            Outcome::Applied => {
                counter!(INGEST_HANDLED, "type" => envelope.event_type.clone()).increment(1);
                if let Err(e) = self.cache.invalidate(CLUSTERS_TAG).await {
                    tracing::warn!(error = %e, "Failed to invalidate response cache");
                }
            }
            Outcome::Skipped => {
                counter!(INGEST_SKIPPED, "type" => envelope.event_type.clone()).increment(1);
                tracing::info!(
                    cluster = %envelope.cluster_name,
                    message_id = %envelope.message_id,
                    "Skipped stale update"
                );
            }
        }
        Ok(())
    }
}

/// Last-writer-wins admission on the broker send time.
///
/// Returns false when the stored row was written by a strictly newer
/// message. Otherwise stamps `lastUpdated` with `sent_at` and sets
/// `registeredAt` from the stored row, or from `sent_at` when the row has
/// none. Inbound `registeredAt` values are never kept.
pub(crate) fn admit(
    stored: Option<&ClusterSpec>,
    incoming: &mut ClusterSpec,
    sent_at: DateTime<Utc>,
) -> Result<bool, IngestError> {
    let sent = format_rfc3339_nano(sent_at);

    let registered_at = match stored {
        Some(stored) => {
            if !stored.last_updated.is_empty() && sent_at < parse_rfc3339(&stored.last_updated)? {
                return Ok(false);
            }
            stored.registered_at.clone()
        }
        None => String::new(),
    };
    incoming.registered_at = if registered_at.is_empty() {
        sent.clone()
    } else {
        registered_at
    };
    incoming.last_updated = sent;
    Ok(true)
}
