//! In-process queue with SQS-like visibility semantics.

use crate::client::{QueueClient, ReceiveSettings};
use crate::envelope::{Envelope, OutgoingMessage};
use crate::errors::QueueError;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct StoredMessage {
    envelope: Envelope,
    visible_at: Instant,
    receive_count: u32,
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
    messages: Mutex<VecDeque<StoredMessage>>,
    next_id: AtomicU64,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a message with an explicit broker timestamp.
    pub fn push_with_timestamp(&self, message: OutgoingMessage, sent_timestamp_ms: i64) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let envelope = Envelope {
            message_id: id.clone(),
            event_type: message.event_type,
            cluster_name: message.cluster_name,
            body: message.body,
            sent_timestamp: sent_timestamp_ms.to_string(),
            receipt_handle: String::new(),
        };
        let visible_at =
            Instant::now() + Duration::from_secs(u64::try_from(message.delay_seconds).unwrap_or(0));
        self.messages.lock().push_back(StoredMessage {
            envelope,
            visible_at,
            receive_count: 0,
        });
        self.notify.notify_waiters();
        id
    }

    /// Number of messages not yet deleted, visible or not.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every message not yet deleted.
    pub fn pending(&self) -> Vec<Envelope> {
        self.messages
            .lock()
            .iter()
            .map(|m| m.envelope.clone())
            .collect()
    }

    fn take_visible(&self, settings: ReceiveSettings) -> Vec<Envelope> {
        let now = Instant::now();
        let hidden_for = Duration::from_secs(u64::try_from(settings.visibility_timeout).unwrap_or(0));
        let limit = usize::try_from(settings.batch_size.max(1)).unwrap_or(1);

        let mut messages = self.messages.lock();
        let mut out = Vec::new();
        for stored in messages.iter_mut() {
            if out.len() >= limit {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            stored.receive_count += 1;
            stored.visible_at = now + hidden_for;
            stored.envelope.receipt_handle =
                format!("{}-{}", stored.envelope.message_id, stored.receive_count);
            out.push(stored.envelope.clone());
        }
        out
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn send(&self, message: OutgoingMessage) -> Result<String, QueueError> {
        Ok(self.push_with_timestamp(message, Utc::now().timestamp_millis()))
    }

    async fn receive(&self, settings: ReceiveSettings) -> Result<Vec<Envelope>, QueueError> {
        let wait = Duration::from_secs(u64::try_from(settings.wait_seconds).unwrap_or(0));
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            let batch = self.take_visible(settings);
            if !batch.is_empty() || Instant::now() >= deadline {
                return Ok(batch);
            }
            // Delayed or hidden messages become visible without a notification.
            let poll = Duration::from_millis(50);
            let _ = tokio::time::timeout(poll.min(deadline - Instant::now()), notified).await;
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|m| m.envelope.receipt_handle != receipt_handle);
        if messages.len() == before {
            return Err(QueueError::Delete(format!(
                "unknown receipt handle {receipt_handle}"
            )));
        }
        Ok(())
    }

    async fn status(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
