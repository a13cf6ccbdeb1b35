//! Long-poll receiver with a bounded number of concurrent handlers.
//!
//! A single poller fetches batches and spawns one task per message. While
//! every handler slot is taken the poller backs off for `busy_timeout`
//! instead of fetching more work. Messages are never deleted here: the
//! handler decides, so a failed message reappears once its visibility
//! timeout expires.

use crate::client::{QueueClient, ReceiveSettings};
use crate::envelope::Envelope;
use crate::errors::QueueError;
use crate::metrics_defs::{HANDLER_FAILURES, HANDLERS_IN_FLIGHT, MESSAGES_RECEIVED, RECEIVER_BUSY};
use async_trait::async_trait;
use shared::{counter, gauge};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Error: Display + Send;

    /// Must be idempotent: the same message can be delivered more than once.
    async fn handle(&self, envelope: Envelope) -> Result<(), Self::Error>;
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReceiverConfig {
    pub batch_size: i32,
    pub wait_seconds: i32,
    pub visibility_timeout: i32,
    pub max_handlers: usize,
    pub busy_timeout: Duration,
    pub run_interval: Duration,
    pub run_once: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            batch_size: 1,
            wait_seconds: 20,
            visibility_timeout: 120,
            max_handlers: 50,
            busy_timeout: Duration::from_secs(1),
            run_interval: Duration::ZERO,
            run_once: false,
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<(), QueueError> {
        if !(1..=10).contains(&self.batch_size) {
            return Err(QueueError::InvalidConfig(format!(
                "batch size {} not in [1, 10]",
                self.batch_size
            )));
        }
        if !(0..=20).contains(&self.wait_seconds) {
            return Err(QueueError::InvalidConfig(format!(
                "wait seconds {} not in [0, 20]",
                self.wait_seconds
            )));
        }
        if !(0..=43200).contains(&self.visibility_timeout) {
            return Err(QueueError::InvalidConfig(format!(
                "visibility timeout {} not in [0, 43200]",
                self.visibility_timeout
            )));
        }
        if self.max_handlers == 0 {
            return Err(QueueError::InvalidConfig("max handlers cannot be 0".into()));
        }
        Ok(())
    }

    fn receive_settings(&self) -> ReceiveSettings {
        ReceiveSettings {
            batch_size: self.batch_size,
            wait_seconds: self.wait_seconds,
            visibility_timeout: self.visibility_timeout,
        }
    }
}

pub struct Receiver<H> {
    client: Arc<dyn QueueClient>,
    handler: Arc<H>,
    config: ReceiverConfig,
}

impl<H: MessageHandler> Receiver<H> {
    pub fn new(
        client: Arc<dyn QueueClient>,
        handler: Arc<H>,
        config: ReceiverConfig,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Receiver {
            client,
            handler,
            config,
        })
    }

    /// Polls until `shutdown` is cancelled (or after one cycle with
    /// `run_once`), then waits for every spawned handler to finish.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut handlers: JoinSet<()> = JoinSet::new();
        let settings = self.config.receive_settings();
        tracing::info!(
            batch_size = settings.batch_size,
            max_handlers = self.config.max_handlers,
            "Receiver started"
        );

        loop {
            while let Some(joined) = handlers.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!("Handler task panicked: {}", e);
                }
            }
            gauge!(HANDLERS_IN_FLIGHT).set(handlers.len() as f64);

            if handlers.len() >= self.config.max_handlers {
                counter!(RECEIVER_BUSY).increment(1);
                if self.pause(self.config.busy_timeout, &shutdown).await {
                    break;
                }
                continue;
            }

            let received = tokio::select! {
                received = self.client.receive(settings) => received,
                _ = shutdown.cancelled() => break,
            };

            match received {
                Ok(messages) => {
                    counter!(MESSAGES_RECEIVED).increment(messages.len() as u64);
                    for envelope in messages {
                        self.spawn_handler(&mut handlers, envelope);
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive messages");
                    if !self.config.run_once && self.pause(self.config.busy_timeout, &shutdown).await {
                        break;
                    }
                }
            }

            if self.config.run_once {
                break;
            }
            if !self.config.run_interval.is_zero()
                && self.pause(self.config.run_interval, &shutdown).await
            {
                break;
            }
        }

        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Handler task panicked: {}", e);
            }
        }
        gauge!(HANDLERS_IN_FLIGHT).set(0.0);
        tracing::info!("Receiver stopped");
    }

    fn spawn_handler(&self, handlers: &mut JoinSet<()>, envelope: Envelope) {
        let handler = self.handler.clone();
        handlers.spawn(async move {
            let message_id = envelope.message_id.clone();
            let event_type = envelope.event_type.clone();
            if let Err(e) = handler.handle(envelope).await {
                counter!(HANDLER_FAILURES, "type" => event_type.clone()).increment(1);
                tracing::error!(
                    message_id = %message_id,
                    event_type = %event_type,
                    error = %e,
                    "Message handler failed"
                );
            }
        });
    }

    /// Sleeps for `duration`; returns true when shutdown was requested.
    async fn pause(&self, duration: Duration, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = shutdown.cancelled() => true,
        }
    }
}
