//! Queue gateway between the edge controllers and the apiserver.
//!
//! The edge publishes through a [`Producer`]; the apiserver consumes through
//! a [`Receiver`], which polls a [`QueueClient`] and fans every message out to
//! a [`MessageHandler`] task.

pub mod client;
pub mod envelope;
pub mod errors;
pub mod memory;
pub mod metrics_defs;
pub mod producer;
pub mod receiver;
pub mod sqs;

pub use client::{QueueClient, ReceiveSettings};
pub use envelope::{Envelope, OutgoingMessage};
pub use errors::QueueError;
pub use memory::MemoryQueue;
pub use producer::Producer;
pub use receiver::{MessageHandler, Receiver, ReceiverConfig};
pub use sqs::{SqsConfig, SqsQueue};
