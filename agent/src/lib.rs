//! Edge agent: the controllers that replicate a cluster's descriptor and
//! the resources projected into it to the registry queue.

pub mod cluster_controller;
pub mod config;
pub mod crd;
pub mod errors;
pub mod handlers;
pub mod metrics_defs;
pub mod selector;
pub mod sync_controller;

pub use errors::AgentError;

use crate::config::{ClusterControllerConfig, SyncControllerConfig};
use aws_config::BehaviorVersion;
use queue::{Producer, SqsConfig, SqsQueue};
use std::sync::Arc;

async fn producer(queue: SqsConfig) -> Result<Producer, AgentError> {
    let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let queue = SqsQueue::new(&sdk_config, queue).await?;
    Ok(Producer::new(Arc::new(queue)))
}

/// Runs the descriptor controller until a shutdown signal arrives.
pub async fn run_cluster_controller(config: ClusterControllerConfig) -> Result<(), AgentError> {
    config.validate()?;
    let client = kube::Client::try_default().await?;
    let producer = producer(config.queue.clone()).await?;
    cluster_controller::run(client, producer, config).await
}

/// Runs the sync controller until a shutdown signal arrives.
pub async fn run_sync_controller(config: SyncControllerConfig) -> Result<(), AgentError> {
    config.validate()?;
    let client = kube::Client::try_default().await?;
    let producer = producer(config.queue.clone()).await?;
    sync_controller::run(client, producer, config).await
}
