//! Central apiserver: ingests cluster events from the queue into the store
//! and serves the read API over HTTP.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
pub mod ingest;
pub mod metrics_defs;
pub mod patch_router;
pub mod rate_limiter;

#[cfg(test)]
mod testutils;

use crate::api::{AppState, Guards};
use crate::auth::OidcVerifier;
use crate::cache::{CacheStore, MemoryCacheStore, RedisCacheStore, ResponseCache};
use crate::config::Config;
use crate::ingest::{ClusterUpdateHandler, Dispatcher, PartialUpdateHandler};
use crate::patch_router::KubePatchRouter;
use crate::rate_limiter::RateLimiter;
use aws_config::BehaviorVersion;
use metrics_exporter_prometheus::PrometheusHandle;
use queue::{QueueClient, Receiver, SqsConfig, SqsQueue};
use std::sync::Arc;
use std::time::Duration;
use store::{ClusterStore, DynamoDbConfig, DynamoDbStore};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const MEMORY_CACHE_CAPACITY: u64 = 10_000;
const STORE_TIMEOUT_MS: u64 = 10_000;

#[derive(thiserror::Error, Debug)]
pub enum ApiserverError {
    #[error("invalid configuration: {0}")]
    Config(#[from] config::ValidationError),

    #[error(transparent)]
    Queue(#[from] queue::QueueError),

    #[error(transparent)]
    Cache(#[from] cache::CacheError),

    #[error(transparent)]
    Api(#[from] errors::ApiError),

    #[error(transparent)]
    Serve(#[from] api::ServeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs the receiver and the HTTP server until `shutdown` is cancelled.
pub async fn run(
    config: Config,
    shutdown: CancellationToken,
    prometheus: Option<PrometheusHandle>,
) -> Result<(), ApiserverError> {
    config.validate()?;
    let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

    let store: Arc<dyn ClusterStore> = Arc::new(DynamoDbStore::new(
        &sdk_config,
        DynamoDbConfig {
            table_name: config.store.table_name.clone(),
            index_name: config.store.index_name.clone(),
            region: config.store.region.clone(),
            endpoint: config.store.endpoint.clone(),
            timeout_ms: Some(STORE_TIMEOUT_MS),
        },
    ));
    let queue: Arc<dyn QueueClient> = Arc::new(
        SqsQueue::new(
            &sdk_config,
            SqsConfig {
                queue_name: config.queue.queue_name.clone(),
                region: config.queue.region.clone(),
                endpoint: config.queue.endpoint.clone(),
            },
        )
        .await?,
    );

    let cache_store: Arc<dyn CacheStore> = match config.cache.redis_host.as_deref().filter(|h| !h.is_empty()) {
        Some(host) => {
            tracing::info!(host, "Using Redis response cache");
            Arc::new(RedisCacheStore::new(host)?)
        }
        None => Arc::new(MemoryCacheStore::new(MEMORY_CACHE_CAPACITY)),
    };
    let cache = Arc::new(ResponseCache::new(cache_store, config.cache.ttl));

    let mut dispatcher = Dispatcher::new(queue.clone(), cache.clone(), config.ingest.unknown_event_policy)
        .register(Arc::new(ClusterUpdateHandler::new(store.clone())));
    if config.ingest.apply_partial_updates {
        dispatcher = dispatcher.register(Arc::new(PartialUpdateHandler::new(store.clone())));
    }
    let receiver = Receiver::new(queue.clone(), Arc::new(dispatcher), config.queue.receiver.clone())?;

    let state = AppState {
        store,
        queue,
        patcher: Arc::new(KubePatchRouter::new(config.patch.clone())?),
        authorized_group_id: config.auth.authorized_group_id.clone(),
        prometheus,
    };
    let guards = Guards {
        verifier: Arc::new(OidcVerifier::new(&config.auth.issuer_url, &config.auth.client_id)),
        rate_limiter: config
            .rate_limiter
            .enabled
            .then(|| Arc::new(RateLimiter::new(&config.rate_limiter))),
        cache,
    };
    let app = api::router(state, guards);

    let addr = format!("{}:{}", config.listener.host, config.listener.port);
    let listener = TcpListener::bind(addr).await?;

    let receiver_shutdown = shutdown.clone();
    let receiver_task = tokio::spawn(async move {
        tracing::info!("Queue receiver started");
        receiver.run(receiver_shutdown).await;
        tracing::info!("Queue receiver stopped");
    });

    let served = api::serve(listener, app, shutdown.clone()).await;
    // stop the receiver too if the server failed on its own
    shutdown.cancel();
    if tokio::time::timeout(Duration::from_secs(30), receiver_task).await.is_err() {
        tracing::warn!("Queue receiver did not drain in time");
    }
    served?;
    Ok(())
}
