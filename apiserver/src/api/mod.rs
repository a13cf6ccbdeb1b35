//! HTTP surface of the apiserver.
//!
//! Operational endpoints are public. Everything under `/api/v1` and
//! `/api/v2` requires a bearer token; v2 is also rate limited per caller.
//! The response cache sits innermost so that cached responses are still
//! authenticated and counted against the caller's rate limit.

mod clusters;
mod health;
mod services;
mod swagger;

use crate::auth::{TokenVerifier, require_bearer};
use crate::cache::{ResponseCache, cache_middleware};
use crate::errors::ApiError;
use crate::metrics_defs::HTTP_REQUEST_DURATION;
use crate::patch_router::EdgePatcher;
use crate::rate_limiter::{RateLimiter, rate_limit};
use axum::Router;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use model::ClusterSpec;
use queue::QueueClient;
use serde::Serialize;
use shared::histogram;
use std::sync::Arc;
use std::time::Instant;
use store::ClusterStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_LIMIT: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ClusterStore>,
    pub queue: Arc<dyn QueueClient>,
    pub patcher: Arc<dyn EdgePatcher>,
    /// Group whose members may PATCH clusters.
    pub authorized_group_id: String,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Looks a cluster up by name, retrying with the expanded form of a
    /// short name.
    async fn find_cluster(&self, name: &str) -> Result<ClusterSpec, ApiError> {
        if let Some(spec) = self.store.get_cluster(name).await? {
            return Ok(spec);
        }
        let not_found = || ApiError::NotFound(format!("cluster {name} not found"));
        let Ok(expanded) = model::shortname::expand(name) else {
            return Err(not_found());
        };
        self.store.get_cluster(&expanded).await?.ok_or_else(not_found)
    }
}

/// Middleware shared by the authenticated routes.
pub struct Guards {
    pub verifier: Arc<dyn TokenVerifier>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub cache: Arc<ResponseCache>,
}

/// Body of the list endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterList {
    pub items: Vec<ClusterSpec>,
    pub items_count: usize,
    pub offset: usize,
    pub limit: usize,
    pub more: bool,
}

pub fn router(state: AppState, guards: Guards) -> Router {
    let auth = middleware::from_fn_with_state(guards.verifier, require_bearer);
    let cache = middleware::from_fn_with_state(guards.cache, cache_middleware);

    let v1 = clusters::v1_routes()
        .layer(cache.clone())
        .layer(auth.clone());

    let mut v2 = clusters::v2_routes()
        .merge(services::routes())
        .layer(cache);
    if let Some(limiter) = guards.rate_limiter {
        v2 = v2.layer(middleware::from_fn_with_state(limiter, rate_limit));
    }
    let v2 = v2.layer(auth);

    Router::new()
        .merge(health::routes())
        .route("/api/swagger/doc.json", get(swagger::doc))
        .nest("/api/v1", v1)
        .nest("/api/v2", v2)
        .route_layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    histogram!(
        HTTP_REQUEST_DURATION,
        "method" => method,
        "route" => route,
        "status" => response.status().as_u16().to_string()
    )
    .record(start.elapsed().as_secs_f64());
    response
}

#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<(), ServeError> {
    tracing::info!(addr = ?listener.local_addr().ok(), "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("HTTP server stopped");
    Ok(())
}
