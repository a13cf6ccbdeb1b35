use super::AppState;
use crate::errors::ApiError;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use model::filter::Predicate;
use std::collections::BTreeMap;

/// namespace -> key -> value
type NamespaceMetadata = BTreeMap<String, BTreeMap<String, String>>;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/services/{service_id}", get(service_clusters))
        .route(
            "/services/{service_id}/cluster/{cluster_name}",
            get(service_cluster),
        )
}

/// Metadata of one service across every live cluster that carries it.
async fn service_clusters(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> Result<Json<BTreeMap<String, NamespaceMetadata>>, ApiError> {
    let clusters = state.store.query(&Predicate::not_deleted()).await?;
    let by_cluster = clusters
        .into_iter()
        .filter_map(|mut c| {
            let metadata = c.service_metadata.remove(&service_id)?;
            Some((c.name, metadata))
        })
        .collect();
    Ok(Json(by_cluster))
}

async fn service_cluster(
    State(state): State<AppState>,
    Path((service_id, cluster_name)): Path<(String, String)>,
) -> Result<Json<NamespaceMetadata>, ApiError> {
    let mut cluster = state.find_cluster(&cluster_name).await?;
    cluster
        .service_metadata
        .remove(&service_id)
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "service {service_id} has no metadata on cluster {}",
                cluster.name
            ))
        })
}
