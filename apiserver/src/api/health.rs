use super::AppState;
use crate::errors::ApiError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/version", get(version))
}

async fn livez() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    if let Err(e) = state.store.status().await {
        tracing::warn!(error = %e, "Store is not ready");
        return Err(ApiError::Internal(format!("store is not ready: {e}")));
    }
    if let Err(e) = state.queue.status().await {
        tracing::warn!(error = %e, "Queue is not ready");
        return Err(ApiError::Internal(format!("queue is not ready: {e}")));
    }
    Ok("ok")
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

async fn version() -> Json<Value> {
    Json(json!({"version": env!("CARGO_PKG_VERSION")}))
}

#[cfg(test)]
mod tests {
    use crate::api::tests::test_app;
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_probes_are_public() {
        let app = test_app(None);
        assert_eq!(app.call(Method::GET, "/livez", None, None).await.0, StatusCode::OK);
        assert_eq!(app.call(Method::GET, "/readyz", None, None).await.0, StatusCode::OK);

        let (status, body) = app.call(Method::GET, "/version", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"version": env!("CARGO_PKG_VERSION")}));
    }
}
