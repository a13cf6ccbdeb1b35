use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use store::StoreError;
use thiserror::Error;

/// Errors surfaced by HTTP handlers, rendered as `{"errors": {"body": msg}}`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("missing bearer token")]
    MissingToken,

    #[error("token verification failed: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::MissingToken => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) | ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Store(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            ApiError::Store(_) | ApiError::Upstream(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = json!({"errors": {"body": self.to_string()}});
        (status, Json(body)).into_response()
    }
}

impl From<model::FilterError> for ApiError {
    fn from(e: model::FilterError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

/// Errors of the ingestion pipeline. Every variant leaves the message on the
/// queue.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("malformed message body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error(transparent)]
    Model(#[from] model::ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] queue::QueueError),

    #[error("cluster {0} is not registered yet")]
    UnknownCluster(String),

    #[error("no handler for event type {0:?}")]
    UnhandledType(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_error_envelope() {
        let response = ApiError::Validation("invalid query".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"errors": {"body": "invalid query"}}));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::MissingToken.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::Store(StoreError::Validation("bad".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Store(StoreError::Timeout("Query")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
