use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),

    #[error("DynamoDB {operation} failed: {reason}")]
    Backend {
        operation: &'static str,
        reason: String,
    },

    #[error("DynamoDB {0} timed out")]
    Timeout(&'static str),

    #[error("Malformed row {name}: {reason}")]
    MalformedRow { name: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }
}
