use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FilterError {
    #[error("invalid query")]
    InvalidQuery,

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

#[derive(Error, Debug, PartialEq)]
pub enum MergeError {
    #[error("cannot merge {src} into {dst} at {path}")]
    TypeMismatch {
        path: String,
        dst: &'static str,
        src: &'static str,
    },
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("invalid timestamp {0}")]
    InvalidTimestamp(String),

    #[error("{0} does not match the short name format")]
    NotAShortName(String),

    #[error("invalid {field} value: {value}")]
    InvalidEnum { field: &'static str, value: String },
}
