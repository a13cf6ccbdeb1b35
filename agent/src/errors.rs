use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    Config(#[from] crate::config::ValidationError),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Queue(#[from] queue::QueueError),

    #[error(transparent)]
    Model(#[from] model::ModelError),

    #[error(transparent)]
    Merge(#[from] model::MergeError),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read CA bundle {path}: {source}")]
    CaBundle {
        path: String,
        source: std::io::Error,
    },

    #[error("{kind} {name} has no namespace")]
    MissingNamespace { kind: &'static str, name: String },

    #[error("no handler registered for {api_version}/{kind}")]
    UnknownResource { api_version: String, kind: String },

    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    #[error("{kind} {name}: {reason}")]
    Extract {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("timed out sending {0} event")]
    SendTimeout(&'static str),

    #[error("finalizer error: {0}")]
    Finalizer(String),
}

impl AgentError {
    pub(crate) fn extract(kind: &'static str, name: impl Into<String>, reason: impl Into<String>) -> Self {
        AgentError::Extract {
            kind,
            name: name.into(),
            reason: reason.into(),
        }
    }
}
