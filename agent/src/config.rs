use queue::SqsConfig;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "cluster-registry";
pub const DEFAULT_CA_BUNDLE_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
pub const DEFAULT_CONCURRENCY: u16 = 10;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Controller concurrency must be positive")]
    InvalidConcurrency,

    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },
}

/// Settings of the controller watching the cluster descriptor.
#[derive(Clone, Debug)]
pub struct ClusterControllerConfig {
    pub namespace: String,
    /// File whose contents are injected as `apiServer.certificateAuthorityData`.
    pub ca_bundle_path: PathBuf,
    pub concurrency: u16,
    pub queue: SqsConfig,
}

impl Default for ClusterControllerConfig {
    fn default() -> Self {
        ClusterControllerConfig {
            namespace: DEFAULT_NAMESPACE.into(),
            ca_bundle_path: PathBuf::from(DEFAULT_CA_BUNDLE_PATH),
            concurrency: DEFAULT_CONCURRENCY,
            queue: SqsConfig::default(),
        }
    }
}

impl ClusterControllerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.namespace.is_empty() {
            return Err(ValidationError::Missing("CLUSTER_NAMESPACE"));
        }
        if self.ca_bundle_path.as_os_str().is_empty() {
            return Err(ValidationError::Missing("CA_BUNDLE_PATH"));
        }
        validate_common(self.concurrency, &self.queue)
    }
}

/// Settings of the controller projecting watched resources into partial updates.
#[derive(Clone, Debug)]
pub struct SyncControllerConfig {
    pub namespace: String,
    pub concurrency: u16,
    pub queue: SqsConfig,
}

impl Default for SyncControllerConfig {
    fn default() -> Self {
        SyncControllerConfig {
            namespace: DEFAULT_NAMESPACE.into(),
            concurrency: DEFAULT_CONCURRENCY,
            queue: SqsConfig::default(),
        }
    }
}

impl SyncControllerConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.namespace.is_empty() {
            return Err(ValidationError::Missing("SYNC_NAMESPACE"));
        }
        validate_common(self.concurrency, &self.queue)
    }
}

fn validate_common(concurrency: u16, queue: &SqsConfig) -> Result<(), ValidationError> {
    if concurrency == 0 {
        return Err(ValidationError::InvalidConcurrency);
    }
    if queue.queue_name.is_empty() {
        return Err(ValidationError::Missing("SQS_QUEUE_NAME"));
    }
    if let Some(endpoint) = queue.endpoint.as_deref().filter(|e| !e.is_empty()) {
        let valid = endpoint.starts_with("http://") || endpoint.starts_with("https://");
        if !valid {
            return Err(ValidationError::InvalidUrl {
                field: "SQS_ENDPOINT",
                value: endpoint.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> SqsConfig {
        SqsConfig {
            queue_name: "cluster-registry-local".into(),
            region: None,
            endpoint: Some("http://localhost:9324".into()),
        }
    }

    #[test]
    fn test_defaults() {
        let config = ClusterControllerConfig::default();
        assert_eq!(config.namespace, "cluster-registry");
        assert_eq!(config.concurrency, 10);
        assert_eq!(
            config.ca_bundle_path,
            PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/ca.crt")
        );
    }

    #[test]
    fn test_validate() {
        let mut config = ClusterControllerConfig {
            queue: queue(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.concurrency = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidConcurrency));

        let mut sync = SyncControllerConfig {
            queue: queue(),
            ..Default::default()
        };
        assert!(sync.validate().is_ok());

        sync.queue.queue_name.clear();
        assert_eq!(sync.validate(), Err(ValidationError::Missing("SQS_QUEUE_NAME")));

        sync.queue = SqsConfig {
            endpoint: Some("localhost:9324".into()),
            ..queue()
        };
        assert!(matches!(
            sync.validate(),
            Err(ValidationError::InvalidUrl { field: "SQS_ENDPOINT", .. })
        ));
    }
}
