use queue::ReceiverConfig;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid URL for {field}: {value}")]
    InvalidUrl { field: &'static str, value: String },

    #[error("Rate limiter {0} must be positive")]
    InvalidRateLimit(&'static str),

    #[error("Invalid receiver settings: {0}")]
    Receiver(String),
}

/// What the dispatcher does with an event type it has no handler for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownEventPolicy {
    /// Log and leave the message to reappear after its visibility timeout.
    #[default]
    Skip,
    /// Log and delete the message.
    Delete,
}

impl std::str::FromStr for UnknownEventPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(UnknownEventPolicy::Skip),
            "delete" => Ok(UnknownEventPolicy::Delete),
            other => Err(format!("unknown event policy {other}, expected skip or delete")),
        }
    }
}

/// Apiserver configuration, resolved once at boot.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub listener: Listener,
    pub store: StoreSettings,
    pub queue: QueueSettings,
    pub auth: AuthSettings,
    pub rate_limiter: RateLimiterSettings,
    pub cache: CacheSettings,
    pub patch: PatchSettings,
    pub ingest: IngestSettings,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;

        if self.store.table_name.is_empty() {
            return Err(ValidationError::Missing("DB_TABLE_NAME"));
        }
        if self.store.index_name.is_empty() {
            return Err(ValidationError::Missing("DB_INDEX_NAME"));
        }
        validate_optional_url("DB_ENDPOINT", self.store.endpoint.as_deref())?;

        if self.queue.queue_name.is_empty() {
            return Err(ValidationError::Missing("SQS_QUEUE_NAME"));
        }
        validate_optional_url("SQS_ENDPOINT", self.queue.endpoint.as_deref())?;
        self.queue
            .receiver
            .validate()
            .map_err(|e| ValidationError::Receiver(e.to_string()))?;

        if self.auth.client_id.is_empty() {
            return Err(ValidationError::Missing("OIDC_CLIENT_ID"));
        }
        validate_url("OIDC_ISSUER_URL", &self.auth.issuer_url)?;

        if self.rate_limiter.enabled {
            if self.rate_limiter.requests_per_second <= 0.0 {
                return Err(ValidationError::InvalidRateLimit("rate"));
            }
            if self.rate_limiter.burst == 0 {
                return Err(ValidationError::InvalidRateLimit("burst"));
            }
        }

        if self.patch.resource_id.is_empty() {
            return Err(ValidationError::Missing("K8S_RESOURCE_ID"));
        }
        validate_url("API_AUTHORITY_HOST", &self.patch.authority_host)?;

        Ok(())
    }
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ValidationError> {
    Url::parse(value).map_err(|_| ValidationError::InvalidUrl {
        field,
        value: value.to_string(),
    })?;
    Ok(())
}

fn validate_optional_url(field: &'static str, value: Option<&str>) -> Result<(), ValidationError> {
    match value {
        Some(v) if !v.is_empty() => validate_url(field, v),
        _ => Ok(()),
    }
}

/// Network listener configuration
#[derive(Clone, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreSettings {
    pub table_name: String,
    pub index_name: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueueSettings {
    pub queue_name: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub receiver: ReceiverConfig,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthSettings {
    pub issuer_url: String,
    pub client_id: String,
    /// Group whose members may PATCH clusters.
    pub authorized_group_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RateLimiterSettings {
    pub enabled: bool,
    pub requests_per_second: f64,
    pub burst: u32,
    /// Idle buckets are forgotten after this long.
    pub window: Duration,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        RateLimiterSettings {
            enabled: true,
            requests_per_second: 2.0,
            burst: 120,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CacheSettings {
    /// Zero disables response caching.
    pub ttl: Duration,
    /// `host:port` of a Redis server; the in-memory cache is used when unset.
    pub redis_host: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            ttl: Duration::from_secs(60),
            redis_host: None,
        }
    }
}

/// Service principal used to call edge cluster APIs.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchSettings {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Audience of the edge cluster APIs.
    pub resource_id: String,
    pub authority_host: String,
}

impl Default for PatchSettings {
    fn default() -> Self {
        PatchSettings {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            resource_id: String::new(),
            authority_host: "https://login.microsoftonline.com".into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngestSettings {
    pub unknown_event_policy: UnknownEventPolicy,
    pub apply_partial_updates: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn valid_config() -> Config {
        Config {
            listener: Listener::default(),
            store: StoreSettings {
                table_name: "cluster-registry".into(),
                index_name: "search-index".into(),
                region: None,
                endpoint: Some("http://localhost:8000".into()),
            },
            queue: QueueSettings {
                queue_name: "cluster-registry-local".into(),
                ..Default::default()
            },
            auth: AuthSettings {
                issuer_url: "https://sts.windows.net/tenant/".into(),
                client_id: "client".into(),
                authorized_group_id: "group".into(),
            },
            rate_limiter: RateLimiterSettings::default(),
            cache: CacheSettings::default(),
            patch: PatchSettings {
                resource_id: "k8s-resource".into(),
                ..Default::default()
            },
            ingest: IngestSettings::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert_eq!(valid_config().validate(), Ok(()));
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = valid_config();
        config.listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = valid_config();
        config.store.table_name.clear();
        assert_eq!(config.validate(), Err(ValidationError::Missing("DB_TABLE_NAME")));

        let mut config = valid_config();
        config.auth.issuer_url = "not a url".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidUrl { field: "OIDC_ISSUER_URL", .. })
        ));

        let mut config = valid_config();
        config.rate_limiter.burst = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidRateLimit("burst")));

        let mut config = valid_config();
        config.queue.receiver.batch_size = 11;
        assert!(matches!(config.validate(), Err(ValidationError::Receiver(_))));
    }

    #[test]
    fn test_rate_limiter_disabled_skips_checks() {
        let mut config = valid_config();
        config.rate_limiter.enabled = false;
        config.rate_limiter.burst = 0;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_unknown_event_policy_parse() {
        assert_eq!("skip".parse::<UnknownEventPolicy>(), Ok(UnknownEventPolicy::Skip));
        assert_eq!("delete".parse::<UnknownEventPolicy>(), Ok(UnknownEventPolicy::Delete));
        assert!("drop".parse::<UnknownEventPolicy>().is_err());
    }
}
