use agent::config::{ClusterControllerConfig, DEFAULT_CA_BUNDLE_PATH, DEFAULT_NAMESPACE, SyncControllerConfig};
use apiserver::config::{
    AuthSettings, CacheSettings, Config, IngestSettings, Listener, PatchSettings, QueueSettings,
    RateLimiterSettings, StoreSettings, UnknownEventPolicy,
};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use queue::{ReceiverConfig, SqsConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "cluster-registry", version, about = "Inventory of a fleet of compute clusters")]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API and ingest cluster events from the queue.
    Apiserver(ApiserverArgs),
    /// Replicate this cluster's descriptor to the registry.
    ClusterController(ClusterControllerArgs),
    /// Project watched resources into partial cluster updates.
    SyncController(SyncControllerArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Args, Debug)]
pub struct LoggingArgs {
    #[arg(long, env = "SENTRY_DSN", global = true)]
    pub sentry_dsn: Option<String>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// `EnvFilter` directives.
    #[arg(long, env = "RUST_LOG", default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Args, Debug)]
pub struct QueueArgs {
    #[arg(long, env = "SQS_QUEUE_NAME")]
    pub queue_name: String,

    #[arg(long, env = "SQS_AWS_REGION")]
    pub queue_region: Option<String>,

    #[arg(long, env = "SQS_ENDPOINT")]
    pub queue_endpoint: Option<String>,
}

impl From<QueueArgs> for SqsConfig {
    fn from(args: QueueArgs) -> Self {
        SqsConfig {
            queue_name: args.queue_name,
            region: args.queue_region,
            endpoint: args.queue_endpoint,
        }
    }
}

#[derive(Args, Debug)]
pub struct ReceiverArgs {
    #[arg(long, env = "SQS_BATCH_SIZE", default_value_t = 1)]
    pub batch_size: i32,

    #[arg(long, env = "SQS_WAIT_SECONDS", default_value_t = 20)]
    pub wait_seconds: i32,

    #[arg(long, env = "SQS_VISIBILITY_TIMEOUT", default_value_t = 120)]
    pub visibility_timeout: i32,

    #[arg(long, env = "SQS_MAX_HANDLERS", default_value_t = 50)]
    pub max_handlers: usize,

    #[arg(long, env = "SQS_BUSY_TIMEOUT_MS", default_value_t = 1000)]
    pub busy_timeout_ms: u64,

    #[arg(long, env = "SQS_RUN_INTERVAL_MS", default_value_t = 0)]
    pub run_interval_ms: u64,
}

impl From<ReceiverArgs> for ReceiverConfig {
    fn from(args: ReceiverArgs) -> Self {
        ReceiverConfig {
            batch_size: args.batch_size,
            wait_seconds: args.wait_seconds,
            visibility_timeout: args.visibility_timeout,
            max_handlers: args.max_handlers,
            busy_timeout: Duration::from_millis(args.busy_timeout_ms),
            run_interval: Duration::from_millis(args.run_interval_ms),
            run_once: false,
        }
    }
}

#[derive(Args, Debug)]
pub struct ApiserverArgs {
    #[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "DB_TABLE_NAME")]
    pub db_table_name: String,

    #[arg(long, env = "DB_INDEX_NAME")]
    pub db_index_name: String,

    #[arg(long, env = "DB_AWS_REGION")]
    pub db_region: Option<String>,

    #[arg(long, env = "DB_ENDPOINT")]
    pub db_endpoint: Option<String>,

    #[command(flatten)]
    pub queue: QueueArgs,

    #[command(flatten)]
    pub receiver: ReceiverArgs,

    #[arg(long, env = "OIDC_ISSUER_URL")]
    pub oidc_issuer_url: String,

    #[arg(long, env = "OIDC_CLIENT_ID")]
    pub oidc_client_id: String,

    #[arg(long, env = "API_AUTHORIZED_GROUP_ID", default_value = "")]
    pub authorized_group_id: String,

    #[arg(long, env = "API_RATE_LIMITER", default_value_t = true, action = ArgAction::Set)]
    pub rate_limiter: bool,

    #[arg(long, env = "API_RATE_LIMIT_RPS", default_value_t = 2.0)]
    pub rate_limit_rps: f64,

    #[arg(long, env = "API_RATE_LIMIT_BURST", default_value_t = 120)]
    pub rate_limit_burst: u32,

    /// Response cache TTL in seconds; 0 disables caching.
    #[arg(long, env = "API_CACHE_TTL", default_value_t = 60)]
    pub cache_ttl: u64,

    #[arg(long, env = "API_CACHE_REDIS_HOST")]
    pub cache_redis_host: Option<String>,

    #[arg(long, env = "API_TENANT_ID", default_value = "")]
    pub tenant_id: String,

    #[arg(long, env = "API_CLIENT_ID", default_value = "")]
    pub client_id: String,

    #[arg(long, env = "API_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    pub client_secret: String,

    #[arg(long, env = "API_AUTHORITY_HOST", default_value = "https://login.microsoftonline.com")]
    pub authority_host: String,

    #[arg(long, env = "K8S_RESOURCE_ID")]
    pub k8s_resource_id: String,

    #[arg(long, env = "INGEST_UNKNOWN_EVENT_POLICY", default_value = "skip")]
    pub unknown_event_policy: UnknownEventPolicy,

    #[arg(long, env = "INGEST_APPLY_PARTIAL_UPDATES", default_value_t = false, action = ArgAction::Set)]
    pub apply_partial_updates: bool,
}

impl From<ApiserverArgs> for Config {
    fn from(args: ApiserverArgs) -> Self {
        Config {
            listener: Listener {
                host: args.host,
                port: args.port,
            },
            store: StoreSettings {
                table_name: args.db_table_name,
                index_name: args.db_index_name,
                region: args.db_region,
                endpoint: args.db_endpoint,
            },
            queue: QueueSettings {
                queue_name: args.queue.queue_name,
                region: args.queue.queue_region,
                endpoint: args.queue.queue_endpoint,
                receiver: args.receiver.into(),
            },
            auth: AuthSettings {
                issuer_url: args.oidc_issuer_url,
                client_id: args.oidc_client_id,
                authorized_group_id: args.authorized_group_id,
            },
            rate_limiter: RateLimiterSettings {
                enabled: args.rate_limiter,
                requests_per_second: args.rate_limit_rps,
                burst: args.rate_limit_burst,
                ..Default::default()
            },
            cache: CacheSettings {
                ttl: Duration::from_secs(args.cache_ttl),
                redis_host: args.cache_redis_host.filter(|h| !h.is_empty()),
            },
            patch: PatchSettings {
                tenant_id: args.tenant_id,
                client_id: args.client_id,
                client_secret: args.client_secret,
                resource_id: args.k8s_resource_id,
                authority_host: args.authority_host,
            },
            ingest: IngestSettings {
                unknown_event_policy: args.unknown_event_policy,
                apply_partial_updates: args.apply_partial_updates,
            },
        }
    }
}

#[derive(Args, Debug)]
pub struct ClusterControllerArgs {
    #[arg(long, env = "CLUSTER_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    #[arg(long, env = "CA_BUNDLE_PATH", default_value = DEFAULT_CA_BUNDLE_PATH)]
    pub ca_bundle_path: PathBuf,

    #[arg(long, env = "CONTROLLER_CONCURRENCY", default_value_t = 10)]
    pub concurrency: u16,

    #[command(flatten)]
    pub queue: QueueArgs,
}

impl From<ClusterControllerArgs> for ClusterControllerConfig {
    fn from(args: ClusterControllerArgs) -> Self {
        ClusterControllerConfig {
            namespace: args.namespace,
            ca_bundle_path: args.ca_bundle_path,
            concurrency: args.concurrency,
            queue: args.queue.into(),
        }
    }
}

#[derive(Args, Debug)]
pub struct SyncControllerArgs {
    #[arg(long, env = "SYNC_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    #[arg(long, env = "CONTROLLER_CONCURRENCY", default_value_t = 10)]
    pub concurrency: u16,

    #[command(flatten)]
    pub queue: QueueArgs,
}

impl From<SyncControllerArgs> for SyncControllerConfig {
    fn from(args: SyncControllerArgs) -> Self {
        SyncControllerConfig {
            namespace: args.namespace,
            concurrency: args.concurrency,
            queue: args.queue.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const APISERVER: &[&str] = &[
        "cluster-registry",
        "apiserver",
        "--db-table-name",
        "cluster-registry",
        "--db-index-name",
        "search-index",
        "--queue-name",
        "cluster-registry-local",
        "--oidc-issuer-url",
        "https://sts.windows.net/tenant/",
        "--oidc-client-id",
        "client",
        "--k8s-resource-id",
        "k8s-resource",
    ];

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apiserver_defaults() {
        let cli = Cli::try_parse_from(APISERVER).unwrap();
        let Command::Apiserver(args) = cli.command else {
            panic!("expected apiserver");
        };
        let config = Config::from(args);

        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert!(config.cache.redis_host.is_none());
        assert!(config.rate_limiter.enabled);
        assert_eq!(config.rate_limiter.burst, 120);
        assert_eq!(config.queue.receiver, ReceiverConfig::default());
        assert_eq!(config.ingest.unknown_event_policy, UnknownEventPolicy::Skip);
        assert!(!config.ingest.apply_partial_updates);
    }

    #[test]
    fn test_apiserver_overrides() {
        let mut argv = APISERVER.to_vec();
        argv.extend([
            "--rate-limiter",
            "false",
            "--cache-ttl",
            "0",
            "--unknown-event-policy",
            "delete",
            "--apply-partial-updates",
            "true",
            "--batch-size",
            "10",
        ]);
        let cli = Cli::try_parse_from(argv).unwrap();
        let Command::Apiserver(args) = cli.command else {
            panic!("expected apiserver");
        };
        let config = Config::from(args);

        assert!(!config.rate_limiter.enabled);
        assert_eq!(config.cache.ttl, Duration::ZERO);
        assert_eq!(config.ingest.unknown_event_policy, UnknownEventPolicy::Delete);
        assert!(config.ingest.apply_partial_updates);
        assert_eq!(config.queue.receiver.batch_size, 10);
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let mut argv = APISERVER.to_vec();
        argv.extend(["--unknown-event-policy", "drop"]);
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_cluster_controller_defaults() {
        let cli = Cli::try_parse_from([
            "cluster-registry",
            "cluster-controller",
            "--queue-name",
            "cluster-registry-local",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.logging.log_format, LogFormat::Json);

        let Command::ClusterController(args) = cli.command else {
            panic!("expected cluster-controller");
        };
        let config = ClusterControllerConfig::from(args);
        assert_eq!(config.namespace, "cluster-registry");
        assert_eq!(config.ca_bundle_path, PathBuf::from(DEFAULT_CA_BUNDLE_PATH));
        assert_eq!(config.concurrency, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sync_controller() {
        let cli = Cli::try_parse_from([
            "cluster-registry",
            "sync-controller",
            "--queue-name",
            "cluster-registry-local",
            "--namespace",
            "registry-sync",
            "--concurrency",
            "4",
        ])
        .unwrap();
        let Command::SyncController(args) = cli.command else {
            panic!("expected sync-controller");
        };
        let config = SyncControllerConfig::from(args);
        assert_eq!(config.namespace, "registry-sync");
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.queue.queue_name, "cluster-registry-local");
    }
}
