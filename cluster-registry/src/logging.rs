use crate::cli::{LogFormat, LoggingArgs};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global subscriber. The returned guard flushes Sentry on drop
/// and must live until the process exits.
pub fn init(args: &LoggingArgs) -> Option<sentry::ClientInitGuard> {
    let guard = args.sentry_dsn.as_deref().filter(|dsn| !dsn.is_empty()).map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = args.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .with(guard.is_some().then(sentry::integrations::tracing::layer))
        .init();

    guard
}
