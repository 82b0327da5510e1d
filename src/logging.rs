use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level so operators can raise
/// verbosity per-target without redeploying.
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .ok();
}
