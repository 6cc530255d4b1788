use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "deepseek_chat=info,tower_http=info";

/// Installs the global fmt subscriber. `RUST_LOG` wins over the default
/// filter. Safe to call more than once.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
