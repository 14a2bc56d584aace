use tracing_subscriber::EnvFilter;

/// Filter for the long-running server when `RUST_LOG` is unset.
pub const SERVER_FILTER: &str = "pathlease=info";
/// One-shot commands stay quiet so stderr carries only the error JSON.
pub const CLI_FILTER: &str = "pathlease=error";
pub const VERBOSE_FILTER: &str = "pathlease=debug";

/// Install the global subscriber writing to stderr, so stdout stays pure
/// JSON. `RUST_LOG` wins over `default_filter`. Safe to call more than once.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
