use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,tabflow=info,tabflow_flow=info";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default filter. Logs go to stderr, so that
/// the tables printed on stdout stay clean.
pub fn configure_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_line_number(true)
        .with_file(true)
        .with_target(false)
        .with_env_filter(filter)
        .init()
}
