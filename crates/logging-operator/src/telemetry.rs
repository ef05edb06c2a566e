use tracing_subscriber::{fmt, EnvFilter};

/// Initialize tracing with the given log level.
///
/// `RUST_LOG` wins when set; otherwise `log_level` is used as the filter.
pub fn init(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
