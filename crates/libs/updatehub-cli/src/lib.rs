use std::io;

use tracing_subscriber::EnvFilter;

/// Re-export tracing macros.
pub use tracing::{debug, error, info, trace, warn};

/// Default log filter if `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Initialize logging.
///
/// Records go to stderr without timestamps, the system logger adds those.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_target(false)
        .compact();
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .event_format(format)
        .init();
}
