//! Tracing subscriber setup.

use tracing_subscriber::filter::{EnvFilter, LevelFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Install the global subscriber: INFO unless `RUST_LOG` says otherwise,
/// written to stderr. Later calls are ignored.
pub fn init_logging(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        // Disable colours on release builds
        .with_ansi(cfg!(debug_assertions));

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
