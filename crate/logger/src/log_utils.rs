use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOG_INIT: Once = Once::new();

/// Install the global tracing subscriber, once per process.
///
/// The filter is read from `RUST_LOG`; when it is not set, `default_value` is used
/// (e.g. `"info,tokensign_token=debug"`).
/// Later calls are no-ops, so every test may call it.
pub fn log_init(default_value: &str) {
    LOG_INIT.call_once(|| {
        let filter = match std::env::var("RUST_LOG") {
            Ok(current_value) if !current_value.is_empty() => EnvFilter::new(current_value),
            _ => EnvFilter::new(default_value),
        };
        tracing_setup(filter);
    });
}

/// Same as [`log_init`], with a filter that takes precedence over `RUST_LOG`
pub fn log_init_with_filter(filter: &str) {
    LOG_INIT.call_once(|| tracing_setup(EnvFilter::new(filter)));
}

fn tracing_setup(filter: EnvFilter) {
    let format = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .compact();

    // another subscriber may already be installed by the host application
    drop(
        tracing_subscriber::registry()
            .with(filter)
            .with(format)
            .try_init(),
    );
}

#[cfg(test)]
mod tests {
    use super::log_init;

    #[test]
    fn test_log_init_is_idempotent() {
        log_init("debug");
        log_init("info");
        tracing::debug!("logger initialized twice without panicking");
    }
}
