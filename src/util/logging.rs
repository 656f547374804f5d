use tracing_subscriber::{fmt, EnvFilter};

/// Initializes tracing/logging. `RUST_LOG` overrides the default `info` filter;
/// `format` selects plain text or JSON lines.
pub fn init_tracing(format: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false);

    if format.eq_ignore_ascii_case("json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
