use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter: our own crate at `info`, or `debug` with `--verbose`.
pub fn default_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("{}={level}", env!("CARGO_CRATE_NAME"))
}

/// Install a stderr subscriber. `RUST_LOG` overrides the default filter.
pub fn init(verbose: bool) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(verbose));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry().with(stderr_layer).try_init();
}
