//! Tracing/logging initialization.

/// Install a `tracing-subscriber` with env-filter support (`RUST_LOG`),
/// defaulting to `info` for this crate and `warn` elsewhere.
pub fn init() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,verity=debug,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
