//! Tracing subscriber setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_level(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Install the global fmt subscriber. `RUST_LOG` wins over `debug`.
pub fn init(debug: bool) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level(debug).into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
