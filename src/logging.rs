use std::io;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global console subscriber. `RUST_LOG` overrides the default `info` filter.
///
/// Calling this twice is harmless: the second subscriber is rejected and the first stays active.
pub fn init_logging(component_name: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(true))
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("Logging initialized for {component_name}");
    }
}
