//! Tracing setup for the service binary.
//!
//! `RUST_LOG` wins when set; otherwise the configured directive is used.
//!
//! ```bash
//! RUST_LOG=info restrack-server                       # lifecycle + transitions
//! RUST_LOG=debug,restrack_backend=debug restrack-server # every request
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. Later calls are no-ops.
pub fn setup_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init();
}
