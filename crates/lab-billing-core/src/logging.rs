//! Logging setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::DEFAULT_LOG_FILTER;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `filter`; an empty or invalid `filter` falls back to
/// `lab_billing_core=info`. Returns `false` when a subscriber was already
/// installed, which makes repeated calls harmless.
pub fn init_logging(filter: Option<&str>) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            let directives = filter
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .unwrap_or(DEFAULT_LOG_FILTER);
            EnvFilter::try_new(directives)
        })
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
