use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT_ONCE: Once = Once::new();

/// Installs a formatting subscriber honoring `RUST_LOG`, falling back to
/// `oncograph=info`. Calling it more than once has no effect, and an already
/// installed global subscriber is left in place.
pub fn init_logging() {
    INIT_ONCE.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("oncograph=info"));

        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}
