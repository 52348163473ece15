//! Tracing setup for tests.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call from every test; only the
/// first call installs the subscriber.
///
/// Honors `RUST_LOG`, otherwise logs `info` and `dsp_tck=debug`.
pub fn init_test_tracing() {
    init_test_tracing_with_filter("info,dsp_tck=debug");
}

/// Like [`init_test_tracing`] with an explicit default filter. `RUST_LOG`
/// still wins when set.
pub fn init_test_tracing_with_filter(default_filter: &str) {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .compact(),
            )
            .try_init();
    });
}
