//! Tracing subscriber setup
//!
//! The library itself only emits `tracing` events. Binaries embedding it call
//! [`init`] once at startup; tests call [`init_test`].

use tracing_subscriber::{EnvFilter, fmt};

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// ```no_run
/// barter_exchange::logging::init();
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .init();
}

/// Debug level subscriber writing through the test harness. Safe to call from
/// every test; only the first call installs anything.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("barter_exchange=debug"))
        .with_test_writer()
        .try_init();
}
