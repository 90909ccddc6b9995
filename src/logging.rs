//! Tracing subscriber setup for host binaries and demos
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the embedding application.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (e.g. `trueno_ab=debug`).
pub const LOG_ENV: &str = "TRUENO_AB_LOG";

/// Install a fmt subscriber filtered by `TRUENO_AB_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops. Returns whether
/// this call installed the subscriber.
pub fn init() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
