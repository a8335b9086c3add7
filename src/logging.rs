//! Tracing setup shared by binaries built on top of this crate. The library
//! itself only emits `tracing` events; it never installs a subscriber.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a formatting subscriber honoring `RUST_LOG`, defaulting to `info`.
/// Safe to call once per process; a second call is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
