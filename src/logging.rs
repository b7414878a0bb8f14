//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_DIRECTIVE: &str = "scaffold_sdk=info";

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_directive`.
/// Does nothing when a global subscriber is already set.
pub fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
