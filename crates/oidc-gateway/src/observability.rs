//! Log output.
//!
//! The filter starts at `info` (or `RUST_LOG`) so startup is logged before the
//! configuration is read, then [`apply_logging_level`] swaps in the configured
//! level through a reload handle.
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

const STARTUP_LEVEL: &str = "info";

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(STARTUP_LEVEL));
    let (filter, handle) = reload::Layer::new(filter);

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false))
        .try_init()
        .is_ok()
    {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Switches to the configured level. `RUST_LOG`, when set, keeps precedence.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    if let Some(handle) = FILTER_HANDLE.get()
        && let Err(e) = handle.modify(|filter| *filter = EnvFilter::new(level))
    {
        tracing::warn!(level, error = %e, "failed to apply logging level");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_can_be_applied_after_init() {
        init_tracing();
        // A second init is a no-op rather than a panic.
        init_tracing();
        apply_logging_level("debug");
        apply_logging_level("warn");
    }
}
