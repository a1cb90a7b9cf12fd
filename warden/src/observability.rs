//! Tracing setup for binaries and tests that embed the engine.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warden=info";

/// Install a JSON `tracing` subscriber filtered by `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already installed, which
/// leaves the existing one in place.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .json()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_repeatable() {
        init_tracing();
        assert!(!init_tracing(), "second install must keep the first subscriber");
    }
}
