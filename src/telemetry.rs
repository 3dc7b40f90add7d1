//! Tracing initialization
//!
//! Structured logging through `tracing-subscriber` with an environment
//! filter. Host binaries call [`init_tracing`] once at startup; tests can
//! call it repeatedly because a second initialization is a no-op.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter directive when `RUST_LOG` is unset
const DEFAULT_DIRECTIVE: &str = "info,trellis_addons=debug";

/// Initialize the global tracing subscriber.
///
/// Honors `RUST_LOG` when set. Safe to call more than once: if a subscriber
/// is already installed the call does nothing.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
