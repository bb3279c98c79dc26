//! Signal Handling for the `run` command
//!
//! The CLI keeps envoy alive until the operator interrupts it, then tears the
//! instance down through the normal cleanup path.

use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use std::io;

/// Signals that end a `run` session
pub const SHUTDOWN_SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGQUIT];

/// Register shutdown handlers. Must happen before envoy is started so an early
/// Ctrl+C still reaches cleanup.
pub fn register_shutdown() -> io::Result<Signals> {
    Signals::new(SHUTDOWN_SIGNALS)
}

/// Block until one of [`SHUTDOWN_SIGNALS`] arrives and return it
pub fn wait_for_shutdown(signals: &mut Signals) -> Option<i32> {
    let sig = signals.forever().next();
    if let Some(sig) = sig {
        tracing::info!(signal = signal_name(sig), "shutdown requested");
    }
    sig
}

pub fn signal_name(sig: i32) -> &'static str {
    match sig {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        SIGQUIT => "SIGQUIT",
        _ => "unknown",
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(SIGINT), "SIGINT");
        assert_eq!(signal_name(SIGTERM), "SIGTERM");
        assert_eq!(signal_name(SIGQUIT), "SIGQUIT");
        assert_eq!(signal_name(0), "unknown");
    }
}
