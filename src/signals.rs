//! Signal handling for graceful shutdown.
//!
//! The supervisor's poll loop checks the shutdown flag once per tick; on
//! SIGINT/SIGTERM/SIGQUIT it kills the child and exits instead of leaving
//! an orphaned target behind a dead checkpoint loop.

use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Global flag to signal shutdown was requested
pub static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Install signal handlers for graceful shutdown.
///
/// Spawns a daemon thread that listens for signals; it dies with the main
/// thread.
pub fn install_signal_handlers() -> Result<(), Box<dyn std::error::Error>> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGINT | SIGTERM | SIGQUIT => {
                    eprintln!("\n[supervisor] Received signal, shutting down...");
                    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    });

    Ok(())
}

/// Check if shutdown was requested (called in the poll loop)
#[inline]
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_flag() {
        assert!(!SHUTDOWN_REQUESTED.load(Ordering::SeqCst));
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        assert!(shutdown_requested());
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
    }
}
