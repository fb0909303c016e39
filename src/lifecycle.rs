//! Guaranteed cleanup on any exit path.
//!
//! RAII guard owning the child's PID: whether the supervisor returns,
//! errors out, or panics, Drop kills the target (and its process group,
//! which catches anything the restored tree spawned). Mutex poison is
//! ignored during cleanup; a panicking supervisor must still reap.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::sync::Mutex;

/// Tracks the live target PID across spawn and CRIU re-adoption.
pub struct CleanupGuard {
    child_pid: Mutex<Option<i32>>,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self {
            child_pid: Mutex::new(None),
        }
    }

    /// Track the current target. Called at spawn and again after every
    /// restore re-adoption.
    pub fn track_child(&self, pid: i32) {
        let mut guard = self.child_pid.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(pid);
    }

    /// Stop tracking (target exited normally and was reaped).
    pub fn untrack_child(&self) {
        let mut guard = self.child_pid.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub fn tracked_child(&self) -> Option<i32> {
        *self.child_pid.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn kill_child(&self) {
        let guard = self.child_pid.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pid) = *guard {
            if pid > 0 {
                // group first, then the process itself
                let _ = kill(Pid::from_raw(-pid), Signal::SIGKILL);
                let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
            }
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.kill_child();
        eprintln!("[supervisor] Cleanup: resources released");
    }
}

impl Default for CleanupGuard {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_and_untrack() {
        let guard = CleanupGuard::new();
        assert_eq!(guard.tracked_child(), None);
        guard.track_child(1234);
        assert_eq!(guard.tracked_child(), Some(1234));
        guard.untrack_child();
        assert_eq!(guard.tracked_child(), None);
    }

    #[test]
    fn test_retrack_after_restore() {
        let guard = CleanupGuard::new();
        guard.track_child(100);
        guard.track_child(200);
        assert_eq!(guard.tracked_child(), Some(200));
    }

    #[test]
    fn test_drop_with_no_child_is_harmless() {
        let guard = CleanupGuard::new();
        drop(guard);
    }
}
