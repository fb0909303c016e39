//! Mode Channel: the 1-file state slot coordinating all processes in a run.
//!
//! The channel is deliberately a bare file (`{WDIR}/process_mode`) rather
//! than an in-memory primitive: it must survive child death and CRIU
//! restores, and both the supervisor and the instrumented child read it.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Run mode alphabet. Transitions per session:
/// `Safe -> Repair -> (ValOk | ValFail)`; the supervisor writes
/// `ValOk -> Safe` before restoring. `ValFail` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Safe,
    Repair,
    ValOk,
    ValFail,
}

impl Mode {
    /// On-disk token. The alphabet mirrors the numeric encoding of the
    /// process-mode slot: 0, -1, 1, 2.
    pub fn token(self) -> &'static str {
        match self {
            Mode::Safe => "0",
            Mode::Repair => "-1",
            Mode::ValOk => "1",
            Mode::ValFail => "2",
        }
    }

    pub fn from_token(s: &str) -> Option<Mode> {
        match s.trim() {
            "0" => Some(Mode::Safe),
            "-1" => Some(Mode::Repair),
            "1" => Some(Mode::ValOk),
            "2" => Some(Mode::ValFail),
            _ => None,
        }
    }
}

/// Handle to the mode slot of one working directory.
#[derive(Debug, Clone)]
pub struct ModeChannel {
    path: PathBuf,
}

impl ModeChannel {
    pub fn new(wdir: &Path) -> Self {
        Self {
            path: wdir.join("process_mode"),
        }
    }

    /// Create the slot and write the initial SAFE token.
    pub fn init(&self) -> Result<()> {
        self.write(Mode::Safe)
    }

    pub fn write(&self, mode: Mode) -> Result<()> {
        fs::write(&self.path, mode.token())
            .with_context(|| format!("Failed to write mode to {}", self.path.display()))
    }

    /// Read the current mode. An unreadable or corrupt slot is reported as
    /// an error; the caller decides whether that is fatal (supervisor) or
    /// a re-raise (instrumented handler).
    pub fn read(&self) -> Result<Mode> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read mode from {}", self.path.display()))?;
        Mode::from_token(&raw)
            .with_context(|| format!("Corrupt mode token {:?} in {}", raw, self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_token_round_trip() {
        for mode in [Mode::Safe, Mode::Repair, Mode::ValOk, Mode::ValFail] {
            assert_eq!(Mode::from_token(mode.token()), Some(mode));
        }
    }

    #[test]
    fn test_from_token_trims_whitespace() {
        assert_eq!(Mode::from_token(" -1\n"), Some(Mode::Repair));
        assert_eq!(Mode::from_token("0\n"), Some(Mode::Safe));
    }

    #[test]
    fn test_from_token_rejects_garbage() {
        assert_eq!(Mode::from_token("3"), None);
        assert_eq!(Mode::from_token(""), None);
        assert_eq!(Mode::from_token("safe"), None);
    }

    #[test]
    fn test_channel_init_writes_safe() {
        let temp = TempDir::new().unwrap();
        let channel = ModeChannel::new(temp.path());
        channel.init().unwrap();
        assert_eq!(channel.read().unwrap(), Mode::Safe);
    }

    #[test]
    fn test_channel_write_read_all_modes() {
        let temp = TempDir::new().unwrap();
        let channel = ModeChannel::new(temp.path());
        for mode in [Mode::Safe, Mode::Repair, Mode::ValOk, Mode::ValFail] {
            channel.write(mode).unwrap();
            assert_eq!(channel.read().unwrap(), mode);
        }
    }

    #[test]
    fn test_channel_read_missing_file_errors() {
        let temp = TempDir::new().unwrap();
        let channel = ModeChannel::new(temp.path());
        assert!(channel.read().is_err());
    }

    #[test]
    fn test_two_handles_share_one_slot() {
        let temp = TempDir::new().unwrap();
        let writer = ModeChannel::new(temp.path());
        let reader = ModeChannel::new(temp.path());
        writer.init().unwrap();
        writer.write(Mode::Repair).unwrap();
        assert_eq!(reader.read().unwrap(), Mode::Repair);
    }
}
