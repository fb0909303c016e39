//! Supervisor-side checkpointing: CRIU shelling and the control loop.
//!
//! Checkpoints are incremental tree dumps that leave the target running,
//! track memory pages, keep established TCP connections, and externalize
//! the supervisor's time namespace so a restored child rejoins the same
//! logical clock. Generation R increments on every successful restore; the
//! per-generation counter N restarts at 0.

use crate::lifecycle::CleanupGuard;
use crate::mode::{Mode, ModeChannel};
use crate::signals::shutdown_requested;
use crate::telemetry::Reporter;
use anyhow::{anyhow, bail, Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

/// Poll period of the control loop.
const POLL_PERIOD: Duration = Duration::from_secs(1);

/// Child /proc states under which a dump is safe to take.
const DUMPABLE_STATES: [char; 4] = ['R', 'S', 'D', 't'];

/// Why the control loop ended.
#[derive(Debug, PartialEq)]
pub enum RunOutcome {
    /// target ran to completion (with or without a repair)
    Completed,
    /// repair session exhausted its budgets
    ValidationFailed,
    /// operator asked for shutdown
    Interrupted,
}

pub struct Checkpointer {
    wdir: PathBuf,
    mode: ModeChannel,
    reporter: Reporter,
    /// N: next checkpoint index within the current generation
    checkpoint_num: u32,
    /// R: restore generation
    restore_num: u32,
    restore_occur: bool,
    /// owner of the externalized time namespace; must outlive all restores
    main_pid: u32,
}

impl Checkpointer {
    pub fn new(wdir: &Path, reporter: Reporter) -> Self {
        Self {
            wdir: wdir.to_path_buf(),
            mode: ModeChannel::new(wdir),
            reporter,
            checkpoint_num: 0,
            restore_num: 0,
            restore_occur: false,
            main_pid: std::process::id(),
        }
    }

    pub fn generation(&self) -> u32 {
        self.restore_num
    }

    pub fn checkpoints_taken(&self) -> u32 {
        self.checkpoint_num
    }

    fn generation_dir(&self) -> PathBuf {
        self.wdir.join(format!("checkpoints{}", self.restore_num))
    }

    // =========================================================================
    // CRIU dump / restore
    // =========================================================================

    /// Take checkpoint N of the current generation. The first checkpoint of
    /// a generation is full and resets the generation directory; later ones
    /// are diffs against N-1.
    pub fn store_checkpoint(&mut self, pid: Pid) -> Result<()> {
        if self.restore_occur {
            self.checkpoint_num = 0;
            self.restore_occur = false;
        }

        let gen_dir = self.generation_dir();
        if self.checkpoint_num == 0 {
            let _ = fs::remove_dir_all(&gen_dir);
        }
        let image_dir = gen_dir.join(self.checkpoint_num.to_string());
        fs::create_dir_all(&image_dir)
            .with_context(|| format!("Cannot create {}", image_dir.display()))?;

        let mut cmd = Command::new("criu");
        cmd.arg("dump")
            .args(["--tree", &pid.to_string()])
            .args(["--images-dir", &image_dir.to_string_lossy()])
            .arg("--leave-running")
            .arg("--track-mem")
            .arg("--shell-job")
            .arg("-v1")
            .arg("--tcp-established")
            .args(["--external", &format!("time:/proc/{}/ns/time", self.main_pid)]);

        if self.checkpoint_num != 0 {
            cmd.args(["--prev-images-dir", &format!("../{}", self.checkpoint_num - 1)]);
        }

        eprintln!(
            "[criu] Checkpointing {} (generation {}) for process {}",
            self.checkpoint_num, self.restore_num, pid
        );
        let status = cmd
            .status()
            .context("Failed to spawn criu dump; is criu installed?")?;
        if !status.success() {
            let _ = kill(pid, Signal::SIGKILL);
            bail!("criu dump failed with {}", status);
        }

        eprintln!("[criu] Checkpoint {} stored", self.checkpoint_num);
        self.checkpoint_num += 1;
        Ok(())
    }

    /// Restore from an image directory, adopt the restored process, and
    /// open generation R+1.
    fn restore_checkpoint(&mut self, image_dir: &Path) -> Result<Pid> {
        eprintln!("[criu] Restoring from {}", image_dir.display());

        let child = Command::new("criu")
            .arg("restore")
            .arg("-v1")
            .arg("--shell-job")
            .args(["-D", &image_dir.to_string_lossy()])
            .arg("--tcp-established")
            .args(["-J", &format!("time:/proc/{}/ns/time", self.main_pid)])
            .spawn()
            .context("Failed to spawn criu restore; is criu installed?")?;

        if matches!(self.mode.read(), Ok(Mode::Safe)) {
            thread::sleep(Duration::from_secs(1));
        }

        // the restored target is criu's first child; criu itself stands in
        // when the tree is not visible yet
        let restore_pid = child.id();
        let adopted = first_child_of(restore_pid).unwrap_or(restore_pid);

        self.restore_num += 1;
        self.restore_occur = true;

        eprintln!(
            "[criu] Restore succeeded, continuing with PID {} (generation {})",
            adopted, self.restore_num
        );
        Ok(Pid::from_raw(adopted as i32))
    }

    // =========================================================================
    // Control loop
    // =========================================================================

    /// Drive the run: periodic checkpoints while SAFE, idle while a repair
    /// is in flight, restore on VAL_OK, terminate on VAL_FAIL or child
    /// exit.
    pub fn run_loop(&mut self, child: Pid, guard: &CleanupGuard) -> Result<RunOutcome> {
        let mut child = child;
        loop {
            if shutdown_requested() {
                let _ = kill(child, Signal::SIGKILL);
                return Ok(RunOutcome::Interrupted);
            }

            let mode = self
                .mode
                .read()
                .context("Mode channel unreadable in control loop")?;

            match mode {
                Mode::ValFail => {
                    let _ = kill(child, Signal::SIGKILL);
                    eprintln!("[supervisor] Validation failed (mode 2 observed)");
                    self.reporter.set_status("validation_failed");
                    self.reporter.save_report()?;
                    return Ok(RunOutcome::ValidationFailed);
                }

                Mode::ValOk => {
                    // the child wrote its patch and is about to die on the
                    // re-raised exception; reap it, then rewind
                    let _ = waitpid(child, None);

                    let restore_index = self
                        .checkpoint_num
                        .checked_sub(1)
                        .ok_or_else(|| anyhow!("VAL_OK with no checkpoint on disk"))?;

                    eprintln!("[supervisor] Validation complete, returning to safe mode");
                    self.mode.write(Mode::Safe)?;
                    self.reporter.set_status("success");
                    self.reporter.start_after_validate_timer();
                    self.reporter.save_report()?;

                    let image_dir = self.generation_dir().join(restore_index.to_string());
                    child = self.restore_checkpoint(&image_dir)?;
                    guard.track_child(child.as_raw());
                }

                Mode::Repair => {
                    // repair runs inside the child; nothing to do but wait
                }

                Mode::Safe => match proc_state(child) {
                    Some(state) if DUMPABLE_STATES.contains(&state) => {
                        self.store_checkpoint(child)?;
                    }
                    Some(state) => {
                        eprintln!("[supervisor] Child left run state ({}), finishing", state);
                        let _ = waitpid(child, None);
                        self.reporter.end_after_validate_timer();
                        self.reporter.save_report()?;
                        return Ok(RunOutcome::Completed);
                    }
                    None => {
                        eprintln!("[supervisor] Child finished");
                        let _ = waitpid(child, None);
                        self.reporter.end_after_validate_timer();
                        self.reporter.save_report()?;
                        return Ok(RunOutcome::Completed);
                    }
                },
            }

            thread::sleep(POLL_PERIOD);
        }
    }
}

// =============================================================================
// /proc helpers
// =============================================================================

/// State character from /proc/{pid}/stat, None when the process is gone.
/// The comm field may contain spaces and parentheses, so the state is
/// found after the last ')'.
fn proc_state(pid: Pid) -> Option<char> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let after_comm = &stat[stat.rfind(')')? + 1..];
    after_comm.split_whitespace().next()?.chars().next()
}

/// First child PID listed in /proc/{pid}/task/{pid}/children.
fn first_child_of(pid: u32) -> Option<u32> {
    let children = fs::read_to_string(format!("/proc/{}/task/{}/children", pid, pid)).ok()?;
    children.split_whitespace().next()?.parse().ok()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_proc_state_of_self_is_running() {
        let state = proc_state(Pid::from_raw(std::process::id() as i32));
        assert_eq!(state, Some('R'));
    }

    #[test]
    fn test_proc_state_of_missing_pid() {
        // kernel pid limit keeps ordinary pids well below this
        assert_eq!(proc_state(Pid::from_raw(0x3f_ffff)), None);
    }

    #[test]
    fn test_generation_counters() {
        let temp = TempDir::new().unwrap();
        let reporter = Reporter::open(temp.path(), Some("test".to_string()));
        let checkpointer = Checkpointer::new(temp.path(), reporter);
        assert_eq!(checkpointer.generation(), 0);
        assert_eq!(checkpointer.checkpoints_taken(), 0);
        assert_eq!(
            checkpointer.generation_dir(),
            temp.path().join("checkpoints0")
        );
    }

    #[test]
    fn test_dumpable_states_cover_spec_set() {
        for state in ['R', 'S', 'D', 't'] {
            assert!(DUMPABLE_STATES.contains(&state));
        }
        assert!(!DUMPABLE_STATES.contains(&'Z'));
        assert!(!DUMPABLE_STATES.contains(&'T'));
    }
}
