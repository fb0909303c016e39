//! Run telemetry: `log/time_profile.json` and `log/reporter_sync.json`.
//!
//! Both the supervisor and the child append timings. The sync file is the
//! cross-process source of truth: every mutation is load-modify-save so a
//! writer always starts from the latest state, and the final profile is a
//! derived view written on save_report().

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    pub args: String,
    pub start_timestamp: f64,
    pub end_time: Option<String>,
    pub status: String,
    pub validation_iter: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timings {
    pub total_duration: f64,
    pub time_to_first_fail: f64,
    pub total_patch_generation_time: f64,
    pub total_validation_time: f64,
    pub after_validate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchGenTimes {
    pub first_patch_generate_time: f64,
    pub validation_feedback_iter: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationTimes {
    pub iter: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub meta: Meta,
    pub timings: Timings,
    pub patch_generation_time: PatchGenTimes,
    pub patch_validation_time: ValidationTimes,
}

/// File-backed reporter. Cheap to construct in either process; state lives
/// in the sync file.
#[derive(Debug, Clone)]
pub struct Reporter {
    profile_file: PathBuf,
    sync_file: PathBuf,
    after_validate_started: Option<f64>,
}

impl Reporter {
    /// Open the reporter for a run, creating the sync file when `args` is
    /// given (supervisor startup) or adopting the existing one (child).
    pub fn open(wdir: &Path, args: Option<String>) -> Self {
        let log_dir = wdir.join("log");
        let reporter = Self {
            profile_file: log_dir.join("time_profile.json"),
            sync_file: log_dir.join("reporter_sync.json"),
            after_validate_started: None,
        };

        if let Some(args) = args {
            let profile = Profile {
                meta: Meta {
                    args,
                    start_timestamp: now_secs(),
                    end_time: None,
                    status: "running".to_string(),
                    validation_iter: 0,
                },
                ..Profile::default()
            };
            reporter.save_sync(&profile);
        }

        reporter
    }

    fn load_sync(&self) -> Profile {
        fs::read_to_string(&self.sync_file)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn save_sync(&self, profile: &Profile) {
        if let Some(parent) = self.sync_file.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(profile) {
            Ok(json) => {
                if let Err(e) = fs::write(&self.sync_file, json) {
                    eprintln!("[telemetry] Sync save failed: {}", e);
                }
            }
            Err(e) => eprintln!("[telemetry] Sync encode failed: {}", e),
        }
    }

    /// Record time-to-first-fail once, at the first crash.
    pub fn record_crash_time(&self) {
        let mut profile = self.load_sync();
        if profile.timings.time_to_first_fail == 0.0 {
            profile.timings.time_to_first_fail = now_secs() - profile.meta.start_timestamp;
            self.save_sync(&profile);
        }
    }

    /// Record one patch-generation duration. `first` marks the initial
    /// generation; later calls are feedback rounds.
    pub fn record_patch_gen(&self, duration_secs: f64, first: bool) {
        let mut profile = self.load_sync();
        if first {
            profile.patch_generation_time.first_patch_generate_time = duration_secs;
        } else {
            profile
                .patch_generation_time
                .validation_feedback_iter
                .push(duration_secs);
        }
        self.save_sync(&profile);
    }

    /// Record one validation duration and bump the iteration counter.
    pub fn record_validation(&self, duration_secs: f64) {
        let mut profile = self.load_sync();
        profile.patch_validation_time.iter.push(duration_secs);
        profile.meta.validation_iter += 1;
        self.save_sync(&profile);
    }

    pub fn set_status(&self, status: &str) {
        let mut profile = self.load_sync();
        profile.meta.status = status.to_string();
        self.save_sync(&profile);
    }

    pub fn start_after_validate_timer(&mut self) {
        self.after_validate_started = Some(now_secs());
    }

    pub fn end_after_validate_timer(&mut self) {
        if let Some(started) = self.after_validate_started.take() {
            let mut profile = self.load_sync();
            profile.timings.after_validate = now_secs() - started;
            self.save_sync(&profile);
        }
    }

    /// Recompute derived totals and write the final profile file.
    pub fn save_report(&self) -> Result<()> {
        let mut profile = self.load_sync();

        let pg = &profile.patch_generation_time;
        profile.timings.total_patch_generation_time =
            pg.first_patch_generate_time + pg.validation_feedback_iter.iter().sum::<f64>();
        profile.timings.total_validation_time = profile.patch_validation_time.iter.iter().sum();
        profile.timings.total_duration = profile.timings.time_to_first_fail
            + profile.timings.total_patch_generation_time
            + profile.timings.total_validation_time
            + profile.timings.after_validate;
        profile.meta.end_time = Some(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string());

        self.save_sync(&profile);
        if let Some(parent) = self.profile_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.profile_file, serde_json::to_string_pretty(&profile)?)?;
        Ok(())
    }

    #[cfg(test)]
    fn snapshot(&self) -> Profile {
        self.load_sync()
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
    fn test_open_initializes_sync_file() {
        let temp = TempDir::new().unwrap();
        let reporter = Reporter::open(temp.path(), Some("--wdir /tmp".to_string()));
        let profile = reporter.snapshot();
        assert_eq!(profile.meta.status, "running");
        assert!(profile.meta.start_timestamp > 0.0);
        assert!(temp.path().join("log/reporter_sync.json").exists());
    }

    #[test]
    fn test_crash_time_recorded_once() {
        let temp = TempDir::new().unwrap();
        let reporter = Reporter::open(temp.path(), Some("args".to_string()));
        reporter.record_crash_time();
        let first = reporter.snapshot().timings.time_to_first_fail;
        reporter.record_crash_time();
        assert_eq!(reporter.snapshot().timings.time_to_first_fail, first);
    }

    #[test]
    fn test_cross_process_view_through_sync_file() {
        let temp = TempDir::new().unwrap();
        let supervisor = Reporter::open(temp.path(), Some("args".to_string()));
        // child adopts the same sync file
        let child = Reporter::open(temp.path(), None);
        child.record_validation(1.5);
        child.record_validation(0.5);
        assert_eq!(supervisor.snapshot().meta.validation_iter, 2);
    }

    #[test]
    fn test_save_report_totals() {
        let temp = TempDir::new().unwrap();
        let reporter = Reporter::open(temp.path(), Some("args".to_string()));
        reporter.record_patch_gen(2.0, true);
        reporter.record_patch_gen(1.0, false);
        reporter.record_validation(0.5);
        reporter.set_status("success");
        reporter.save_report().unwrap();

        let written: Profile = serde_json::from_str(
            &fs::read_to_string(temp.path().join("log/time_profile.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(written.timings.total_patch_generation_time, 3.0);
        assert_eq!(written.timings.total_validation_time, 0.5);
        assert_eq!(written.meta.status, "success");
        assert!(written.meta.end_time.is_some());
    }

}
