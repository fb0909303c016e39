//! WDIR contract integration: the mode channel, the matcher contract file,
//! and the telemetry sync file are the only things the processes share.

use newt_core::checkpoint::Checkpointer;
use newt_core::lifecycle::CleanupGuard;
use newt_core::matcher::FileMatcher;
use newt_core::mode::{Mode, ModeChannel};
use newt_core::telemetry::Reporter;
use tempfile::TempDir;

#[test]
fn mode_channel_session_sequence() {
    let temp = TempDir::new().unwrap();
    let channel = ModeChannel::new(temp.path());
    channel.init().unwrap();

    // the observed sequence of one successful session
    assert_eq!(channel.read().unwrap(), Mode::Safe);
    channel.write(Mode::Repair).unwrap();
    assert_eq!(channel.read().unwrap(), Mode::Repair);
    channel.write(Mode::ValOk).unwrap();
    assert_eq!(channel.read().unwrap(), Mode::ValOk);

    // supervisor returns the run to safe mode before restoring
    channel.write(Mode::Safe).unwrap();
    assert_eq!(channel.read().unwrap(), Mode::Safe);
}

#[test]
fn mode_channel_is_observable_across_handles() {
    let temp = TempDir::new().unwrap();
    let writer = ModeChannel::new(temp.path());
    let reader = ModeChannel::new(temp.path());
    writer.init().unwrap();

    writer.write(Mode::ValFail).unwrap();
    assert_eq!(reader.read().unwrap(), Mode::ValFail);

    // the slot is a single small file with the token inside
    let raw = std::fs::read_to_string(temp.path().join("process_mode")).unwrap();
    assert_eq!(raw, "2");
}

#[test]
fn matcher_contract_file_round_trips() {
    let temp = TempDir::new().unwrap();
    let contract = temp.path().join("tmp").join("file_matcher");

    let mut matcher = FileMatcher::new();
    matcher.add_source("/proj/src");
    matcher.add_exclude_keyword("tests");
    matcher.save(&contract).unwrap();

    // the child sees exactly the supervisor's predicate
    let child_view = FileMatcher::load(&contract).unwrap();
    assert!(child_view.matches("/proj/src/app.py"));
    assert!(!child_view.matches("/proj/src/tests/test_app.py"));
    assert!(!child_view.matches("/elsewhere/app.py"));
    assert!(!child_view.matches("/proj/src/native.so"));
}

#[test]
fn reporter_sync_file_shared_between_processes() {
    let temp = TempDir::new().unwrap();

    // supervisor creates, child adopts
    let supervisor = Reporter::open(temp.path(), Some("newt --wdir w app.py".to_string()));
    let child = Reporter::open(temp.path(), None);

    child.record_crash_time();
    child.record_patch_gen(2.5, true);
    child.record_validation(1.0);
    child.record_validation(0.5);

    supervisor.set_status("success");
    supervisor.save_report().unwrap();

    let profile: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(temp.path().join("log").join("time_profile.json")).unwrap(),
    )
    .unwrap();

    assert_eq!(profile["meta"]["status"], "success");
    assert_eq!(profile["meta"]["validation_iter"], 2);
    assert_eq!(profile["timings"]["total_validation_time"], 1.5);
    assert_eq!(profile["timings"]["total_patch_generation_time"], 2.5);
    assert!(profile["timings"]["time_to_first_fail"].as_f64().unwrap() >= 0.0);
}

#[test]
fn checkpointer_starts_at_generation_zero() {
    let temp = TempDir::new().unwrap();
    let reporter = Reporter::open(temp.path(), Some("test".to_string()));
    let checkpointer = Checkpointer::new(temp.path(), reporter);
    assert_eq!(checkpointer.generation(), 0);
    assert_eq!(checkpointer.checkpoints_taken(), 0);
}

#[test]
fn cleanup_guard_tracks_restored_children() {
    let guard = CleanupGuard::new();
    guard.track_child(4242);
    // a restore re-adopts a fresh PID
    guard.track_child(4343);
    assert_eq!(guard.tracked_child(), Some(4343));
    guard.untrack_child();
    assert_eq!(guard.tracked_child(), None);
}
