//! Repair session orchestration, running in-process in the child.
//!
//! The instrumented except-handler has already selected the target frame
//! and captured the crash context; this module drives the pipeline over the
//! oracle, compiles candidates, persists the patch pair, and runs both
//! validators. A validated patch ends with mode VAL_OK on disk; exhaustion
//! is reported to the caller, which fails the session.

use crate::config::{self, Ablation};
use crate::diff::unified_diff;
use crate::instrument::{extract_function_source, wrap_patch_only};
use crate::mode::{Mode, ModeChannel};
use crate::oracle::OracleClient;
use crate::pipeline::{CrashContext, PatchModel};
use crate::telemetry::Reporter;
use crate::validate::{function_code, Validator};
use anyhow::{Context, Result};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Everything the except-handler hands over for one repair attempt.
pub struct RepairRequest<'py> {
    pub func_name: String,
    pub filename: String,
    pub lineno: usize,
    pub exception_msg: String,
    pub exception_trace: String,
    pub args: Bound<'py, PyDict>,
    pub kwargs: Bound<'py, PyDict>,
    pub globals: Bound<'py, PyDict>,
}

/// Run one full repair session. Ok(true) means a candidate survived both
/// validators and VAL_OK is on disk; Ok(false) means every candidate and
/// feedback round was exhausted.
pub fn attempt_repair(py: Python<'_>, wdir: &Path, req: &RepairRequest<'_>) -> Result<bool> {
    let config = config::get();
    let mode = ModeChannel::new(wdir);
    let reporter = Reporter::open(wdir, None);
    reporter.record_crash_time();

    let patch_folder = wdir.join("patch_file");
    fs::create_dir_all(&patch_folder)?;

    // Persist the origin source; it anchors diffs and the Val-2 baseline.
    let module_source = fs::read_to_string(&req.filename)
        .with_context(|| format!("Cannot read target module {}", req.filename))?;
    let buggy_code = extract_function_source(&module_source, &req.func_name)?;
    fs::write(
        patch_folder.join(format!("{}_origin.py", req.func_name)),
        &buggy_code,
    )?;

    let target_line = module_source
        .lines()
        .nth(req.lineno.saturating_sub(1))
        .unwrap_or("")
        .to_string();

    let ctx = CrashContext {
        func_name: req.func_name.clone(),
        exception_msg: req.exception_msg.clone(),
        exception_trace: req.exception_trace.clone(),
        target_line,
        buggy_code: buggy_code.clone(),
    };

    let oracle = OracleClient::new(&config.oracle.endpoint)?;
    let ablation = ablation_from_env();
    let mut model = PatchModel::new(
        &oracle,
        config.pipeline.clone(),
        ablation,
        wdir.to_path_buf(),
        ctx,
    );

    let gen_started = Instant::now();
    model.run()?;
    reporter.record_patch_gen(gen_started.elapsed().as_secs_f64(), true);

    let mut validator = Validator::new(wdir, &config.validation);
    let mut ever_passed_val1 = false;

    for round in 0..config.pipeline.max_recursion {
        if model.patches.is_empty() {
            eprintln!("[repair] No patches generated");
            return Ok(false);
        }

        let mut failed_diffs: Vec<String> = Vec::new();
        let mut round_passed_val1 = false;
        let candidates = model.patches.clone();

        for (i, candidate) in candidates.iter().enumerate() {
            eprintln!("[repair] --- Patch candidate {} (round {}) ---", i, round);

            let diff = unified_diff(
                &buggy_code,
                &candidate.patched_code,
                "buggy_func.py",
                "patch_func.py",
            );
            for line in diff.lines() {
                eprintln!("[repair] {}", line);
            }
            failed_diffs.push(diff);

            let paths = match persist_patch_pair(
                py,
                &patch_folder,
                &req.func_name,
                &candidate.patched_code,
            ) {
                Ok(paths) => paths,
                Err(e) => {
                    eprintln!("[repair] Failed to compile patch {}_{}: {}", i, round, e);
                    continue;
                }
            };

            let val_started = Instant::now();
            let val1 = validator.validate_patch(
                py,
                &paths.val1_patch,
                &req.func_name,
                &req.args,
                &req.kwargs,
                &req.globals,
            );
            reporter.record_validation(val_started.elapsed().as_secs_f64());

            if !val1 {
                continue;
            }
            round_passed_val1 = true;
            ever_passed_val1 = true;

            let (origin_code, patch_code) = match (
                function_code(py, &buggy_code, &req.func_name),
                function_code(py, &candidate.patched_code, &req.func_name),
            ) {
                (Ok(o), Ok(p)) => (o, p),
                (Err(e), _) | (_, Err(e)) => {
                    eprintln!("[repair] Bytecode conversion failed: {}", e);
                    continue;
                }
            };

            let val_started = Instant::now();
            let val2 = validator.regression_test(
                py,
                &req.func_name,
                &origin_code,
                &patch_code,
                &req.args,
                &req.kwargs,
                &req.globals,
            )?;
            reporter.record_validation(val_started.elapsed().as_secs_f64());

            if val2 {
                eprintln!(
                    "[repair] Patch successful for '{}' with candidate {} (round {})",
                    req.func_name, i, round
                );
                // the prologue must only ever see a fully persisted pair
                mode.write(Mode::ValOk)?;
                return Ok(true);
            }
            eprintln!("[repair] Candidate {} failed regression tests", i);
        }

        if round + 1 < config.pipeline.max_recursion {
            if round_passed_val1 {
                eprintln!("[repair] Round {}: patches passed Val-1 but failed Val-2", round);
            } else {
                eprintln!("[repair] Round {}: all patches failed Val-1", round);
            }
            eprintln!("[repair] Regenerating patches with feedback ...");
            let gen_started = Instant::now();
            model.feedback_patch_gen(failed_diffs)?;
            reporter.record_patch_gen(gen_started.elapsed().as_secs_f64(), false);
        } else {
            eprintln!("[repair] Max feedback recursion reached");
        }
    }

    if ever_passed_val1 {
        eprintln!(
            "[repair] All patches failed regression validation for '{}'",
            req.func_name
        );
    } else {
        eprintln!(
            "[repair] All patches failed re-execution validation for '{}'",
            req.func_name
        );
    }
    Ok(false)
}

struct PatchPaths {
    val1_patch: PathBuf,
}

/// Compile a candidate into its on-disk pair: the bare form for Val-1 and
/// the shielded form for the dispatch prologue, both marshalled from the
/// same source text and synced before the caller may flip the mode.
fn persist_patch_pair(
    py: Python<'_>,
    patch_folder: &Path,
    func_name: &str,
    patched_code: &str,
) -> Result<PatchPaths> {
    let patch_py = patch_folder.join(format!("{}.py", func_name));
    fs::write(&patch_py, patched_code)?;

    let bare = function_code(py, patched_code, func_name)
        .map_err(|e| anyhow::anyhow!("candidate does not compile: {}", e))?;

    let shielded_source = wrap_patch_only(patched_code, &patch_py.to_string_lossy())?;
    let shielded = function_code(py, &shielded_source, func_name)
        .map_err(|e| anyhow::anyhow!("shielded candidate does not compile: {}", e))?;

    let marshal = py
        .import("marshal")
        .and_then(|m| m.getattr("dumps"))
        .map_err(|e| anyhow::anyhow!("marshal unavailable: {}", e))?;

    let val1_patch = patch_folder.join(format!("{}_val1_patch", func_name));
    let patch = patch_folder.join(format!("{}_patch", func_name));

    let bare_bytes: Vec<u8> = marshal
        .call1((bare,))
        .and_then(|b| b.extract())
        .map_err(|e| anyhow::anyhow!("marshal of bare candidate failed: {}", e))?;
    write_synced(&val1_patch, &bare_bytes)?;

    let shielded_bytes: Vec<u8> = marshal
        .call1((shielded,))
        .and_then(|b| b.extract())
        .map_err(|e| anyhow::anyhow!("marshal of shielded candidate failed: {}", e))?;
    write_synced(&patch, &shielded_bytes)?;

    Ok(PatchPaths { val1_patch })
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn ablation_from_env() -> Ablation {
    match std::env::var("NEWT_ABLATION").as_deref() {
        Ok("single-shot") => Ablation::SingleShot,
        Ok("no-dynamic-context") => Ablation::NoDynamicContext,
        Ok("no-feedback") => Ablation::NoFeedback,
        _ => Ablation::None,
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
    fn test_persist_patch_pair_writes_both_forms() {
        Python::with_gil(|py| {
            let temp = TempDir::new().unwrap();
            let source = "def div(a, b):\n    if b == 0:\n        return 0\n    return a / b\n";

            let paths = persist_patch_pair(py, temp.path(), "div", source).unwrap();
            assert!(paths.val1_patch.exists());
            assert!(temp.path().join("div_patch").exists());
            assert!(temp.path().join("div.py").exists());

            // both are valid marshalled code objects for the same function
            let marshal = py.import("marshal").unwrap().getattr("loads").unwrap();
            for name in ["div_val1_patch", "div_patch"] {
                let bytes = fs::read(temp.path().join(name)).unwrap();
                let code = marshal
                    .call1((pyo3::types::PyBytes::new(py, &bytes),))
                    .unwrap();
                assert_eq!(
                    code.getattr("co_name").unwrap().extract::<String>().unwrap(),
                    "div"
                );
            }
        });
    }

    #[test]
    fn test_persist_patch_pair_rejects_broken_candidate() {
        Python::with_gil(|py| {
            let temp = TempDir::new().unwrap();
            let broken = "def div(a, b)\n    return a / b\n";
            assert!(persist_patch_pair(py, temp.path(), "div", broken).is_err());
        });
    }

    #[test]
    fn test_shielded_form_reenters_handler() {
        Python::with_gil(|py| {
            let temp = TempDir::new().unwrap();
            let source = "def f(a):\n    return a / 0\n";
            persist_patch_pair(py, temp.path(), "f", source).unwrap();

            let bytes = fs::read(temp.path().join("f_patch")).unwrap();
            let code = py
                .import("marshal")
                .unwrap()
                .getattr("loads")
                .unwrap()
                .call1((pyo3::types::PyBytes::new(py, &bytes),))
                .unwrap();
            // the shielded constants include the handler hook name
            let consts = format!("{:?}", code.getattr("co_names").unwrap());
            assert!(consts.contains("__newt_on_error__"));
        });
    }

    #[test]
    fn test_ablation_from_env_default() {
        assert_eq!(ablation_from_env(), Ablation::None);
    }
}
