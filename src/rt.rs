//! `newt_rt`: the native module the bootstrap harness calls into.
//!
//! Injected into `sys.modules` before any target code runs. Everything the
//! Python side needs from the core lives here: the file matcher, the mode
//! channel, patch-file access, AST lookups, the ignore list, and the repair
//! session entry point.

use crate::config;
use crate::instrument;
use crate::matcher::FileMatcher;
use crate::mode::{Mode, ModeChannel};
use crate::repair::{attempt_repair, RepairRequest};
use anyhow::Context;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyModule};
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

static MATCHER: OnceLock<FileMatcher> = OnceLock::new();

fn wdir() -> PyResult<PathBuf> {
    std::env::var("WDIR")
        .map(PathBuf::from)
        .map_err(|_| pyo3::exceptions::PyRuntimeError::new_err("WDIR is not set"))
}

fn channel() -> PyResult<ModeChannel> {
    Ok(ModeChannel::new(&wdir()?))
}

fn to_py_err(e: anyhow::Error) -> PyErr {
    pyo3::exceptions::PyRuntimeError::new_err(format!("{:#}", e))
}

/// Load the shared file matcher from the supervisor's contract file. Falls
/// back to a cwd-scoped matcher when the contract is missing, matching the
/// default scope of a run with no declared sources.
fn matcher() -> &'static FileMatcher {
    MATCHER.get_or_init(|| {
        let path = std::env::var("NEWT_FILE_MATCHER").map(PathBuf::from);
        match path {
            Ok(path) => match FileMatcher::load(&path) {
                Ok(matcher) => matcher,
                Err(e) => {
                    eprintln!("[child] Cannot load file matcher: {}", e);
                    FileMatcher::new()
                }
            },
            Err(_) => {
                eprintln!("[child] NEWT_FILE_MATCHER is not set");
                FileMatcher::new()
            }
        }
    })
}

// =============================================================================
// FFI surface
// =============================================================================

/// In-scope check for a module origin.
#[pyfunction]
fn matches(path: &str) -> bool {
    matcher().matches(path)
}

/// Instrument a source file and return the rewritten module text. A copy of
/// the rewritten text lands under `{WDIR}/instrumented/{module}` for
/// debugging. Rewriter failures fall back to the pristine source unless the
/// run asked for them to propagate.
#[pyfunction]
fn instrument_source(path: &str, module_name: &str) -> PyResult<String> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Cannot read {}", path))
        .map_err(to_py_err)?;

    let rewritten = match instrument::wrap_user_functions(&source, path) {
        Ok(rewritten) => rewritten,
        Err(e) => {
            if std::env::var("NEWT_THROW_EXCEPTION").as_deref() == Ok("1") {
                return Err(to_py_err(e));
            }
            eprintln!("[child] Instrumentation of {} failed, running pristine: {:#}", path, e);
            return Ok(source);
        }
    };

    let dump_dir = wdir()?.join("instrumented");
    if fs::create_dir_all(&dump_dir).is_ok() {
        let _ = fs::write(dump_dir.join(module_name), &rewritten);
    }

    Ok(rewritten)
}

#[pyfunction]
fn mode_check() -> PyResult<String> {
    let mode = channel()?.read().map_err(to_py_err)?;
    Ok(mode.token().to_string())
}

#[pyfunction]
fn safe_mode() -> PyResult<()> {
    channel()?.write(Mode::Safe).map_err(to_py_err)
}

#[pyfunction]
fn repair_mode() -> PyResult<()> {
    channel()?.write(Mode::Repair).map_err(to_py_err)
}

#[pyfunction]
fn validation_mode() -> PyResult<()> {
    channel()?.write(Mode::ValOk).map_err(to_py_err)
}

#[pyfunction]
fn validation_fail_mode() -> PyResult<()> {
    channel()?.write(Mode::ValFail).map_err(to_py_err)
}

#[pyfunction]
fn patch_exists(func_name: &str) -> PyResult<bool> {
    Ok(wdir()?
        .join("patch_file")
        .join(format!("{}_patch", func_name))
        .exists())
}

/// Marshalled bytes of the shielded patch; the caller marshal.loads them.
#[pyfunction]
fn read_patch(func_name: &str) -> PyResult<Vec<u8>> {
    let path = wdir()?.join("patch_file").join(format!("{}_patch", func_name));
    fs::read(&path)
        .with_context(|| format!("Cannot read patch {}", path.display()))
        .map_err(to_py_err)
}

#[pyfunction]
fn ignored_exception(exc_name: &str, exc_msg: &str) -> bool {
    config::get().is_ignored_exception(exc_name, exc_msg)
}

/// Enclosing module-top-level function for a source position, if any.
#[pyfunction]
fn enclosing_toplevel_function(filename: &str, lineno: usize) -> PyResult<Option<String>> {
    let source = fs::read_to_string(filename)
        .with_context(|| format!("Cannot read {}", filename))
        .map_err(to_py_err)?;
    Ok(instrument::enclosing_toplevel_function(&source, lineno))
}

/// End the session: VAL_FAIL on the channel, then kill this process. Used
/// for out-of-scope crashes and closure escapes where repair cannot
/// proceed.
#[pyfunction]
fn abort_session(reason: &str) -> PyResult<()> {
    eprintln!("[child] Aborting repair session: {}", reason);
    if let Ok(channel) = channel() {
        let _ = channel.write(Mode::ValFail);
    }
    std::process::exit(1);
}

/// Repair session entry point, called from the except-handler with the
/// selected frame's context. Never returns on failure paths.
#[pyfunction]
#[allow(clippy::too_many_arguments)]
fn run_repair(
    py: Python<'_>,
    func_name: &str,
    filename: &str,
    lineno: usize,
    exception_msg: &str,
    exception_trace: &str,
    args: Bound<'_, PyDict>,
    kwargs: Bound<'_, PyDict>,
    globals: Bound<'_, PyDict>,
) -> PyResult<()> {
    let wdir = wdir()?;
    let request = RepairRequest {
        func_name: func_name.to_string(),
        filename: filename.to_string(),
        lineno,
        exception_msg: exception_msg.to_string(),
        exception_trace: exception_trace.to_string(),
        args,
        kwargs,
        globals,
    };

    match attempt_repair(py, &wdir, &request) {
        Ok(true) => Ok(()),
        Ok(false) => {
            eprintln!("[child] Repair exhausted all candidates");
            if let Ok(channel) = channel() {
                let _ = channel.write(Mode::ValFail);
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("[child] Repair session error: {:#}", e);
            if let Ok(channel) = channel() {
                let _ = channel.write(Mode::ValFail);
            }
            std::process::exit(1);
        }
    }
}

/// Register `newt_rt` in sys.modules so `import newt_rt` works everywhere.
pub fn inject_module(py: Python<'_>) -> PyResult<()> {
    let module = PyModule::new(py, "newt_rt")?;

    module.add_function(wrap_pyfunction!(matches, &module)?)?;
    module.add_function(wrap_pyfunction!(instrument_source, &module)?)?;
    module.add_function(wrap_pyfunction!(mode_check, &module)?)?;
    module.add_function(wrap_pyfunction!(safe_mode, &module)?)?;
    module.add_function(wrap_pyfunction!(repair_mode, &module)?)?;
    module.add_function(wrap_pyfunction!(validation_mode, &module)?)?;
    module.add_function(wrap_pyfunction!(validation_fail_mode, &module)?)?;
    module.add_function(wrap_pyfunction!(patch_exists, &module)?)?;
    module.add_function(wrap_pyfunction!(read_patch, &module)?)?;
    module.add_function(wrap_pyfunction!(ignored_exception, &module)?)?;
    module.add_function(wrap_pyfunction!(enclosing_toplevel_function, &module)?)?;
    module.add_function(wrap_pyfunction!(abort_session, &module)?)?;
    module.add_function(wrap_pyfunction!(run_repair, &module)?)?;

    let sys = py.import("sys")?;
    sys.getattr("modules")?.set_item("newt_rt", module)?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_module_registers_in_sys_modules() {
        Python::with_gil(|py| {
            inject_module(py).unwrap();
            let module = py.import("newt_rt").unwrap();
            assert!(module.getattr("instrument_source").is_ok());
            assert!(module.getattr("run_repair").is_ok());
            assert!(module.getattr("mode_check").is_ok());
        });
    }

    #[test]
    fn test_ignored_exception_defaults() {
        assert!(ignored_exception("StopIteration", ""));
        assert!(!ignored_exception("ZeroDivisionError", "division by zero"));
    }
}
