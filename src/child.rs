//! Child entrypoint: hosts the target program inside an embedded
//! interpreter with the import interceptor installed.
//!
//! The child is the forked half of the supervisor binary. It pins its fate
//! to the parent (dead-man switch), moves into the target project root,
//! injects the `newt_rt` native module, loads the bootstrap harness, and
//! runs the target script or module as `__main__`.

use anyhow::{anyhow, Context, Result};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyModule};
use std::env;
use std::path::{Path, PathBuf};

/// Embedded Python harness: import hook, dispatch builtins, crash handler.
const BOOTSTRAP_PY: &str = include_str!("bootstrap.py");

/// What the child should execute.
#[derive(Debug, Clone)]
pub enum ChildTarget {
    Script { path: PathBuf, args: Vec<String> },
    Module { name: String, args: Vec<String> },
}

pub fn entrypoint(target: &ChildTarget, instrument: bool) -> Result<()> {
    // if the supervisor dies, so do we; no orphaned targets
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL);
    }

    // downstream test runners locate the project through this root
    if let Ok(project_root) = env::var("TARGET_PROJECT_ROOT") {
        let root = Path::new(&project_root);
        if root.exists() {
            env::set_current_dir(root)
                .with_context(|| format!("Cannot chdir to {}", root.display()))?;
        }
    }

    eprintln!("[child] Initializing interpreter ...");
    Python::with_gil(|py| -> Result<()> {
        let sys = py.import("sys")?;
        let path_attr = sys.getattr("path")?;
        let path: &Bound<PyList> = path_attr
            .downcast()
            .map_err(|e| anyhow!("sys.path is not a list: {}", e))?;

        // the target resolves imports like a normal interpreter run would
        match target {
            ChildTarget::Script { path: script, .. } => {
                let script_dir = script
                    .parent()
                    .map(|p| p.to_path_buf())
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or_else(|| PathBuf::from("."));
                path.insert(0, script_dir.to_string_lossy().to_string())?;
            }
            ChildTarget::Module { .. } => {
                let cwd = env::current_dir()?;
                path.insert(0, cwd.to_string_lossy().to_string())?;
            }
        }

        if !instrument {
            return run_plain(py, target);
        }

        crate::rt::inject_module(py).map_err(|e| anyhow!("newt_rt injection failed: {}", e))?;

        let bootstrap_code = std::ffi::CString::new(BOOTSTRAP_PY)
            .map_err(|e| anyhow!("bootstrap harness contains NUL: {}", e))?;
        let harness = PyModule::from_code(
            py,
            &bootstrap_code,
            c"newt_bootstrap.py",
            c"newt_bootstrap",
        )?;
        sys.getattr("modules")?.set_item("newt_bootstrap", &harness)?;

        harness.getattr("install")?.call0()?;
        eprintln!("[child] Instrumentation hooks installed");

        match target {
            ChildTarget::Script { path: script, args } => {
                harness
                    .getattr("run_script")?
                    .call1((script.to_string_lossy().to_string(), args.clone()))?;
            }
            ChildTarget::Module { name, args } => {
                harness
                    .getattr("run_module")?
                    .call1((name.clone(), args.clone()))?;
            }
        }
        Ok(())
    })
}

/// `--ignore-repair`: behave like the plain interpreter, no hooks.
fn run_plain(py: Python<'_>, target: &ChildTarget) -> Result<()> {
    let runpy = py.import("runpy")?;
    let sys = py.import("sys")?;
    let options = PyDict::new(py);
    options.set_item("run_name", "__main__")?;

    match target {
        ChildTarget::Script { path: script, args } => {
            let mut argv = vec![script.to_string_lossy().to_string()];
            argv.extend(args.iter().cloned());
            sys.setattr("argv", argv)?;
            runpy
                .getattr("run_path")?
                .call((script.to_string_lossy().to_string(),), Some(&options))?;
        }
        ChildTarget::Module { name, args } => {
            let mut argv = vec![name.clone()];
            argv.extend(args.iter().cloned());
            sys.setattr("argv", argv)?;
            options.set_item("alter_sys", true)?;
            runpy
                .getattr("run_module")?
                .call((name.clone(),), Some(&options))?;
        }
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_harness_parses() {
        // the embedded harness must at least be valid Python
        Python::with_gil(|py| {
            let builtins = py.import("builtins").unwrap();
            let compiled = builtins
                .getattr("compile")
                .unwrap()
                .call1((BOOTSTRAP_PY, "bootstrap.py", "exec"));
            assert!(compiled.is_ok(), "bootstrap.py failed to compile");
        });
    }

    #[test]
    fn test_child_target_script_shape() {
        let target = ChildTarget::Script {
            path: PathBuf::from("app.py"),
            args: vec!["--x".to_string()],
        };
        match target {
            ChildTarget::Script { path, args } => {
                assert_eq!(path, PathBuf::from("app.py"));
                assert_eq!(args, vec!["--x"]);
            }
            _ => unreachable!(),
        }
    }
}
