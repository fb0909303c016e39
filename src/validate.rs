//! Two-phase patch validator.
//!
//! Val-1 re-executes the bare (unshielded) candidate on the exact captured
//! arguments; passing means the crash input no longer raises, and the bare
//! form guarantees the run cannot re-enter the repair machinery. Val-2
//! fuzzes mutated arguments against the buggy and patched functions for a
//! wall-clock budget and fails on any input the buggy function survives but
//! the patch does not.

use crate::config::ValidationConfig;
use crate::mutate::Mutator;
use anyhow::Result;
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict, PyTuple};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub struct Validator {
    wdir: PathBuf,
    max_mutation_duration: Duration,
    compare_results: bool,
    /// message of the last Val-1 failure, for the session log
    pub validation_exception: String,
}

impl Validator {
    pub fn new(wdir: &Path, config: &ValidationConfig) -> Self {
        Self {
            wdir: wdir.to_path_buf(),
            max_mutation_duration: Duration::from_secs(config.max_mutation_duration_secs),
            compare_results: config.compare_results,
            validation_exception: String::new(),
        }
    }

    // =========================================================================
    // Validation 1: exception avoidance on the captured inputs
    // =========================================================================

    /// Rebuild a callable from the marshalled `_val1_patch` code object and
    /// run it on the captured args. True iff nothing propagates.
    pub fn validate_patch(
        &mut self,
        py: Python<'_>,
        patch_file: &Path,
        func_name: &str,
        args: &Bound<'_, PyDict>,
        kwargs: &Bound<'_, PyDict>,
        globals: &Bound<'_, PyDict>,
    ) -> bool {
        eprintln!("[val-1] Validating patch for '{}'", func_name);

        let outcome = (|| -> PyResult<String> {
            let bytes = std::fs::read(patch_file).map_err(|e| {
                pyo3::exceptions::PyOSError::new_err(format!(
                    "cannot read {}: {}",
                    patch_file.display(),
                    e
                ))
            })?;
            let code = py
                .import("marshal")?
                .getattr("loads")?
                .call1((PyBytes::new(py, &bytes),))?;
            let result = input_test(py, &code, func_name, args, kwargs, globals)?;
            Ok(result.get_type().name()?.to_string())
        })();

        match outcome {
            Ok(result_type) => {
                eprintln!("[val-1] Passed. Result type: {}", result_type);
                true
            }
            Err(e) => {
                self.validation_exception = e.to_string();
                eprintln!("[val-1] Failed: {}", e);
                false
            }
        }
    }

    // =========================================================================
    // Validation 2: regression under mutation
    // =========================================================================

    /// Fuzz until the wall-clock budget runs out. A mutation the buggy
    /// function raises on is outside the exercised contract and is skipped;
    /// one it survives is "interesting" and the patch must survive it too.
    pub fn regression_test(
        &self,
        py: Python<'_>,
        func_name: &str,
        origin_code: &Bound<'_, PyAny>,
        patch_code: &Bound<'_, PyAny>,
        args: &Bound<'_, PyDict>,
        kwargs: &Bound<'_, PyDict>,
        globals: &Bound<'_, PyDict>,
    ) -> Result<bool> {
        let start = Instant::now();
        let mut mutator = Mutator::new(&self.wdir);
        let mut interesting: Vec<(Py<PyDict>, Py<PyDict>)> = Vec::new();

        eprintln!(
            "[val-2] Starting regression test for {}s",
            self.max_mutation_duration.as_secs()
        );

        while start.elapsed() < self.max_mutation_duration {
            let (mutated_args, mutated_kwargs) = match mutator.mutate_inputs(py, args, kwargs) {
                Ok(pair) => pair,
                Err(e) => {
                    eprintln!("[val-2] Mutation error, skipping iteration: {}", e);
                    continue;
                }
            };

            let origin_result = match input_test(
                py,
                origin_code,
                func_name,
                &mutated_args,
                &mutated_kwargs,
                globals,
            ) {
                Ok(result) => result,
                // buggy function rejects this mutation: not a regression input
                Err(_) => continue,
            };

            interesting.push((
                mutated_args.clone().unbind(),
                mutated_kwargs.clone().unbind(),
            ));

            match input_test(
                py,
                patch_code,
                func_name,
                &mutated_args,
                &mutated_kwargs,
                globals,
            ) {
                Ok(patch_result) => {
                    if self.compare_results && !results_equal(&origin_result, &patch_result) {
                        self.flush_interesting(py, &mutator, &interesting);
                        eprintln!(
                            "[val-2] Result mismatch after {} mutated inputs",
                            mutator.input_count
                        );
                        return Ok(false);
                    }
                }
                Err(e) => {
                    self.flush_interesting(py, &mutator, &interesting);
                    eprintln!(
                        "[val-2] Regression test failed with {} mutated inputs. Exception: {}",
                        mutator.input_count, e
                    );
                    return Ok(false);
                }
            }
        }

        self.flush_interesting(py, &mutator, &interesting);
        eprintln!(
            "[val-2] Regression test passed for all {} mutated inputs within duration",
            mutator.input_count
        );
        Ok(true)
    }

    fn flush_interesting(
        &self,
        py: Python<'_>,
        mutator: &Mutator,
        interesting: &[(Py<PyDict>, Py<PyDict>)],
    ) {
        if interesting.is_empty() {
            eprintln!("[val-2] No interesting input found during mutation");
            return;
        }
        eprintln!("[val-2] Saving {} interesting inputs", interesting.len());
        if let Err(e) = mutator.save_interesting_input(py, interesting) {
            eprintln!("[val-2] Could not save interesting inputs: {}", e);
        }
    }
}

/// Rebuild a function from a code object bound to the captured globals and
/// call it, mapping captured values onto the signature: declared parameters
/// positionally, everything else through **kwargs. Lazy sequences are fully
/// driven so deferred exceptions surface here.
pub fn input_test<'py>(
    py: Python<'py>,
    code: &Bound<'py, PyAny>,
    func_name: &str,
    args: &Bound<'py, PyDict>,
    kwargs: &Bound<'py, PyDict>,
    globals: &Bound<'py, PyDict>,
) -> PyResult<Bound<'py, PyAny>> {
    let types = py.import("types")?;
    let func = types
        .getattr("FunctionType")?
        .call1((code, globals, func_name))?;

    let signature = py.import("inspect")?.getattr("signature")?.call1((&func,))?;
    let parameters = signature.getattr("parameters")?;

    let mut positional: Vec<Bound<PyAny>> = Vec::new();
    for name in parameters.try_iter()? {
        let name = name?;
        if let Some(value) = args.get_item(&name)? {
            positional.push(value);
        }
    }

    let call_kwargs = PyDict::new(py);
    for (key, value) in kwargs.iter() {
        if !parameters.contains(&key)? {
            call_kwargs.set_item(key, value)?;
        }
    }

    let result = func.call(PyTuple::new(py, &positional)?, Some(&call_kwargs))?;

    if result.is_instance(&types.getattr("GeneratorType")?)? {
        for item in result.try_iter()? {
            item?;
        }
    }

    Ok(result)
}

fn results_equal(a: &Bound<'_, PyAny>, b: &Bound<'_, PyAny>) -> bool {
    a.eq(b).unwrap_or(false)
}

/// Compile a function's source and return the code object of the named
/// function, searching the module constants the way the dispatch loader
/// will.
pub fn function_code<'py>(
    py: Python<'py>,
    source: &str,
    func_name: &str,
) -> PyResult<Bound<'py, PyAny>> {
    let builtins = py.import("builtins")?;
    let module_code = builtins
        .getattr("compile")?
        .call1((source, "<patch>", "exec"))?;

    for constant in module_code.getattr("co_consts")?.try_iter()? {
        let constant = constant?;
        if constant.hasattr("co_name")?
            && constant.getattr("co_name")?.extract::<String>()? == func_name
        {
            return Ok(constant);
        }
    }
    Err(pyo3::exceptions::PyValueError::new_err(format!(
        "no code object named {} in compiled source",
        func_name
    )))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn compile_and_marshal(py: Python<'_>, source: &str, func_name: &str, path: &Path) {
        let code = function_code(py, source, func_name).unwrap();
        let blob = py
            .import("marshal")
            .unwrap()
            .getattr("dumps")
            .unwrap()
            .call1((code,))
            .unwrap();
        let bytes: Vec<u8> = blob.extract().unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn quick_config(secs: u64) -> ValidationConfig {
        ValidationConfig {
            max_mutation_duration_secs: secs,
            compare_results: false,
        }
    }

    #[test]
    fn test_function_code_finds_named_function() {
        Python::with_gil(|py| {
            let code = function_code(py, "def f(a):\n    return a + 1\n", "f").unwrap();
            assert_eq!(
                code.getattr("co_name").unwrap().extract::<String>().unwrap(),
                "f"
            );
        });
    }

    #[test]
    fn test_function_code_missing_function() {
        Python::with_gil(|py| {
            assert!(function_code(py, "x = 1\n", "f").is_err());
        });
    }

    #[test]
    fn test_input_test_runs_function() {
        Python::with_gil(|py| {
            let code = function_code(py, "def add(a, b):\n    return a + b\n", "add").unwrap();
            let args = PyDict::new(py);
            args.set_item("a", 2).unwrap();
            args.set_item("b", 3).unwrap();
            let kwargs = PyDict::new(py);
            let globals = PyDict::new(py);

            let result = input_test(py, &code, "add", &args, &kwargs, &globals).unwrap();
            assert_eq!(result.extract::<i64>().unwrap(), 5);
        });
    }

    #[test]
    fn test_input_test_drains_generators() {
        Python::with_gil(|py| {
            // the exception only surfaces when the generator is driven
            let source = "def gen(n):\n    yield 1\n    yield 1 // n\n";
            let code = function_code(py, source, "gen").unwrap();
            let args = PyDict::new(py);
            args.set_item("n", 0).unwrap();
            let kwargs = PyDict::new(py);
            let globals = PyDict::new(py);

            assert!(input_test(py, &code, "gen", &args, &kwargs, &globals).is_err());
        });
    }

    #[test]
    fn test_input_test_extra_kwargs_outside_signature() {
        Python::with_gil(|py| {
            let source = "def f(a, **rest):\n    return a + rest.get('bonus', 0)\n";
            let code = function_code(py, source, "f").unwrap();
            let args = PyDict::new(py);
            args.set_item("a", 1).unwrap();
            let kwargs = PyDict::new(py);
            kwargs.set_item("bonus", 10).unwrap();
            let globals = PyDict::new(py);

            let result = input_test(py, &code, "f", &args, &kwargs, &globals).unwrap();
            assert_eq!(result.extract::<i64>().unwrap(), 11);
        });
    }

    #[test]
    fn test_val1_passes_on_fixed_function() {
        Python::with_gil(|py| {
            let temp = TempDir::new().unwrap();
            let patch_file = temp.path().join("div_val1_patch");
            compile_and_marshal(
                py,
                "def div(a, b):\n    if b == 0:\n        return 0\n    return a / b\n",
                "div",
                &patch_file,
            );

            let args = PyDict::new(py);
            args.set_item("a", 1).unwrap();
            args.set_item("b", 0).unwrap();
            let kwargs = PyDict::new(py);
            let globals = PyDict::new(py);

            let mut validator = Validator::new(temp.path(), &quick_config(1));
            assert!(validator.validate_patch(py, &patch_file, "div", &args, &kwargs, &globals));
        });
    }

    #[test]
    fn test_val1_fails_on_still_buggy_function() {
        Python::with_gil(|py| {
            let temp = TempDir::new().unwrap();
            let patch_file = temp.path().join("div_val1_patch");
            compile_and_marshal(py, "def div(a, b):\n    return a / b\n", "div", &patch_file);

            let args = PyDict::new(py);
            args.set_item("a", 1).unwrap();
            args.set_item("b", 0).unwrap();
            let kwargs = PyDict::new(py);
            let globals = PyDict::new(py);

            let mut validator = Validator::new(temp.path(), &quick_config(1));
            assert!(!validator.validate_patch(py, &patch_file, "div", &args, &kwargs, &globals));
            assert!(validator.validation_exception.contains("ZeroDivision"));
        });
    }

    #[test]
    fn test_val2_accepts_guarded_patch() {
        Python::with_gil(|py| {
            let temp = TempDir::new().unwrap();
            let origin =
                function_code(py, "def f(a):\n    return a + 1\n", "f").unwrap();
            let patched =
                function_code(py, "def f(a):\n    return a + 1 if a is not None else 0\n", "f")
                    .unwrap();

            let args = PyDict::new(py);
            args.set_item("a", 5).unwrap();
            let kwargs = PyDict::new(py);
            let globals = PyDict::new(py);

            let validator = Validator::new(temp.path(), &quick_config(1));
            let passed = validator
                .regression_test(py, "f", &origin, &patched, &args, &kwargs, &globals)
                .unwrap();
            assert!(passed);
        });
    }

    #[test]
    fn test_val2_rejects_regressing_patch() {
        Python::with_gil(|py| {
            let temp = TempDir::new().unwrap();
            // origin tolerates every int; "patch" divides by the input
            let origin = function_code(py, "def f(a):\n    return a\n", "f").unwrap();
            let patched = function_code(py, "def f(a):\n    return 100 // a\n", "f").unwrap();

            let args = PyDict::new(py);
            args.set_item("a", 7).unwrap();
            let kwargs = PyDict::new(py);
            let globals = PyDict::new(py);

            let validator = Validator::new(temp.path(), &quick_config(30));
            let passed = validator
                .regression_test(py, "f", &origin, &patched, &args, &kwargs, &globals)
                .unwrap();
            // int mutation reaches 0 (an interesting value) quickly
            assert!(!passed);
            assert!(temp
                .path()
                .join("mutation")
                .join("interesting_inputs.json")
                .exists());
        });
    }

    #[test]
    fn test_val2_always_terminates_with_decision() {
        Python::with_gil(|py| {
            let temp = TempDir::new().unwrap();
            let origin = function_code(py, "def f(a):\n    return a\n", "f").unwrap();
            let patched = function_code(py, "def f(a):\n    return a\n", "f").unwrap();

            let args = PyDict::new(py);
            args.set_item("a", 1).unwrap();
            let kwargs = PyDict::new(py);
            let globals = PyDict::new(py);

            let validator = Validator::new(temp.path(), &quick_config(1));
            let started = Instant::now();
            let verdict = validator
                .regression_test(py, "f", &origin, &patched, &args, &kwargs, &globals)
                .unwrap();
            assert!(verdict);
            assert!(started.elapsed() < Duration::from_secs(10));
        });
    }
}
