//! Instrumenter integration: rewritten modules executed by a real
//! interpreter, with the dispatch builtins stubbed in-process.

use newt_core::instrument::{wrap_patch_only, wrap_user_functions};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyModule};

/// Compile and exec an instrumented module with scriptable dispatch stubs.
/// Returns the module namespace.
fn exec_instrumented<'py>(py: Python<'py>, source: &str) -> Bound<'py, PyModule> {
    let instrumented = wrap_user_functions(source, "target.py").unwrap();

    let stub_source = r#"
import builtins

PATCHES = {}
MODE = {"value": "0"}
CALLS = []

builtins.__newt_patch_exists__ = lambda name: name in PATCHES
builtins.__newt_mode__ = lambda: MODE["value"]
builtins.__newt_load_patch__ = lambda name: PATCHES[name]
builtins.__newt_on_error__ = lambda name, exc: CALLS.append((name, type(exc).__name__))

def set_patch(name, source, func_name=None):
    func_name = func_name or name
    module_code = compile(source, "<patch>", "exec")
    for const in module_code.co_consts:
        if hasattr(const, "co_name") and const.co_name == func_name:
            PATCHES[name] = const
            return
    raise ValueError("no code object for " + func_name)
"#;
    let stub_code = std::ffi::CString::new(stub_source).unwrap();
    let stubs = PyModule::from_code(py, &stub_code, c"stubs.py", c"newt_test_stubs").unwrap();

    let code = std::ffi::CString::new(instrumented).unwrap();
    let module = PyModule::from_code(py, &code, c"target.py", c"target").unwrap();

    // keep the stub handle reachable from the test body
    module.setattr("_stubs", &stubs).unwrap();
    module
}

fn stubs<'py>(module: &Bound<'py, PyModule>) -> Bound<'py, PyAny> {
    module.getattr("_stubs").unwrap()
}

#[test]
fn happy_path_is_semantically_transparent() {
    Python::with_gil(|py| {
        let module = exec_instrumented(py, "def add(a, b):\n    return a + b\n");
        let result: i64 = module
            .getattr("add")
            .unwrap()
            .call1((2, 3))
            .unwrap()
            .extract()
            .unwrap();
        assert_eq!(result, 5);

        // no handler calls, no patch lookups that mattered
        let calls = stubs(&module).getattr("CALLS").unwrap();
        assert_eq!(calls.len().unwrap(), 0);
    });
}

#[test]
fn exception_reaches_handler_then_reraises() {
    Python::with_gil(|py| {
        let module = exec_instrumented(py, "def boom(n):\n    return 1 / n\n");
        let err = module.getattr("boom").unwrap().call1((0,)).unwrap_err();
        assert!(err.to_string().contains("ZeroDivisionError"));

        let calls = stubs(&module).getattr("CALLS").unwrap();
        assert_eq!(calls.len().unwrap(), 1);
        let first = calls.get_item(0).unwrap();
        let (name, exc): (String, String) = first.extract().unwrap();
        assert_eq!(name, "boom");
        assert_eq!(exc, "ZeroDivisionError");
    });
}

#[test]
fn patch_dispatch_swaps_code_and_bypasses_afterwards() {
    Python::with_gil(|py| {
        let module = exec_instrumented(py, "def add(a, b):\n    return a + b\n");
        let stubs = stubs(&module);

        stubs
            .getattr("set_patch")
            .unwrap()
            .call1(("add", "def add(a, b):\n    return (a + b) * 10\n"))
            .unwrap();

        // first call dispatches to the patch
        let patched: i64 = module
            .getattr("add")
            .unwrap()
            .call1((2, 3))
            .unwrap()
            .extract()
            .unwrap();
        assert_eq!(patched, 50);

        // dropping the on-disk patch no longer matters: __code__ is rebound
        stubs.getattr("PATCHES").unwrap().call_method0("clear").unwrap();
        let still_patched: i64 = module
            .getattr("add")
            .unwrap()
            .call1((4, 4))
            .unwrap()
            .extract()
            .unwrap();
        assert_eq!(still_patched, 80);
    });
}

#[test]
fn patch_ignored_outside_safe_mode() {
    Python::with_gil(|py| {
        let module = exec_instrumented(py, "def add(a, b):\n    return a + b\n");
        let stubs = stubs(&module);

        stubs
            .getattr("set_patch")
            .unwrap()
            .call1(("add", "def add(a, b):\n    return 0\n"))
            .unwrap();
        stubs
            .getattr("MODE")
            .unwrap()
            .set_item("value", "1")
            .unwrap();

        let result: i64 = module
            .getattr("add")
            .unwrap()
            .call1((2, 3))
            .unwrap()
            .extract()
            .unwrap();
        assert_eq!(result, 5);
    });
}

#[test]
fn kwonly_and_varargs_conventions_survive() {
    Python::with_gil(|py| {
        let source = "def join(sep, *items, upper=False, **extra):\n    text = sep.join(items)\n    return text.upper() if upper else text\n";
        let module = exec_instrumented(py, source);

        let kwargs = PyDict::new(py);
        kwargs.set_item("upper", true).unwrap();
        let result: String = module
            .getattr("join")
            .unwrap()
            .call(("-", "a", "b"), Some(&kwargs))
            .unwrap()
            .extract()
            .unwrap();
        assert_eq!(result, "A-B");
    });
}

#[test]
fn zero_arg_function_instruments_cleanly() {
    Python::with_gil(|py| {
        let module = exec_instrumented(py, "def ping():\n    return \"pong\"\n");
        let result: String = module
            .getattr("ping")
            .unwrap()
            .call0()
            .unwrap()
            .extract()
            .unwrap();
        assert_eq!(result, "pong");
    });
}

#[test]
fn nested_functions_wrapped_but_methods_untouched() {
    Python::with_gil(|py| {
        let source = r#"
def outer(x):
    def inner(y):
        return y / 0
    return inner(x)

class Widget:
    def method(self):
        return 1 / 0
"#;
        let module = exec_instrumented(py, source);
        let stubs = stubs(&module);

        // nested function reports through the handler (inner first, then
        // the enclosing frame's own epilogue)
        let err = module.getattr("outer").unwrap().call1((1,)).unwrap_err();
        assert!(err.to_string().contains("ZeroDivisionError"));
        let calls = stubs.getattr("CALLS").unwrap();
        let first: (String, String) = calls.get_item(0).unwrap().extract().unwrap();
        assert_eq!(first.0, "inner");

        // class body untouched: a crashing method never calls the handler
        let before = calls.len().unwrap();
        let widget = module.getattr("Widget").unwrap().call0().unwrap();
        assert!(widget.call_method0("method").is_err());
        assert_eq!(calls.len().unwrap(), before);
    });
}

#[test]
fn generator_functions_keep_yield_semantics() {
    Python::with_gil(|py| {
        let source = "def counter(n):\n    for i in range(n):\n        yield i\n";
        let module = exec_instrumented(py, source);
        let items: Vec<i64> = module
            .getattr("counter")
            .unwrap()
            .call1((3,))
            .unwrap()
            .try_iter()
            .unwrap()
            .map(|item| item.unwrap().extract().unwrap())
            .collect();
        assert_eq!(items, vec![0, 1, 2]);
    });
}

#[test]
fn instrumentation_is_idempotent() {
    let source = "def f(a):\n    return a\n";
    let once = wrap_user_functions(source, "t.py").unwrap();
    let twice = wrap_user_functions(&once, "t.py").unwrap();
    assert_eq!(once, twice);
}

#[test]
fn shielded_patch_executes_and_reports() {
    Python::with_gil(|py| {
        let patch_source = "def fixed(a):\n    return a / 0\n";
        let shielded = wrap_patch_only(patch_source, "patch.py").unwrap();

        // run the shielded function under the stubs; it must consult the
        // handler exactly like instrumented user code
        let module = exec_instrumented(py, "def placeholder():\n    return 1\n");
        let stubs = stubs(&module);

        let code = std::ffi::CString::new(shielded).unwrap();
        let patch_module = PyModule::from_code(py, &code, c"patch.py", c"patch").unwrap();
        let err = patch_module.getattr("fixed").unwrap().call1((1,)).unwrap_err();
        assert!(err.to_string().contains("ZeroDivisionError"));

        let calls = stubs.getattr("CALLS").unwrap();
        let last: (String, String) = calls
            .get_item(calls.len().unwrap() - 1)
            .unwrap()
            .extract()
            .unwrap();
        assert_eq!(last.0, "fixed");
    });
}
