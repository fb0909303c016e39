//! Input mutator for the regression fuzz loop.
//!
//! Structural, type-dispatched mutation of captured Python argument values.
//! The PRNG is reseeded from the wall clock on every mutation so rapid
//! iterations do not correlate.

use anyhow::{Context as AnyhowContext, Result};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyBytes, PyDict, PyFloat, PyInt, PyList, PyString, PyTuple};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const INTERESTING_INTS: [i64; 8] = [0, -1, 1, 255, 256, 4096, -128, 32767];

pub struct Mutator {
    interesting_input_log: PathBuf,
    pub input_count: u64,
}

impl Mutator {
    pub fn new(wdir: &Path) -> Self {
        Self {
            interesting_input_log: wdir.join("mutation").join("interesting_inputs.json"),
            input_count: 0,
        }
    }

    fn rng(&self) -> StdRng {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        StdRng::seed_from_u64(nanos)
    }

    /// Mutate every captured positional and keyword argument, 1..=10 rounds
    /// each.
    pub fn mutate_inputs<'py>(
        &mut self,
        py: Python<'py>,
        args: &Bound<'py, PyDict>,
        kwargs: &Bound<'py, PyDict>,
    ) -> PyResult<(Bound<'py, PyDict>, Bound<'py, PyDict>)> {
        let mutated_args = PyDict::new(py);
        for (key, value) in args.iter() {
            mutated_args.set_item(&key, self.mutate_random_count(py, &value)?)?;
        }
        let mutated_kwargs = PyDict::new(py);
        for (key, value) in kwargs.iter() {
            mutated_kwargs.set_item(&key, self.mutate_random_count(py, &value)?)?;
        }

        self.input_count += 1;
        if self.input_count % 1_000_000 == 0 {
            eprintln!("[mutate] Generated {} mutated inputs", self.input_count);
        }

        Ok((mutated_args, mutated_kwargs))
    }

    fn mutate_random_count<'py>(
        &self,
        py: Python<'py>,
        value: &Bound<'py, PyAny>,
    ) -> PyResult<Bound<'py, PyAny>> {
        let rounds = self.rng().random_range(1..=10);
        let mut mutated = value.clone();
        for _ in 0..rounds {
            mutated = self.mutate_object(py, &mutated)?;
        }
        Ok(mutated)
    }

    /// One structural mutation, dispatched on the value's type. Unknown
    /// types pass through unchanged.
    pub fn mutate_object<'py>(
        &self,
        py: Python<'py>,
        obj: &Bound<'py, PyAny>,
    ) -> PyResult<Bound<'py, PyAny>> {
        let mut rng = self.rng();

        // Enum before everything: members are often int/str subclasses
        let enum_cls = py.import("enum")?.getattr("Enum")?;
        if obj.is_instance(&enum_cls)? {
            let members = py
                .import("builtins")?
                .getattr("list")?
                .call1((obj.getattr("__class__")?,))?;
            let members: Bound<PyList> = members.downcast_into()?;
            if members.len() > 0 {
                return members.get_item(rng.random_range(0..members.len()));
            }
            return Ok(obj.clone());
        }

        // bool before int: bool is an int subclass
        if obj.is_instance_of::<PyBool>() {
            let flag: bool = obj.extract()?;
            return Ok(PyBool::new(py, !flag).to_owned().into_any());
        }

        if obj.is_instance_of::<PyInt>() {
            // out-of-machine-range ints pass through untouched
            if let Ok(value) = obj.extract::<i64>() {
                return self.mutate_int(py, value, &mut rng);
            }
            return Ok(obj.clone());
        }

        if obj.is_instance_of::<PyFloat>() {
            let value: f64 = obj.extract()?;
            return Ok(self.mutate_float(value, &mut rng).into_pyobject(py)?.into_any());
        }

        if obj.is_instance_of::<PyString>() {
            let value: String = obj.extract()?;
            return Ok(PyString::new(py, &self.mutate_string(&value, &mut rng)).into_any());
        }

        if obj.is_instance_of::<PyBytes>() {
            let value: Vec<u8> = obj.extract()?;
            return Ok(PyBytes::new(py, &self.mutate_bytes(value, &mut rng)).into_any());
        }

        let path_cls = py.import("pathlib")?.getattr("Path")?;
        if obj.is_instance(&path_cls)? {
            return self.mutate_path(py, obj, &mut rng);
        }

        let pattern_cls = py.import("re")?.getattr("Pattern")?;
        if obj.is_instance(&pattern_cls)? {
            return self.mutate_regex(py, obj, &mut rng);
        }

        let mock_cls = py.import("unittest.mock")?.getattr("MagicMock")?;
        if obj.is_instance(&mock_cls)? {
            return self.mutate_mock(py, obj, &mut rng);
        }

        if let Ok(dict) = obj.getattr("__dict__") {
            if let Ok(dict) = dict.downcast_into::<PyDict>() {
                let fields: Vec<Bound<PyAny>> = dict.keys().iter().collect();
                if !fields.is_empty() {
                    let field = &fields[rng.random_range(0..fields.len())];
                    if let Some(value) = dict.get_item(field)? {
                        let mutated = self.mutate_object(py, &value)?;
                        obj.setattr(field.downcast::<PyString>()?, mutated)?;
                    }
                }
                return Ok(obj.clone());
            }
        }

        Ok(obj.clone())
    }

    fn mutate_int<'py>(
        &self,
        py: Python<'py>,
        value: i64,
        rng: &mut StdRng,
    ) -> PyResult<Bound<'py, PyAny>> {
        let mutated = match rng.random_range(0..3) {
            0 => {
                let bit = rng.random_range(0..32);
                value ^ (1i64 << bit)
            }
            1 => {
                let delta: i64 = rng.random_range(-35..=35);
                value.wrapping_add(delta)
            }
            _ => *INTERESTING_INTS.choose(rng).unwrap_or(&0),
        };
        Ok(mutated.into_pyobject(py)?.into_any())
    }

    fn mutate_float(&self, value: f64, rng: &mut StdRng) -> f64 {
        let bit = rng.random_range(0..64u32);
        f64::from_bits(value.to_bits() ^ (1u64 << bit))
    }

    fn mutate_string(&self, value: &str, rng: &mut StdRng) -> String {
        let mut chars: Vec<char> = value.chars().collect();

        if rng.random_bool(0.3) {
            let index = rng.random_range(0..=chars.len());
            chars.insert(index, char::from(rng.random_range(32u8..=126)));
        }

        if rng.random_bool(0.3) && !chars.is_empty() {
            let index = rng.random_range(0..chars.len());
            chars.remove(index);
        }

        if rng.random_bool(0.3) && !chars.is_empty() {
            let index = rng.random_range(0..chars.len());
            let bit = rng.random_range(0..8u32);
            let flipped = (chars[index] as u32) ^ (1 << bit);
            if let Some(c) = char::from_u32(flipped) {
                chars[index] = c;
            }
        }

        chars.into_iter().collect()
    }

    fn mutate_bytes(&self, mut value: Vec<u8>, rng: &mut StdRng) -> Vec<u8> {
        if rng.random_bool(0.3) {
            let index = rng.random_range(0..=value.len());
            value.insert(index, rng.random::<u8>());
        }

        if rng.random_bool(0.3) && !value.is_empty() {
            let index = rng.random_range(0..value.len());
            value.remove(index);
        }

        if rng.random_bool(0.3) && !value.is_empty() {
            let index = rng.random_range(0..value.len());
            let bit = rng.random_range(0..8u32);
            value[index] ^= 1 << bit;
        }

        // block copy
        if rng.random_bool(0.3) && value.len() > 1 {
            let start = rng.random_range(0..value.len());
            let size = rng.random_range(1..=(value.len() - start).min(4));
            let block: Vec<u8> = value[start..(start + size).min(value.len())].to_vec();
            let insert_at = rng.random_range(0..=value.len());
            value.splice(insert_at..insert_at, block);
        }

        // block deletion
        if rng.random_bool(0.3) && value.len() > 1 {
            let start = rng.random_range(0..value.len());
            let size = rng.random_range(1..=(value.len() - start).min(4));
            let end = (start + size).min(value.len());
            value.drain(start..end);
        }

        value
    }

    /// Paths come back as strings, one segment mutated.
    fn mutate_path<'py>(
        &self,
        py: Python<'py>,
        obj: &Bound<'py, PyAny>,
        rng: &mut StdRng,
    ) -> PyResult<Bound<'py, PyAny>> {
        let parts: Vec<String> = obj.getattr("parts")?.extract()?;
        let mut parts = parts;
        if parts.len() > 1 {
            let index = rng.random_range(1..parts.len());
            parts[index] = self.mutate_string(&parts[index], rng);
        }
        Ok(PyString::new(py, &parts.join("/")).into_any())
    }

    /// Mutate the pattern source and recompile; keep the original when the
    /// mutation no longer compiles.
    fn mutate_regex<'py>(
        &self,
        py: Python<'py>,
        obj: &Bound<'py, PyAny>,
        rng: &mut StdRng,
    ) -> PyResult<Bound<'py, PyAny>> {
        let source: String = obj.getattr("pattern")?.extract()?;
        let mutated = self.mutate_string(&source, rng);
        match py.import("re")?.getattr("compile")?.call1((mutated,)) {
            Ok(compiled) => Ok(compiled),
            Err(_) => Ok(obj.clone()),
        }
    }

    /// Randomize a mock's observable call history.
    fn mutate_mock<'py>(
        &self,
        py: Python<'py>,
        obj: &Bound<'py, PyAny>,
        rng: &mut StdRng,
    ) -> PyResult<Bound<'py, PyAny>> {
        let extra_calls = rng.random_range(0..100);
        for _ in 0..extra_calls {
            obj.call0()?;
        }

        obj.setattr("called", rng.random_bool(0.5))?;

        let call_args_list = PyList::empty(py);
        for _ in 0..rng.random_range(0..5) {
            let arg_count = rng.random_range(1..=3);
            let mut call_args: Vec<Bound<PyAny>> = Vec::new();
            for _ in 0..arg_count {
                let seed: i64 = rng.random_range(0..=10);
                call_args.push(self.mutate_object(py, &seed.into_pyobject(py)?.into_any())?);
            }
            let call_kwargs = PyDict::new(py);
            for i in 0..rng.random_range(0..=2) {
                let seed: i64 = rng.random_range(0..=10);
                call_kwargs.set_item(
                    format!("key{}", i),
                    self.mutate_object(py, &seed.into_pyobject(py)?.into_any())?,
                )?;
            }
            call_args_list.append((PyTuple::new(py, &call_args)?, call_kwargs))?;
        }
        obj.setattr("_mock_call_args_list", call_args_list)?;

        Ok(obj.clone())
    }

    /// Append the run's interesting mutations (those the buggy function
    /// survived) to the NDJSON log. Values that json can't encode fall back
    /// to their str() form.
    pub fn save_interesting_input(
        &self,
        py: Python<'_>,
        interesting: &[(Py<PyDict>, Py<PyDict>)],
    ) -> Result<()> {
        if let Some(parent) = self.interesting_input_log.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.interesting_input_log)
            .with_context(|| {
                format!("Cannot open {}", self.interesting_input_log.display())
            })?;

        let json = py.import("json").map_err(|e| anyhow::anyhow!("{}", e))?;
        let dumps = json.getattr("dumps").map_err(|e| anyhow::anyhow!("{}", e))?;
        let str_cls = py
            .import("builtins")
            .and_then(|b| b.getattr("str"))
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        for (index, (args, kwargs)) in interesting.iter().enumerate() {
            let record = PyDict::new(py);
            let line = record
                .set_item("index", index)
                .and_then(|_| record.set_item("args", args.bind(py)))
                .and_then(|_| record.set_item("kwargs", kwargs.bind(py)))
                .and_then(|_| {
                    let kw = PyDict::new(py);
                    kw.set_item("default", &str_cls)?;
                    kw.set_item("ensure_ascii", false)?;
                    dumps.call((record.clone(),), Some(&kw))?.extract::<String>()
                });
            match line {
                Ok(line) => writeln!(file, "{}", line)?,
                Err(e) => writeln!(
                    file,
                    "{{\"error\": \"log_failed\", \"index\": {}, \"reason\": \"{}\"}}",
                    index, e
                )?,
            }
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mutator() -> (Mutator, TempDir) {
        let temp = TempDir::new().unwrap();
        (Mutator::new(temp.path()), temp)
    }

    #[test]
    fn test_mutate_bool_negates() {
        Python::with_gil(|py| {
            let (m, _t) = mutator();
            let value = PyBool::new(py, true).to_owned().into_any();
            let mutated = m.mutate_object(py, &value).unwrap();
            assert!(!mutated.extract::<bool>().unwrap());
        });
    }

    #[test]
    fn test_mutate_int_changes_or_stays_interesting() {
        Python::with_gil(|py| {
            let (m, _t) = mutator();
            let value = 41i64.into_pyobject(py).unwrap().into_any();
            let mutated = m.mutate_object(py, &value).unwrap();
            // result stays an int, whatever the chosen mutation
            assert!(mutated.extract::<i64>().is_ok());
        });
    }

    #[test]
    fn test_mutate_float_is_bitflip() {
        Python::with_gil(|py| {
            let (m, _t) = mutator();
            let value = 1.5f64.into_pyobject(py).unwrap().into_any();
            let mutated = m.mutate_object(py, &value).unwrap().extract::<f64>().unwrap();
            // one flipped bit means the representation differs by a power of two mask
            let diff = mutated.to_bits() ^ 1.5f64.to_bits();
            assert_eq!(diff.count_ones(), 1);
        });
    }

    #[test]
    fn test_mutate_string_stays_string() {
        Python::with_gil(|py| {
            let (m, _t) = mutator();
            let value = PyString::new(py, "hello world").into_any();
            let mutated = m.mutate_object(py, &value).unwrap();
            assert!(mutated.extract::<String>().is_ok());
        });
    }

    #[test]
    fn test_mutate_bytes_stays_bytes() {
        Python::with_gil(|py| {
            let (m, _t) = mutator();
            let value = PyBytes::new(py, b"abcdef").into_any();
            let mutated = m.mutate_object(py, &value).unwrap();
            assert!(mutated.extract::<Vec<u8>>().is_ok());
        });
    }

    #[test]
    fn test_mutate_path_returns_string() {
        Python::with_gil(|py| {
            let (m, _t) = mutator();
            let path = py
                .import("pathlib")
                .unwrap()
                .getattr("Path")
                .unwrap()
                .call1(("/tmp/some/file.txt",))
                .unwrap();
            let mutated = m.mutate_object(py, &path).unwrap();
            let text: String = mutated.extract().unwrap();
            assert!(text.starts_with('/'));
        });
    }

    #[test]
    fn test_mutate_regex_always_compiles() {
        Python::with_gil(|py| {
            let (m, _t) = mutator();
            let pattern = py
                .import("re")
                .unwrap()
                .getattr("compile")
                .unwrap()
                .call1((r"\d+",))
                .unwrap();
            let mutated = m.mutate_object(py, &pattern).unwrap();
            // either the recompiled mutation or the original pattern
            assert!(mutated.getattr("pattern").is_ok());
        });
    }

    #[test]
    fn test_mutate_enum_picks_sibling() {
        Python::with_gil(|py| {
            let locals = PyDict::new(py);
            py.run(
                c"import enum\nclass Color(enum.Enum):\n    RED = 1\n    BLUE = 2\nvalue = Color.RED",
                None,
                Some(&locals),
            )
            .unwrap();
            let value = locals.get_item("value").unwrap().unwrap();
            let (m, _t) = mutator();
            let mutated = m.mutate_object(py, &value).unwrap();
            let cls = locals.get_item("Color").unwrap().unwrap();
            assert!(mutated.is_instance(&cls).unwrap());
        });
    }

    #[test]
    fn test_mutate_object_with_dict_mutates_attribute() {
        Python::with_gil(|py| {
            let locals = PyDict::new(py);
            py.run(
                c"class Box:\n    def __init__(self):\n        self.n = 7\nvalue = Box()",
                None,
                Some(&locals),
            )
            .unwrap();
            let value = locals.get_item("value").unwrap().unwrap();
            let (m, _t) = mutator();
            let mutated = m.mutate_object(py, &value).unwrap();
            // same object, attribute possibly rewritten but still an int
            assert!(mutated.getattr("n").unwrap().extract::<i64>().is_ok());
        });
    }

    #[test]
    fn test_mutate_inputs_covers_all_keys() {
        Python::with_gil(|py| {
            let (mut m, _t) = mutator();
            let args = PyDict::new(py);
            args.set_item("a", 1).unwrap();
            args.set_item("b", "text").unwrap();
            let kwargs = PyDict::new(py);
            kwargs.set_item("flag", true).unwrap();

            let (margs, mkwargs) = m.mutate_inputs(py, &args, &kwargs).unwrap();
            assert_eq!(margs.len(), 2);
            assert_eq!(mkwargs.len(), 1);
            assert_eq!(m.input_count, 1);
        });
    }

    #[test]
    fn test_save_interesting_input_appends_ndjson() {
        Python::with_gil(|py| {
            let temp = TempDir::new().unwrap();
            let m = Mutator::new(temp.path());

            let args = PyDict::new(py);
            args.set_item("a", 1).unwrap();
            let kwargs = PyDict::new(py);
            let batch = vec![(args.unbind(), kwargs.unbind())];

            m.save_interesting_input(py, &batch).unwrap();
            m.save_interesting_input(py, &batch).unwrap();

            let log = std::fs::read_to_string(
                temp.path().join("mutation").join("interesting_inputs.json"),
            )
            .unwrap();
            assert_eq!(log.lines().count(), 2);
            assert!(log.lines().all(|l| l.contains("\"args\"")));
        });
    }
}
