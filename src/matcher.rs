//! In-scope file predicate shared by supervisor and child.
//!
//! The supervisor builds the matcher from the CLI, serializes it to
//! `{WDIR}/tmp/file_matcher`, and the child deserializes it before
//! installing the import hook, so both sides agree on a single definition.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Suffixes of compiled extension modules that can never be instrumented.
const EXTENSION_SUFFIXES: [&str; 2] = ["so", "pyd"];

/// Predicate over absolute source paths: descendants of a declared root,
/// minus globs, keyword matches, and stdlib/site-packages locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileMatcher {
    cwd: PathBuf,
    sources: Vec<PathBuf>,
    omit: Vec<String>,
    exclude_keywords: Vec<String>,
    pylib_paths: Vec<PathBuf>,
}

impl FileMatcher {
    pub fn new() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            sources: Vec::new(),
            omit: Vec::new(),
            exclude_keywords: Vec::new(),
            pylib_paths: Vec::new(),
        }
    }

    /// Declare an instrumentation root. Relative paths resolve against the
    /// matcher's cwd.
    pub fn add_source(&mut self, source: impl Into<PathBuf>) {
        let source: PathBuf = source.into();
        let source = if source.is_absolute() {
            source
        } else {
            self.cwd.join(source)
        };
        self.sources.push(source);
    }

    /// Omit a glob-ish pattern. Bare patterns are anchored to cwd unless
    /// they start with `*`.
    pub fn add_omit(&mut self, omit: &str) {
        if omit.starts_with('*') {
            self.omit.push(omit.to_string());
        } else {
            self.omit.push(self.cwd.join(omit).to_string_lossy().into_owned());
        }
    }

    /// Reject any path whose string form contains `keyword`. Used for the
    /// infrastructure blocklist (tests, init files, vendor subpaths).
    pub fn add_exclude_keyword(&mut self, keyword: &str) {
        self.exclude_keywords.push(keyword.to_string());
    }

    /// Record a standard-library / site-packages location to reject when no
    /// explicit sources were declared.
    pub fn add_pylib_path(&mut self, path: impl Into<PathBuf>) {
        self.pylib_paths.push(path.into());
    }

    pub fn has_sources(&self) -> bool {
        !self.sources.is_empty()
    }

    pub fn matches(&self, filename: &str) -> bool {
        // importlib reports builtins with a non-path origin
        if filename.is_empty() || filename == "built-in" || filename == "frozen" {
            return false;
        }

        let path = Path::new(filename);
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if EXTENSION_SUFFIXES.contains(&ext) {
                return false;
            }
        }

        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        };

        if self.omit.iter().any(|o| glob_match(o, &path.to_string_lossy())) {
            return false;
        }

        let path_str = path.to_string_lossy();
        if self.exclude_keywords.iter().any(|kw| path_str.contains(kw.as_str())) {
            return false;
        }

        if !self.sources.is_empty() {
            return self
                .sources
                .iter()
                .any(|s| *s == path || path.ancestors().skip(1).any(|a| a == s));
        }

        if self
            .pylib_paths
            .iter()
            .any(|p| path.ancestors().skip(1).any(|a| a == p))
        {
            return false;
        }

        path.ancestors().skip(1).any(|a| a == self.cwd)
    }

    /// Serialize to the WDIR contract file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self).context("Failed to serialize file matcher")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)
            .with_context(|| format!("Failed to write file matcher to {}", path.display()))
    }

    /// Deserialize from the WDIR contract file (child side).
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read file matcher from {}", path.display()))?;
        bincode::deserialize(&bytes).context("Failed to deserialize file matcher")
    }
}

/// Minimal `*`-only glob: enough for the omit patterns the CLI accepts.
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut pos = 0usize;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == parts.len() - 1 {
            return text[pos..].ends_with(part);
        } else {
            match text[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }
    true
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn matcher_with_source(root: &str) -> FileMatcher {
        let mut m = FileMatcher::new();
        m.add_source(root);
        m
    }

    #[test]
    fn test_matches_descendant_of_source() {
        let m = matcher_with_source("/proj");
        assert!(m.matches("/proj/pkg/mod.py"));
        assert!(m.matches("/proj/top.py"));
        assert!(!m.matches("/other/pkg/mod.py"));
    }

    #[test]
    fn test_source_itself_matches() {
        let m = matcher_with_source("/proj/mod.py");
        assert!(m.matches("/proj/mod.py"));
    }

    #[test]
    fn test_rejects_extension_modules() {
        let m = matcher_with_source("/proj");
        assert!(!m.matches("/proj/native.so"));
        assert!(!m.matches("/proj/native.pyd"));
    }

    #[test]
    fn test_rejects_builtin_origins() {
        let m = matcher_with_source("/proj");
        assert!(!m.matches("built-in"));
        assert!(!m.matches("frozen"));
        assert!(!m.matches(""));
    }

    #[test]
    fn test_exclude_keywords() {
        let mut m = matcher_with_source("/proj");
        m.add_exclude_keyword("tests");
        m.add_exclude_keyword("__init__");
        assert!(!m.matches("/proj/tests/test_mod.py"));
        assert!(!m.matches("/proj/pkg/__init__.py"));
        assert!(m.matches("/proj/pkg/mod.py"));
    }

    #[test]
    fn test_omit_glob() {
        let mut m = matcher_with_source("/proj");
        m.add_omit("*generated*");
        assert!(!m.matches("/proj/generated_api.py"));
        assert!(m.matches("/proj/api.py"));
    }

    #[test]
    fn test_pylib_rejected_without_sources() {
        let mut m = FileMatcher::new();
        m.add_pylib_path("/usr/lib/python3.11");
        assert!(!m.matches("/usr/lib/python3.11/json/decoder.py"));
    }

    #[test]
    fn test_save_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let mut m = matcher_with_source("/proj");
        m.add_exclude_keyword("vendor");

        let path = temp.path().join("tmp").join("file_matcher");
        m.save(&path).unwrap();

        let loaded = FileMatcher::load(&path).unwrap();
        assert!(loaded.matches("/proj/mod.py"));
        assert!(!loaded.matches("/proj/vendor/mod.py"));
    }

    #[test]
    fn test_glob_match_basics() {
        assert!(glob_match("*foo*", "a/foo/b"));
        assert!(glob_match("/a/*", "/a/b/c"));
        assert!(glob_match("*.py", "mod.py"));
        assert!(!glob_match("*.py", "mod.rs"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "inexact"));
    }
}
