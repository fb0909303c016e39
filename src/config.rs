//! Configuration Loader
//! - CLI argument parsing with clap
//! - Reads newt.toml for the tunable knobs (ignore lists, pipeline fan-out,
//!   mutation budget, oracle endpoint)

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Global config instance. Loaded once by the supervisor before forking so
/// the child inherits it through fork.
static CONFIG: OnceLock<ToolConfig> = OnceLock::new();

// =============================================================================
// CLI Configuration
// =============================================================================

/// LLM backend selector. Only changes which WDIR subdirectory the run uses;
/// the oracle shim picks the actual backend on its own CLI.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq)]
pub enum LlmModel {
    #[default]
    Gpt5,
    Qwen,
    Llama,
}

impl LlmModel {
    pub fn dir_name(self) -> &'static str {
        match self {
            LlmModel::Gpt5 => "gpt5",
            LlmModel::Qwen => "qwen",
            LlmModel::Llama => "llama",
        }
    }
}

/// Repair-pipeline ablations, selectable per run.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq)]
pub enum Ablation {
    /// Full tree-of-thought with feedback (default)
    #[default]
    None,
    /// Single LLM call returning a full rewrite
    SingleShot,
    /// Prompts omit the exception message / traceback
    NoDynamicContext,
    /// Failed-patch diffs are not injected into feedback rounds
    NoFeedback,
}

/// newt CLI - Runtime Automated Program Repair for Python
#[derive(Parser)]
#[command(name = "newt", version, about = "Runtime Automated Program Repair for Python")]
pub struct Cli {
    /// Working directory for checkpoints, patches and telemetry (REQUIRED)
    #[arg(long, env = "NEWT_WDIR")]
    pub wdir: PathBuf,

    /// Target project root to instrument (defaults to the script's directory)
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Re-raise instrumenter assembly errors instead of skipping the module
    #[arg(long)]
    pub throw_exception: bool,

    /// LLM backend (selects the WDIR subdirectory)
    #[arg(long = "llm_model", value_enum, default_value_t = LlmModel::Gpt5)]
    pub llm_model: LlmModel,

    /// Run the target uninstrumented, without the checkpoint loop
    #[arg(long)]
    pub ignore_repair: bool,

    /// Pipeline ablation mode
    #[arg(long, value_enum, default_value_t = Ablation::None)]
    pub ablation: Ablation,

    /// Run the given module as __main__ (like python -m)
    #[arg(short = 'm', value_name = "MODULE")]
    pub module: Option<String>,

    /// The script to run
    #[arg(value_name = "SCRIPT", required_unless_present = "module")]
    pub script: Option<PathBuf>,

    /// Arguments forwarded to the script or module
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// Arguments forwarded to the target. In module mode the first
    /// positional lands in the `script` slot; fold it back into the
    /// argument list.
    pub fn forwarded_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.module.is_some() {
            if let Some(script) = &self.script {
                args.push(script.to_string_lossy().into_owned());
            }
        }
        args.extend(self.args.iter().cloned());
        args
    }
}

// =============================================================================
// newt.toml
// =============================================================================

fn default_ignore_exceptions() -> Vec<String> {
    [
        "SystemExit",
        "KeyboardInterrupt",
        "GeneratorExit",
        "StopIteration",
        "NotThisMethod",
        "SkipTest",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ignore_messages() -> Vec<String> {
    vec![
        "Invalid frequency".to_string(),
        "data type not understood".to_string(),
    ]
}

fn default_exclude_keywords() -> Vec<String> {
    ["test", "tests", "__init__", "blib2to3", "managers", "jsinterp", "extractor"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_endpoint() -> String {
    "http://127.0.0.1:5000/request".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    /// Exception class names swallowed without repair
    pub exceptions: Vec<String>,
    /// Message substrings swallowed without repair
    pub message_substrings: Vec<String>,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            exceptions: default_ignore_exceptions(),
            message_substrings: default_ignore_messages(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Infrastructure path keywords excluded from instrumentation
    pub exclude_keywords: Vec<String>,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            exclude_keywords: default_exclude_keywords(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Independent comprehend samples before aggregation
    pub max_trial: usize,
    /// Fault-localization candidates generated
    pub fl_branch_num: usize,
    /// Fault-localization candidates kept after scoring
    pub fl_select_num: usize,
    /// Repair strategies generated per location
    pub sr_branch_num: usize,
    /// Repair strategies kept per location after scoring
    pub sr_select_num: usize,
    /// Feedback rounds after the initial patch generation
    pub max_recursion: usize,
    /// Per-call budget for malformed-JSON retries
    pub json_retries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_trial: 3,
            fl_branch_num: 3,
            fl_select_num: 1,
            sr_branch_num: 3,
            sr_select_num: 1,
            max_recursion: 3,
            json_retries: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Wall-clock budget for the regression fuzz loop, seconds
    pub max_mutation_duration_secs: u64,
    /// Compare origin/patch results in Val-2. Disabled by default; the
    /// active behavior only checks exception-freedom.
    pub compare_results: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_mutation_duration_secs: 60,
            compare_results: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// HTTP endpoint of the LLM shim
    pub endpoint: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
        }
    }
}

/// Everything tunable about a run, loaded from newt.toml when present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub ignore: IgnoreConfig,
    pub instrument: InstrumentConfig,
    pub pipeline: PipelineConfig,
    pub validation: ValidationConfig,
    pub oracle: OracleConfig,
}

impl ToolConfig {
    /// Load `newt.toml` from the given directory, falling back to defaults
    /// on a missing file. A present-but-broken file is reported and skipped.
    pub fn load(root: &Path) -> Self {
        let path = root.join("newt.toml");
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("[config] Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("[config] Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// True when the exception name or message matches the ignore lists.
    pub fn is_ignored_exception(&self, exc_name: &str, exc_msg: &str) -> bool {
        self.ignore.exceptions.iter().any(|n| n == exc_name)
            || self
                .ignore
                .message_substrings
                .iter()
                .any(|m| exc_msg.contains(m.as_str()))
    }
}

/// Install the global config. First caller wins; later calls are no-ops so
/// tests can pre-seed their own.
pub fn install(config: ToolConfig) {
    let _ = CONFIG.set(config);
}

/// Get the global config, defaulting if none was installed.
pub fn get() -> &'static ToolConfig {
    CONFIG.get_or_init(ToolConfig::default)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ToolConfig::default();
        assert_eq!(config.pipeline.max_trial, 3);
        assert_eq!(config.pipeline.fl_branch_num, 3);
        assert_eq!(config.pipeline.fl_select_num, 1);
        assert_eq!(config.pipeline.max_recursion, 3);
        assert_eq!(config.pipeline.json_retries, 10);
        assert_eq!(config.validation.max_mutation_duration_secs, 60);
        assert!(!config.validation.compare_results);
        assert_eq!(config.oracle.endpoint, "http://127.0.0.1:5000/request");
    }

    #[test]
    fn test_default_ignore_lists() {
        let config = ToolConfig::default();
        assert!(config.is_ignored_exception("StopIteration", ""));
        assert!(config.is_ignored_exception("SkipTest", "whatever"));
        assert!(config.is_ignored_exception("ValueError", "Invalid frequency: 5T"));
        assert!(!config.is_ignored_exception("ZeroDivisionError", "division by zero"));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ToolConfig::load(temp.path());
        assert_eq!(config.pipeline.sr_branch_num, 3);
    }

    #[test]
    fn test_load_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("newt.toml"),
            r#"
[validation]
max_mutation_duration_secs = 600

[ignore]
exceptions = ["CustomSkip"]
"#,
        )
        .unwrap();

        let config = ToolConfig::load(temp.path());
        assert_eq!(config.validation.max_mutation_duration_secs, 600);
        assert!(config.is_ignored_exception("CustomSkip", ""));
        // replaced, not merged
        assert!(!config.is_ignored_exception("StopIteration", ""));
        // untouched sections keep defaults
        assert_eq!(config.pipeline.max_trial, 3);
    }

    #[test]
    fn test_load_broken_file_falls_back() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("newt.toml"), "not [ valid { toml").unwrap();
        let config = ToolConfig::load(temp.path());
        assert_eq!(config.pipeline.max_trial, 3);
    }

    #[test]
    fn test_cli_parses_script_form() {
        let cli = Cli::try_parse_from([
            "newt",
            "--wdir",
            "/tmp/w",
            "--source",
            "/proj",
            "app.py",
            "--flag",
            "value",
        ])
        .unwrap();
        assert_eq!(cli.wdir, PathBuf::from("/tmp/w"));
        assert_eq!(cli.script, Some(PathBuf::from("app.py")));
        assert_eq!(cli.args, vec!["--flag", "value"]);
        assert!(cli.module.is_none());
    }

    #[test]
    fn test_cli_parses_module_form() {
        let cli = Cli::try_parse_from([
            "newt", "--wdir", "/tmp/w", "-m", "pkg.main", "arg1", "arg2",
        ])
        .unwrap();
        assert_eq!(cli.module.as_deref(), Some("pkg.main"));
        // the first module argument lands in the script slot and is folded back
        assert_eq!(cli.forwarded_args(), vec!["arg1", "arg2"]);
    }

    #[test]
    fn test_forwarded_args_script_mode() {
        let cli =
            Cli::try_parse_from(["newt", "--wdir", "/tmp/w", "app.py", "--flag"]).unwrap();
        assert_eq!(cli.forwarded_args(), vec!["--flag"]);
    }

    #[test]
    fn test_cli_requires_wdir_and_target() {
        assert!(Cli::try_parse_from(["newt", "script.py"]).is_err());
        assert!(Cli::try_parse_from(["newt", "--wdir", "/tmp/w"]).is_err());
    }

    #[test]
    fn test_llm_model_dir_names() {
        assert_eq!(LlmModel::Gpt5.dir_name(), "gpt5");
        assert_eq!(LlmModel::Qwen.dir_name(), "qwen");
        assert_eq!(LlmModel::Llama.dir_name(), "llama");
    }
}
