//! Supervisor entry point.
//!
//! Prepares the working directory, serializes the file-matcher contract,
//! forks the instrumented child, takes the baseline checkpoint, and drives
//! the CRIU monitoring loop until the run completes or the repair session
//! fails.

use anyhow::{bail, Context, Result};
use clap::Parser;
use newt_core::checkpoint::{Checkpointer, RunOutcome};
use newt_core::child::{self, ChildTarget};
use newt_core::config::{self, Ablation, Cli, ToolConfig};
use newt_core::lifecycle::CleanupGuard;
use newt_core::matcher::FileMatcher;
use newt_core::mode::ModeChannel;
use newt_core::signals;
use newt_core::telemetry::Reporter;
use nix::sys::wait::waitpid;
use nix::unistd::{fork, ForkResult};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // --- WORKING DIRECTORY ---
    fs::create_dir_all(&cli.wdir)
        .with_context(|| format!("Cannot create {}", cli.wdir.display()))?;
    let wdir = cli
        .wdir
        .canonicalize()
        .context("Cannot resolve --wdir")?
        .join(cli.llm_model.dir_name());
    fs::create_dir_all(&wdir)?;
    env::set_var("WDIR", &wdir);

    for sub in ["instrumented", "patch_file", "log", "tmp", "mutation"] {
        clean_and_create(&wdir.join(sub))?;
    }

    // --- CONFIG ---
    let tool_config = ToolConfig::load(&env::current_dir()?);
    config::install(tool_config.clone());
    env::set_var(
        "NEWT_ABLATION",
        match cli.ablation {
            Ablation::None => "none",
            Ablation::SingleShot => "single-shot",
            Ablation::NoDynamicContext => "no-dynamic-context",
            Ablation::NoFeedback => "no-feedback",
        },
    );
    env::set_var(
        "NEWT_THROW_EXCEPTION",
        if cli.throw_exception { "1" } else { "0" },
    );

    let reporter = Reporter::open(
        &wdir,
        Some(env::args().collect::<Vec<_>>().join(" ")),
    );
    eprintln!("[supervisor] newt started! Working directory: {}", wdir.display());

    // --- INSTRUMENTATION SCOPE ---
    let mut matcher = FileMatcher::new();
    if let Some(source) = &cli.source {
        match source.canonicalize() {
            Ok(root) => {
                eprintln!("[supervisor] Instrumentation target: {}", root.display());
                matcher.add_source(root);
            }
            Err(_) => {
                eprintln!(
                    "[supervisor] Warning: specified source path does not exist: {}",
                    source.display()
                );
            }
        }
    } else {
        eprintln!("[supervisor] Warning: no --source provided; instrumenting around the target");
        if let (None, Some(script)) = (&cli.module, &cli.script) {
            let script_dir = script
                .canonicalize()
                .ok()
                .and_then(|p| p.parent().map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from("."));
            matcher.add_source(script_dir);
        } else {
            matcher.add_source(env::current_dir()?);
        }
    }

    if cli.module.is_some() {
        for keyword in &tool_config.instrument.exclude_keywords {
            matcher.add_exclude_keyword(keyword);
        }
    }

    let matcher_path = wdir.join("tmp").join("file_matcher");
    matcher.save(&matcher_path)?;
    env::set_var("NEWT_FILE_MATCHER", &matcher_path);

    if let Some(source) = &cli.source {
        if let Ok(root) = source.canonicalize() {
            env::set_var("TARGET_PROJECT_ROOT", root);
        }
    }

    // --- MODE CHANNEL ---
    ModeChannel::new(&wdir).init()?;

    // --- SPAWN ---
    let target = match (&cli.module, &cli.script) {
        (Some(name), _) => ChildTarget::Module {
            name: name.clone(),
            args: cli.forwarded_args(),
        },
        (None, Some(script)) => ChildTarget::Script {
            path: script.clone(),
            args: cli.forwarded_args(),
        },
        (None, None) => bail!("nothing to run"), // clap enforces one of the two
    };

    signals::install_signal_handlers()
        .map_err(|e| anyhow::anyhow!("Cannot install signal handlers: {}", e))?;
    let guard = CleanupGuard::new();

    match unsafe { fork() }.context("fork failed")? {
        ForkResult::Child => {
            let code = match child::entrypoint(&target, !cli.ignore_repair) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("[child] Target terminated with error: {:#}", e);
                    1
                }
            };
            std::process::exit(code);
        }
        ForkResult::Parent { child } => {
            guard.track_child(child.as_raw());
            eprintln!("[supervisor] Child PID: {}", child);

            if cli.ignore_repair {
                // plain passthrough run: no checkpoints, no repair
                waitpid(child, None)?;
                guard.untrack_child();
                return Ok(());
            }

            let mut checkpointer = Checkpointer::new(&wdir, reporter.clone());
            eprintln!("[supervisor] Storing initial checkpoint for PID {}", child);
            checkpointer.store_checkpoint(child)?;

            eprintln!("[supervisor] Entering monitoring loop");
            let outcome = checkpointer.run_loop(child, &guard)?;
            guard.untrack_child();

            reporter.save_report()?;
            match outcome {
                RunOutcome::Completed => {
                    eprintln!("[supervisor] Run completed");
                    Ok(())
                }
                RunOutcome::ValidationFailed => {
                    // a failed repair is still a clean tool run
                    eprintln!("[supervisor] Run ended: repair could not be validated");
                    Ok(())
                }
                RunOutcome::Interrupted => bail!("interrupted by signal"),
            }
        }
    }
}

fn clean_and_create(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("Cannot clear {}", dir.display()))?;
    }
    fs::create_dir_all(dir).with_context(|| format!("Cannot create {}", dir.display()))?;
    Ok(())
}
