//! Top-level launcher: builds the worker commands and supervises the group.
//!
//! The launcher is the only process that talks to a human. Workers are
//! re-executions of the current binary with the hidden `worker` subcommand;
//! their stderr goes to `errors.log` so panics end up in the logs. Terminal
//! resizes and `SIGUSR1` reach the workers as control messages.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

use dronesim_core::constants::{EXIT_CLEAN, EXIT_FAILURE};
use dronesim_core::enums::Role;

use crate::logging::{self, ERROR_LOG};
use crate::signals;
use crate::supervisor::{run_session, Supervisor, SupervisorConfig, TeardownCause, WorkerSpec};
use crate::worker::{load_settings, RunPaths};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub config: PathBuf,
    pub log_dir: PathBuf,
    pub headless: bool,
    pub legacy_shm: bool,
}

impl LaunchOptions {
    /// Locations for a run identified by `run_id`.
    pub fn run_paths(&self, run_id: &str) -> RunPaths {
        RunPaths {
            run_id: run_id.to_string(),
            run_dir: std::env::temp_dir().join(format!("dronesim-{run_id}")),
            log_dir: self.log_dir.clone(),
        }
    }
}

/// Arguments of the hidden `worker` subcommand for `role`.
pub fn worker_args(role: Role, options: &LaunchOptions, paths: &RunPaths) -> Vec<String> {
    let mut args = vec![
        "worker".to_string(),
        role.to_string(),
        "--config".to_string(),
        options.config.display().to_string(),
        "--run-id".to_string(),
        paths.run_id.clone(),
        "--run-dir".to_string(),
        paths.run_dir.display().to_string(),
        "--log-dir".to_string(),
        paths.log_dir.display().to_string(),
    ];
    if options.legacy_shm {
        args.push("--legacy-shm".to_string());
    }
    if options.headless {
        args.push("--headless".to_string());
    }
    args
}

fn worker_spec(
    exe: &Path,
    role: Role,
    options: &LaunchOptions,
    paths: &RunPaths,
) -> Result<WorkerSpec> {
    let stderr = logging::open_append(&paths.log_dir, ERROR_LOG)
        .with_context(|| format!("opening {ERROR_LOG} for {role}"))?;
    let mut command = Command::new(exe);
    command
        .args(worker_args(role, options, paths))
        .stderr(Stdio::from(stderr));
    Ok(WorkerSpec { role, command })
}

/// Process status of the launcher for a session that ended with `cause`.
pub fn exit_code(cause: &TeardownCause) -> i32 {
    if cause.is_user_quit() {
        EXIT_CLEAN
    } else {
        EXIT_FAILURE
    }
}

/// Run one session. Returns the launcher's exit status.
pub fn run(options: &LaunchOptions) -> Result<i32> {
    let settings = load_settings(&options.config)
        .with_context(|| format!("loading {}", options.config.display()))?;
    let run_id = std::process::id().to_string();
    let paths = options.run_paths(&run_id);
    fs::create_dir_all(&paths.run_dir)
        .with_context(|| format!("creating {}", paths.run_dir.display()))?;

    let exe = std::env::current_exe().context("locating the dronesim binary")?;
    let specs = Role::LAUNCH_ORDER
        .into_iter()
        .map(|role| worker_spec(&exe, role, options, &paths))
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(
        run_id = %run_id,
        map = %format!("{}x{}", settings.map_dimension_x, settings.map_dimension_y),
        obstacles = settings.num_obstacles,
        targets = settings.num_targets,
        headless = options.headless,
        legacy_shm = options.legacy_shm,
        "starting session"
    );
    if !options.headless {
        tracing::info!(
            "keys: w e r / s d f / x c v move, d clears forces, b brakes, u resets, p quits"
        );
    }

    let supervisor = Supervisor::new(SupervisorConfig::from_settings(&settings.watchdog));
    match signals::install() {
        Ok(()) => {
            if let Err(err) = signals::spawn_forwarder(supervisor.handle(), !options.headless) {
                tracing::warn!(error = %err, "cannot start the signal forwarder");
            }
            tracing::info!("kill -USR1 {run_id} regenerates obstacles and targets");
        }
        Err(err) => tracing::warn!(error = %err, "signal handlers not installed"),
    }

    let report = run_session(supervisor, specs);

    for outcome in report.outcomes.iter().filter(|o| o.killed) {
        tracing::warn!(role = %outcome.role, pid = outcome.pid, "worker had to be killed");
    }
    if let Err(err) = fs::remove_dir_all(&paths.run_dir) {
        let path = paths.run_dir.display();
        tracing::warn!(%path, error = %err, "cannot remove run directory");
    }

    let code = exit_code(&report.cause);
    if code == EXIT_CLEAN {
        tracing::info!("session over");
    } else {
        tracing::error!(cause = %report.cause, "session failed, see {}", paths.log_dir.display());
    }
    Ok(code)
}
