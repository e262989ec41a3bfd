use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use dronesim_app::core::constants::{EXIT_CLEAN, EXIT_FAILURE, EXIT_USER_QUIT};
use dronesim_app::core::enums::{ObjectKind, Role, SharedStateMode};
use dronesim_app::launcher::{self, LaunchOptions};
use dronesim_app::worker::{load_settings, ControlSender, RunPaths, WorkerContext, WorkerExit};
use dronesim_app::{generator_loop, input, logging, physics_loop, router, viewer};

#[derive(Parser, Debug)]
#[command(name = "dronesim")]
#[command(about = "Multi-process drone simulation with a supervised relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch and supervise the whole process group
    Run(RunArgs),
    /// Run a single worker (spawned by `run`)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Settings file
    #[arg(long, default_value = "appsettings.json")]
    config: PathBuf,
    /// Directory for debug.log and errors.log
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
    /// No terminal input; keys are not relayed
    #[arg(long)]
    headless: bool,
    /// Unsynchronised shared state (stale or torn reads are possible)
    #[arg(long)]
    legacy_shm: bool,
}

#[derive(Args, Debug)]
struct WorkerArgs {
    role: Role,
    #[arg(long)]
    config: PathBuf,
    #[arg(long)]
    run_id: String,
    #[arg(long)]
    run_dir: PathBuf,
    #[arg(long)]
    log_dir: PathBuf,
    #[arg(long)]
    legacy_shm: bool,
    #[arg(long)]
    headless: bool,
}

fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Run(args) => launch(args),
        Commands::Worker(args) => worker(args),
    };
    process::exit(code);
}

fn launch(args: RunArgs) -> i32 {
    if let Err(err) = logging::init(&args.log_dir, true) {
        eprintln!("dronesim: cannot open logs in {}: {err}", args.log_dir.display());
        return EXIT_FAILURE;
    }
    let options = LaunchOptions {
        config: args.config,
        log_dir: args.log_dir,
        headless: args.headless,
        legacy_shm: args.legacy_shm,
    };
    match launcher::run(&options) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            EXIT_FAILURE
        }
    }
}

fn worker(args: WorkerArgs) -> i32 {
    if let Err(err) = logging::init(&args.log_dir, false) {
        // stderr is redirected to errors.log by the launcher.
        eprintln!("dronesim worker {}: cannot open logs: {err}", args.role);
        return EXIT_FAILURE;
    }
    let span = tracing::info_span!("worker", role = %args.role, pid = process::id());
    let _enter = span.enter();

    match run_worker(args) {
        Ok(WorkerExit::Clean) => EXIT_CLEAN,
        Ok(WorkerExit::UserQuit) => EXIT_USER_QUIT,
        Err(err) => {
            tracing::error!("{err:#}");
            EXIT_FAILURE
        }
    }
}

fn run_worker(args: WorkerArgs) -> Result<WorkerExit> {
    let mut settings = load_settings(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.legacy_shm {
        settings.shared_state = SharedStateMode::Legacy;
    }
    let paths = RunPaths {
        run_id: args.run_id,
        run_dir: args.run_dir,
        log_dir: args.log_dir,
    };
    let mut ctx = WorkerContext::new(args.role, settings, paths, ControlSender::stdout());

    let exit = match args.role {
        Role::Router => router::run(&mut ctx),
        Role::Physics => physics_loop::run(&mut ctx),
        Role::ObstacleGenerator => generator_loop::run(&mut ctx, ObjectKind::Obstacle),
        Role::TargetGenerator => generator_loop::run(&mut ctx, ObjectKind::Target),
        Role::Viewer => viewer::run(&mut ctx),
        Role::Input => input::run(&mut ctx, args.headless),
    }?;
    tracing::info!(?exit, "worker done");
    Ok(exit)
}
