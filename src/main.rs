// src/main.rs - etch-host command line
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sketch_etch::gcode::MoveKind;
use sketch_etch::{Config, Job, JobStatus, MachineState, MotionController, Program, Session, SimulatedBoard};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Laser etcher host: run, check and plan G-code programs.
#[derive(Parser, Debug)]
#[command(name = "etch-host", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a program on the simulated board
    Run { file: PathBuf },
    /// Parse a program without executing it
    Check { file: PathBuf },
    /// Print the actuation plan for a move from the origin as JSON
    Plan {
        #[arg(long, allow_hyphen_values = true)]
        x: f64,
        #[arg(long, allow_hyphen_values = true)]
        y: f64,
        /// Plan a cutting move with the laser enabled
        #[arg(long)]
        cut: bool,
        /// Include every step, not just the summary
        #[arg(long)]
        steps: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    init_logging(&config.logging.level, cli.verbose);

    match cli.command {
        Commands::Run { file } => run(config, file).await,
        Commands::Check { file } => check(file).await,
        Commands::Plan { x, y, cut, steps } => plan(&config, x, y, cut, steps),
    }
}

fn init_logging(level: &str, verbose: u8) {
    let level = match verbose {
        0 => level,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: Config, file: PathBuf) -> Result<(), BoxError> {
    tracing::info!("Sketch 'n' Etch host v{}", env!("CARGO_PKG_VERSION"));
    let mut job = Job::load(&file).await?;
    let board = SimulatedBoard::new(config.simulator.clone());
    let mut session = Session::new(config, board.driver())?;

    let stop = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, stopping after the current command");
            stop.request_stop();
        }
    });

    let status = session.run_job(&mut job).await?;
    for response in job.responses() {
        println!("{}", response);
    }
    let report = serde_json::json!({
        "job": &job,
        "state": session.state().snapshot(),
        "motion": session.motion_stats(),
        "board_position": board.position_mm(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    session.shutdown();

    match status {
        JobStatus::Completed | JobStatus::Terminated => Ok(()),
        _ => Err(job.error().unwrap_or("job did not complete").into()),
    }
}

async fn check(file: PathBuf) -> Result<(), BoxError> {
    let source = tokio::fs::read_to_string(&file).await?;
    let program = Program::parse(&source)?;
    println!("{}: {} commands OK", file.display(), program.len());
    Ok(())
}

fn plan(config: &Config, x: f64, y: f64, cut: bool, steps: bool) -> Result<(), BoxError> {
    let mut state = MachineState::from_config(config);
    if let Some(path) = &config.raster.path {
        let mask = sketch_etch::RasterMask::from_image(path, config.raster.invert)?;
        state.set_raster(mask, config.raster.dpmm)?;
    }
    state.enable_laser(cut);
    let kind = if cut { MoveKind::Controlled } else { MoveKind::Rapid };
    let plan = MotionController::plan_for(&state, kind, (x, y))?;
    let report = if steps {
        serde_json::json!({ "summary": plan.summary(), "steps": plan.steps() })
    } else {
        serde_json::to_value(plan.summary())?
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
