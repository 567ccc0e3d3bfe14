//! # bobcat
//!
//! CLI runner for the bobcat discrete-event simulator.
//!
//! This is the main entry point for running aerospace/network scenarios
//! from declarative model files.

use bobcat_runner::{run_scenario_file, RealTimeConfig, RunConfig, RunnerError};

use bobcat_core::{format_epoch, parse_epoch, Epoch};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// bobcat - aerospace network scenario simulator
#[derive(Parser, Debug)]
#[command(name = "bobcat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a simulation from a YAML or JSON model file
    Run(RunArgs),
    /// List all available node types with descriptions and options
    NodeTypes,
}

/// Configuration for a simulation run
#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the network model file (.yml, .yaml, or .json)
    model_file: PathBuf,

    /// Random seed for the engine stream
    #[arg(long, default_value_t = 9001)]
    seed: u64,

    /// Run until this simtime is reached (seconds)
    #[arg(long, default_value_t = 9001.0)]
    end_simtime: f64,

    /// Scenario start instant, ISO-8601 UTC (default: now)
    #[arg(long)]
    epoch: Option<String>,

    /// Mirror the simulation log to the terminal
    #[arg(long)]
    terminal: bool,

    /// Write node statistics tables
    #[arg(long)]
    node_stats: bool,

    /// Write node statistics plus message history (implies --node-stats)
    #[arg(long)]
    node_stats_history: bool,

    /// Write node states to file before the run
    #[arg(long)]
    initial_node_states: bool,

    /// Write node states to file after the run
    #[arg(long)]
    final_node_states: bool,

    /// Pace dispatch against the wall clock
    #[arg(long)]
    real_time: bool,

    /// Abort when the simulation cannot keep up with the wall clock
    #[arg(long)]
    real_time_strict: bool,

    /// Simulated seconds per wall second in real-time mode
    #[arg(long, default_value_t = 1.0)]
    real_time_factor: f64,

    /// Label for the results directory
    #[arg(long, default_value = "Default_")]
    network_name: String,

    /// Worker threads for node computations (0 disables the pool)
    #[arg(long, default_value_t = 0)]
    promise_threads: usize,
}

fn run(args: RunArgs) -> Result<(), RunnerError> {
    let epoch = match &args.epoch {
        Some(text) => parse_epoch(text)?,
        None => Epoch::now().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, format!("system clock unavailable: {e}"))
        })?,
    };

    let mut config = RunConfig::new(epoch);
    config.seed = args.seed;
    config.end_simtime = args.end_simtime;
    config.network_name = args.network_name;
    config.terminal = args.terminal;
    config.node_stats = args.node_stats || args.node_stats_history;
    config.node_stats_history = args.node_stats_history;
    config.initial_node_states = args.initial_node_states;
    config.final_node_states = args.final_node_states;
    config.realtime = RealTimeConfig {
        enabled: args.real_time,
        strict: args.real_time_strict,
        factor: args.real_time_factor,
        ..RealTimeConfig::default()
    };
    config.promise_threads = args.promise_threads;

    // Ctrl-C requests a cooperative stop between events.
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop_flag = Arc::clone(&stop_flag);
        if let Err(e) = ctrlc::set_handler(move || stop_flag.store(true, Ordering::Relaxed)) {
            tracing::warn!("could not install Ctrl-C handler: {e}");
        }
    }

    let report = run_scenario_file(&args.model_file, &config, Some(stop_flag))?;

    println!(
        "Run complete: {} events, simtime {:.2}s, wall {}ms",
        report.stats.total_events, report.stats.final_simtime_secs, report.stats.wall_time_ms
    );
    println!("Results: {} (epoch {})", report.results_dir.display(), format_epoch(epoch));
    Ok(())
}

fn list_node_types() {
    println!("{:<20} {}", "TYPE", "DESCRIPTION");
    for def in bobcat_model::node_types() {
        println!("{:<20} {}", def.name, def.help);
        for option in def.options {
            println!("    {:<28} default: {:<12} {}", option.name, option.default, option.help);
        }
        println!();
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => {
            if let Err(e) = run(args) {
                eprintln!("ERROR: {e}");
                std::process::exit(1);
            }
        }
        Commands::NodeTypes => list_node_types(),
    }
}
