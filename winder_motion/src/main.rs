//! # Winder Motion Controller
//!
//! Binary entry point: loads the TOML configuration, builds the motion
//! stack (simulated I/O backend, move queues, safety monitor, scheduler),
//! performs RT setup, starts the fixed-period tick thread, and runs the
//! command loop until interrupted.
//!
//! The command loop is deliberately thin — the G-code/host layers that
//! feed real moves live outside this core. What remains here is the part
//! the core owns: draining latched fault causes to the log after a halt
//! and shutting the scheduler down cleanly.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use winder_common::config::{MotionConfig, load_config};
use winder_common::consts::DEFAULT_CONFIG_PATH;
use winder_motion::hal::SimIo;
use winder_motion::queue::MoveQueue;
use winder_motion::safety::SafetyMonitor;
use winder_motion::scheduler::{Scheduler, SchedulerOptions};

/// Winder Motion Controller — real-time step generation core
#[derive(Parser, Debug)]
#[command(name = "winder_motion")]
#[command(version)]
#[command(about = "Fixed-period motion core for the winding machine")]
struct Args {
    /// Path to the motion configuration TOML.
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// CPU core to pin the tick thread to (rt builds).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority (rt builds).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("winder motion core v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("winder motion core shutdown complete");
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = if args.config.exists() {
        load_config(&args.config)?
    } else {
        warn!(
            "config file '{}' not found, using defaults",
            args.config.display()
        );
        MotionConfig::default()
    };
    info!(
        tick_period_us = config.tick_period_us,
        stall_timeout_ms = config.stall_timeout_ms,
        "config OK"
    );

    // Simulation backend: same traits a GPIO backend implements on the
    // real machine.
    let io = Arc::new(SimIo::new());
    let queue = Arc::new(MoveQueue::new(io.clone(), config.dir_setup_ticks));
    let safety = Arc::new(SafetyMonitor::new(queue.clone(), io.clone(), &config));

    // RT setup (mlockall, affinity, SCHED_FIFO) runs on the tick thread
    // itself when the scheduler starts.
    let options = SchedulerOptions {
        cpu_core: args.cpu_core,
        rt_priority: args.rt_priority,
    };
    let scheduler = Arc::new(Scheduler::new(
        queue.clone(),
        safety.clone(),
        io.clone(),
        options,
    ));
    scheduler.start(config.tick_period_us)?;

    // Graceful shutdown on Ctrl-C.
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;

    // Command loop: fault-cause logging happens here, outside the tick
    // context, after a halt has already taken effect.
    while running.load(Ordering::SeqCst) {
        safety.drain_fault_log();
        std::thread::sleep(Duration::from_millis(10));
    }

    scheduler.stop();
    info!(
        ticks = scheduler.get_tick_count(),
        overruns = scheduler.overruns(),
        max_tick_ns = scheduler.max_tick_ns(),
        state = safety.state().as_str(),
        "motion core stopped"
    );
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
