//! smartsentry daemon entry point
//!
//! Preflights privileges and smartmontools, loads the layered configuration,
//! wires the scan engine to its collaborators, and runs the cadence loop
//! until shutdown. One-shot modes (`--check`, `--list`) perform a single
//! cycle synchronously and exit without starting background work.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use smartsentry::engine::enumerate::SysfsEnumerator;
use smartsentry::engine::{EngineConfig, ScanEngine};
use smartsentry::{
    HistoryLogger, LifecycleLog, Settings, SmartctlReader, TempExtremes, UnmountExecutor,
};

/// Exit code for configuration errors
const EXIT_CONFIG: u8 = 2;
/// Exit code when root privileges are missing
const EXIT_NOT_ROOT: u8 = 3;
/// Exit code when smartmontools is not installed
const EXIT_NO_SMARTCTL: u8 = 4;

// =============================================================================
// CLI Arguments
// =============================================================================

/// smartsentry - SMART disk health monitoring daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Explicit configuration file (default: /etc/smartsentry/settings.json,
    /// then ~/.smartsentry/settings.json)
    #[arg(long, env = "SMARTSENTRY_CONFIG")]
    config: Option<PathBuf>,

    /// State directory for history, events and temperature extremes
    #[arg(long, env = "SMARTSENTRY_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Run one synchronous scan cycle, print the snapshot as JSON, and exit
    #[arg(long)]
    check: bool,

    /// List detected block devices and exit
    #[arg(long)]
    list: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    if args.list {
        return list_devices().await;
    }

    // Raw SMART reads require root.
    if unsafe { libc::geteuid() } != 0 {
        error!("smartsentry needs root privileges to read SMART data");
        return ExitCode::from(EXIT_NOT_ROOT);
    }

    if !SmartctlReader::is_available() {
        error!("smartctl not found; install smartmontools");
        return ExitCode::from(EXIT_NO_SMARTCTL);
    }

    // An explicitly named configuration file must be usable; the default
    // chain falls back to defaults (and PASSIVE mode) on any problem.
    let settings = match &args.config {
        Some(path) => match Settings::load_from(path) {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = %e, "cannot load configuration");
                return ExitCode::from(EXIT_CONFIG);
            }
        },
        None => Settings::load(),
    };

    let state_dir = args.state_dir.clone().unwrap_or_else(default_state_dir);
    let engine = build_engine(&settings, &state_dir);

    if args.check {
        return check_once(&engine).await;
    }

    info!("starting smartsentry {}", smartsentry::VERSION);
    info!("  polling interval: {:?}", settings.polling_interval());
    info!("  emergency unmount mode: {}", settings.emergency_unmount.mode);
    info!("  gdc enabled: {}", settings.gdc.enabled);
    info!("  state dir: {}", state_dir.display());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(shutdown_rx).await })
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => warn!(error = %e, "signal handler failed, shutting down"),
    }
    let _ = shutdown_tx.send(true);
    if let Err(e) = runner.await {
        warn!(error = %e, "scan engine task ended abnormally");
    }

    info!("smartsentry shutdown complete");
    ExitCode::SUCCESS
}

// =============================================================================
// Wiring
// =============================================================================

fn build_engine(settings: &Settings, state_dir: &std::path::Path) -> ScanEngine {
    let config = EngineConfig::from_settings(settings);
    let deadline = config.smart_deadline;
    ScanEngine::new(
        config,
        Arc::new(SmartctlReader::new(deadline)),
        Arc::new(SysfsEnumerator::new()),
        Arc::new(HistoryLogger::new(
            state_dir.join("history"),
            settings.logging.retention_size_kb,
        )),
        Arc::new(LifecycleLog::new(state_dir.join("events"))),
        Arc::new(TempExtremes::new(state_dir.join("temp_extremes"))),
        Arc::new(UnmountExecutor::new(
            settings.emergency_unmount.mode,
            settings.unmount_cooldown(),
        )),
    )
}

fn default_state_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".smartsentry"))
        .unwrap_or_else(|| PathBuf::from("/var/lib/smartsentry"))
}

// =============================================================================
// One-Shot Modes
// =============================================================================

async fn check_once(engine: &ScanEngine) -> ExitCode {
    let snapshot = engine.check_health_once().await;
    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "failed to serialize snapshot");
            ExitCode::FAILURE
        }
    }
}

async fn list_devices() -> ExitCode {
    use smartsentry::engine::enumerate::DeviceEnumerator;

    let enumerator = SysfsEnumerator::new();
    match enumerator.enumerate().await {
        Ok(devices) => {
            for device in devices {
                let capacity = device
                    .capacity_bytes
                    .map(|b| format!("{:.1} GB", b as f64 / 1e9))
                    .unwrap_or_else(|| "unknown size".to_string());
                let kind = match device.rotational {
                    Some(true) => "HDD",
                    Some(false) => "SSD",
                    None => "disk",
                };
                println!("{}\t{}\t{}\t{}", device.os_name, device.bus, kind, capacity);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "device enumeration failed");
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
