#![forbid(unsafe_code)]

mod browser;
mod commands;
mod config;
mod constants;
mod display;
mod error;
mod network;
mod orientation;
mod retry;
mod services;
mod session;
mod supervisor;
#[cfg(test)]
mod testing;
mod types;
mod units;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{Level as TraceLevel, debug};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::prelude::*;

use commands::{App, Host, TargetUpdate};
use config::{Paths, Settings};
use types::TargetId;

/// Dashboard kiosk manager for a Raspberry Pi
#[derive(Debug, Parser)]
#[command(name = "pi-kiosk", version, about)]
struct Cli {
    /// State directory (default: $PI_KIOSK_HOME, then ~/.config/pi-kiosk)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Debug logging regardless of LOG_LEVEL
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Detect the output, seed targets and install the systemd units
    Provision {
        /// Output to drive instead of the detected one
        #[arg(long)]
        output: Option<String>,
    },
    /// Stop every other kiosk and start this one
    Activate { target: TargetId },
    Deactivate { target: TargetId },
    DeactivateAll,
    /// Rotate the display and remember it (landscape, portrait-left, 90, inverted, ...)
    Rotate { orientation: String },
    /// Re-apply the saved orientation (boot)
    Restore,
    /// Create or change a kiosk target
    SetTarget {
        target: TargetId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        orientation: Option<String>,
    },
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Keep the target's browser running in the foreground (used by the systemd unit)
    Run { target: TargetId },
}

fn log_level(verbose: bool) -> TraceLevel {
    if verbose {
        return TraceLevel::DEBUG;
    }
    match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    }
}

/// Open the event log for appending, creating it and its directory on first use
fn open_log_file(log_file: &Path) -> io::Result<File> {
    if let Some(parent) = log_file.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(log_file)
}

/// Timestamped, uncoloured lines into the event log
fn log_file_layer<S>(file: File) -> fmt::Layer<S, DefaultFields, Format, Mutex<File>> {
    fmt::layer().with_ansi(false).with_writer(Mutex::new(file))
}

/// stderr plus an append-only log file under the state root
/// A log file that cannot be opened only loses the file half
fn init_logging(log_file: &Path, level: TraceLevel) -> Result<()> {
    let (file_layer, file_error) = match open_log_file(log_file) {
        Ok(file) => (Some(log_file_layer(file)), None),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    if let Some(e) = file_error {
        tracing::warn!(path = %log_file.display(), error = %e, "Log file unavailable, logging to stderr only");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = Paths::resolve(cli.root);
    init_logging(&paths.log_file(), log_level(cli.verbose))?;
    debug!(root = %paths.root().display(), command = ?cli.command, "Starting");

    let settings = Settings::load(&paths.settings_file())?;
    let host = Host::new(&settings);
    let app = App::on_host(paths, settings, &host);
    match cli.command {
        Command::Provision { output } => app.provision(output),
        Command::Activate { target } => app.activate(&target),
        Command::Deactivate { target } => app.deactivate(&target),
        Command::DeactivateAll => app.deactivate_all(),
        Command::Rotate { orientation } => app.rotate(&orientation),
        Command::Restore => app.restore(),
        Command::SetTarget {
            target,
            name,
            url,
            orientation,
        } => app.set_target(&target, TargetUpdate { name, url, orientation }),
        Command::Status { json } => app.status(json),
        Command::Run { target } => app.run(&target),
    }
}
