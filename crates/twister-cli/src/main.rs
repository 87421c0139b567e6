//! Twister CLI - Kafka metric batch splitter.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use twister_core::{Config, Supervisor};

mod logfile;

use logfile::ReopenableFile;

/// Exit codes for the twister process.
///
/// Following Unix conventions:
/// - 0: Clean shutdown
/// - 1: Configuration error
/// - 2: A handler death forced the shutdown
#[repr(i32)]
#[derive(Debug, Clone, Copy)]
enum ExitCode {
    /// Clean shutdown
    Success = 0,
    /// Configuration error (unreadable file, invalid values, log setup)
    ConfigError = 1,
    /// A worker or the consumer died and forced the shutdown
    HandlerDeath = 2,
    /// Startup failed before the pipeline was running
    RuntimeError = 10,
}

#[derive(Parser)]
#[command(name = "twister")]
#[command(about = "Twister metric batch splitter", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file location
    #[arg(long, default_value = "twister.conf")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Could not open configuration: {e}");
            return ExitCode::ConfigError;
        }
    };

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if config.log.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    match config.log.logfile() {
        Some(path) => {
            let writer = match ReopenableFile::open(path) {
                Ok(writer) => writer,
                Err(e) => {
                    eprintln!("Unable to open logfile: {e}");
                    return ExitCode::ConfigError;
                }
            };
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(writer.clone()))
                .with(filter)
                .init();

            if config.log.rotate_on_usr2 {
                spawn_logrotate(writer);
            }
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    info!("Starting TWISTER...");

    let shutdown = CancellationToken::new();
    if let Err(e) = spawn_signal_handler(shutdown.clone()) {
        error!(error = %e, "Unable to install signal handlers");
        return ExitCode::RuntimeError;
    }

    match Supervisor::new(config).run(shutdown).await {
        Ok(false) => ExitCode::Success,
        Ok(true) => ExitCode::HandlerDeath,
        Err(e) => {
            error!(error = %e, "Pipeline failed to start");
            ExitCode::RuntimeError
        }
    }
}

/// SIGINT and SIGTERM begin the graceful shutdown.
fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        shutdown.cancel();
    });
    Ok(())
}

/// SIGUSR2 reopens the logfile so external rotation can move it away.
fn spawn_logrotate(writer: ReopenableFile) {
    tokio::spawn(async move {
        let mut usr2 = match signal(SignalKind::user_defined2()) {
            Ok(usr2) => usr2,
            Err(e) => {
                warn!(error = %e, "Unable to listen for SIGUSR2, log rotation disabled");
                return;
            }
        };
        while usr2.recv().await.is_some() {
            match writer.reopen() {
                Ok(()) => info!(path = %writer.path().display(), "Logfile reopened"),
                Err(e) => warn!(error = %e, "Logfile reopen failed"),
            }
        }
    });
}
