//! Command-line entry point for the datastager service.

use clap::{Parser, Subcommand};
use datastager::config::{config_file_path, ConfigFile};
use datastager::logging::{default_log_dir, default_log_file, init_logging};
use datastager::service::{Collaborators, StagingService};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "datastager", version = datastager::VERSION)]
#[command(about = "Staging backend for a scientific data-archive access service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the staging service until interrupted
    Run {
        /// Archive root directory for the local collaborators
        #[arg(long)]
        archive_root: PathBuf,

        /// Config file path (defaults to ~/.datastager/config.ini)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write a default config file
    InitConfig {
        /// Destination path (defaults to ~/.datastager/config.ini)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            archive_root,
            config,
        } => run(archive_root, config).await,
        Command::InitConfig { path } => init_config(path),
    }
}

async fn run(archive_root: PathBuf, config_path: Option<PathBuf>) -> ExitCode {
    let _guard = match init_logging(default_log_dir(), default_log_file()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config_path = config_path.unwrap_or_else(config_file_path);
    let config = match ConfigFile::load_from(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = datastager::VERSION,
        archive_root = %archive_root.display(),
        "Starting datastager"
    );

    let service = StagingService::new(config, Collaborators::local(archive_root));
    if let Err(e) = service.start() {
        error!(error = %e, "Service start failed");
        return ExitCode::FAILURE;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Signal handling failed");
    }
    info!("Shutting down");
    service.shutdown().await;
    ExitCode::SUCCESS
}

fn init_config(path: Option<PathBuf>) -> ExitCode {
    let path = path.unwrap_or_else(config_file_path);
    let config = ConfigFile::default();
    match config.save_to(&path) {
        Ok(()) => {
            println!("Wrote default configuration to {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to write configuration: {e}");
            ExitCode::FAILURE
        }
    }
}
