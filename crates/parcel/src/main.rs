//! parcel CLI: persist queued order messages to blob storage.

use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use parcel::{CliArgs, Config, init_tracing, run, shutdown_token};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();
    info!("Loading config from {}", args.config.display());

    let config = match Config::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Starting parcel ({} -> {}, dead letters to {})",
        config.source.path, config.sink.path, config.error_channel.path
    );

    match run(&config, shutdown_token()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Pipeline failed: {e}");
            ExitCode::FAILURE
        }
    }
}
