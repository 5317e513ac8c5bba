//! FullMetalUpdate agent - Entry Point
//!
//! Polls the update server for deployments and applies OS and container
//! updates on the device.

use std::path::PathBuf;
use std::process::ExitCode;

use fmupdate::app::options::AppOptions;
use fmupdate::app::run::run;
use fmupdate::filesys::file::File;
use fmupdate::identity::collect_attributes;
use fmupdate::logs::{init_logging, LogLevel, LogOptions};
use fmupdate::storage::settings::Settings;
use fmupdate::utils::version_info;

use secrecy::SecretString;
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "config.json";

/// Command line arguments
#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    debug: bool,
    version: bool,
}

fn parse_args(args: impl Iterator<Item = String>) -> CliArgs {
    let mut cli = CliArgs::default();
    let mut args = args.peekable();

    while let Some(arg) = args.next() {
        if let Some((key, value)) = arg.split_once('=') {
            // --key=value format
            if matches!(key, "--config" | "-c") {
                cli.config = Some(PathBuf::from(value));
            }
            continue;
        }

        match arg.as_str() {
            "--config" | "-c" => cli.config = args.next().map(PathBuf::from),
            "--debug" | "-d" => cli.debug = true,
            "--version" | "-v" => cli.version = true,
            _ => {}
        }
    }

    cli
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = parse_args(std::env::args().skip(1));

    // Print version and exit
    let version = version_info();
    if cli.version {
        match serde_json::to_string_pretty(&version) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings file
    let config = cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let settings = match File::new(&config).read_json::<Settings>().await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to read config file {}: {}", config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: if cli.debug {
            LogLevel::Debug
        } else {
            settings.log_level.clone()
        },
        log_dir: settings.log_dir.clone(),
        json_format: settings.log_json,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let attributes = collect_attributes(&settings.server.target_name, &settings.attributes);
    let options = AppOptions::from_settings(&settings, attributes);
    let token = SecretString::from(settings.server.auth_token.clone());

    info!("Running FullMetalUpdate agent with options: {:?}", options);
    match run(version.version, options, token, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run the agent: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        _ => {
            error!("Unable to install signal handlers, falling back to Ctrl+C");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down...");
        }
        _ = sigint.recv() => {
            info!("SIGINT received, shutting down...");
        }
    }
}
