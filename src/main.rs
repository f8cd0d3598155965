//! # Timeline Forwarder: Sample Binary
//!
//! A thin entry point around the [`timeline_forwarder`] library: loads
//! configuration, starts the service bound to a placeholder application,
//! and waits for a shutdown signal. Real embedders call the library
//! directly from the host event bus instead of going through this binary.

use std::env;
use std::process;

use clap::{Arg, Command};
use dotenvy::dotenv;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use timeline_forwarder::config::Config;
use timeline_forwarder::error::TimelineError;
use timeline_forwarder::{AppAttemptDetails, TimelineForwarder, SERVICE_NAME, VERSION};

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = dotenv() {
        warn!("failed to load .env file: {}", e);
    }

    let matches = create_cli().get_matches();

    if matches.get_flag("validate-config") {
        match load_configuration() {
            Ok(_) => {
                info!("configuration is valid");
                process::exit(0);
            }
            Err(e) => {
                error!("configuration validation failed: {}", e);
                process::exit(1);
            }
        }
    }

    info!("starting {} version {}", SERVICE_NAME, VERSION);

    let config = match load_configuration() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let app_id = matches
        .get_one::<String>("app-id")
        .cloned()
        .unwrap_or_else(|| "sample-app".to_string());

    if let Err(e) = run_service(config, app_id).await {
        error!("service failed: {}", e);
        process::exit(1);
    }
}

fn init_logging() {
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let subscriber = tracing_subscriber::registry();
    match log_format.as_str() {
        "json" => {
            subscriber
                .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
                )
                .init();
        }
        _ => {
            subscriber
                .with(tracing_subscriber::fmt::layer().with_target(true))
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
                )
                .init();
        }
    }
}

fn create_cli() -> Command {
    Command::new(SERVICE_NAME)
        .version(VERSION)
        .about("Forwards host application lifecycle/runtime events to a Timeline Server")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("validate-config")
                .long("validate-config")
                .help("Validate configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("app-id")
                .long("app-id")
                .value_name("APP_ID")
                .help("Application id to bind this instance to")
                .action(clap::ArgAction::Set),
        )
}

fn load_configuration() -> Result<Config, TimelineError> {
    let config = Config::from_env().map_err(|e| TimelineError::configuration(e.to_string()))?;
    config.validate().map_err(|e| TimelineError::configuration(e.to_string()))?;
    Ok(config)
}

async fn run_service(config: Config, app_id: String) -> Result<(), TimelineError> {
    let service = TimelineForwarder::new(config)?;

    service
        .start(AppAttemptDetails {
            app_id,
            attempt_id: None,
            group_id: None,
        })
        .await?;

    info!("timeline forwarder running; waiting for shutdown signal");
    wait_for_shutdown_signal().await;

    info!("initiating graceful shutdown");
    service.stop().await?;
    info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C signal");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
        info!("received SIGTERM signal");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
