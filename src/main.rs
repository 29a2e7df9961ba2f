mod bot;
mod config;
mod logging;
mod platform;
mod pump;
mod sensor;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use crate::config::{BotConfig, Cli, ConfigError};
use crate::logging::LogConfig;
use crate::platform::telegram::TelegramTransport;
use crate::platform::{ReplySink, Transport};
use crate::pump::{TokioBackoff, UpdatePump};
use crate::sensor::SensorClient;

const TEST_MESSAGE: &str = "DEBUG: bastubot test message";

#[tokio::main]
async fn main() -> ExitCode {
    let config = match BotConfig::load(Cli::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}. Exiting.", e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let log_guard = match logging::init(&LogConfig::from(&config)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}. Exiting.", e);
            ExitCode::FAILURE
        }
    };

    // Flush the file writer before the process exits.
    drop(log_guard);
    code
}

/// Validate the configuration, then either send the smoke-test message or
/// run the pump. Only returns early on a configuration error or after the
/// smoke test.
async fn run(config: BotConfig) -> Result<(), ConfigError> {
    info!("Starting program with channel ID: {}", config.channel_id);

    config.validate()?;

    let transport = Arc::new(TelegramTransport::new(
        &config.api_key,
        config.channel_id,
        config.stdout_debug_enabled,
    ));
    if let Err(e) = transport.init().await {
        error!("{:#}", e);
    }

    if config.send_test_message {
        send_test_message(transport).await;
        return Ok(());
    }

    let sensors = Arc::new(SensorClient::new(config.sensor_url.clone()));
    info!("Reading temperatures from {}", sensors.url());

    let pump = UpdatePump::new(
        transport,
        sensors,
        TokioBackoff,
        config.stdout_debug_enabled,
    );
    pump.run().await;

    Ok(())
}

/// Smoke-test mode: one message to the default channel, then exit.
async fn send_test_message<T: Transport + ?Sized>(transport: Arc<T>) {
    ReplySink::new(transport).send_broadcast(TEST_MESSAGE).await;
    info!("Test message sent, exiting");
}
