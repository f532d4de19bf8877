pub mod actuator;
pub mod board;
pub mod config;
pub mod message;
pub mod mqtt;
pub mod session;

use crate::actuator::{Actuator, LampAdapter, RppalPwm, SimulatedPwm};
use crate::board::{Board, Device};
use crate::config::{ActuatorBackend, ActuatorConfig, AppConfig};
use crate::message::encode_line_status;
use crate::mqtt::{MqttTransport, QoS, Transport};
use crate::session::SessionController;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const SHUTDOWN_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let config = setup().await?;
    info!(
        "Starting lamp controller for board {} (broker {}:{})",
        config.board.board_id, config.mqtt.host, config.mqtt.port
    );

    let mut board = Board::new(config.board.board_id.clone());
    board.add_device(Device::new(
        config.lamp.device_id.clone(),
        config.lamp.name.clone(),
        "0",
    ));

    let actuator = open_actuator(&config.actuator)?;
    let lamp = LampAdapter::new(actuator, config.actuator.settle());

    let will = encode_line_status(board.board_id(), false)
        .map_err(|e| eyre!("Failed to encode last will: {}", e))?;
    let (transport, events) = MqttTransport::spawn(&config.mqtt, will);

    let controller = SessionController::new(
        config.session_settings(),
        board,
        lamp,
        transport.clone(),
        events,
    );
    let mut handle = controller.spawn();
    let status = handle.status();

    tokio::select! {
        result = handle.finished() => {
            if let Err(e) = result {
                error!("Session stopped unexpectedly: {}", e);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        }
    }

    {
        let status = status.borrow();
        info!(
            "Session made {} connection(s), last at {:?}",
            status.connections, status.last_connected
        );
    }
    handle.shutdown();
    go_offline(transport.as_ref(), &config).await;
    Ok(())
}

async fn setup() -> Result<AppConfig> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let config = AppConfig::load().await?;
    setup_logging_env(config.tracing_level()?);
    Ok(config)
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn open_actuator(config: &ActuatorConfig) -> Result<Box<dyn Actuator>> {
    match config.backend {
        ActuatorBackend::Rppal => {
            let pwm = RppalPwm::open(config.channel, config.frequency_hz, config.native_max)
                .map_err(|e| eyre!("Failed to open lamp PWM: {}", e))?;
            Ok(Box::new(pwm))
        }
        ActuatorBackend::Simulated => {
            warn!("Using simulated PWM, the lamp will not light up");
            Ok(Box::new(SimulatedPwm::new(config.native_max)))
        }
    }
}

/// Best-effort offline notice before leaving the broker. The last will covers
/// the case where this never gets through.
async fn go_offline(transport: &dyn Transport, config: &AppConfig) {
    match encode_line_status(&config.board.board_id, false) {
        Ok(payload) => {
            let publish =
                transport.publish(&config.mqtt.status_topic, payload, QoS::AtLeastOnce);
            match tokio::time::timeout(SHUTDOWN_PUBLISH_TIMEOUT, publish).await {
                Ok(Ok(())) => info!("Published offline status"),
                Ok(Err(e)) => warn!("Could not publish offline status: {}", e),
                Err(_) => warn!("Timed out publishing offline status"),
            }
        }
        Err(e) => warn!("Could not encode offline status: {}", e),
    }

    if let Err(e) = transport.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
}
