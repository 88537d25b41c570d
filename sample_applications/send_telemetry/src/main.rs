// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use device_telemetry::config::{DeviceConfig, DEFAULT_ENV_FILE};
use device_telemetry::publisher::TelemetryPublisher;
use device_telemetry::record::SimulatedTemperatureSensor;
use device_telemetry_mqtt::MqttTransport;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp(None)
        .filter_module("rumqttc", log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    // Fails before anything is connected if the credential is missing
    let config = DeviceConfig::load(DEFAULT_ENV_FILE)?;
    let transport = MqttTransport::new(config.connection_settings, config.topic)?;
    log::info!("Publishing telemetry to {}", transport.topic());

    let mut publisher = TelemetryPublisher::new(
        transport,
        SimulatedTemperatureSensor::new(),
        config.publisher_options,
    );

    // Stop publishing on Ctrl-C
    let stop = CancellationToken::new();
    let stop_on_signal = stop.clone();
    tokio::task::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Ctrl-C received, stopping");
                stop_on_signal.cancel();
            }
            Err(e) => log::error!("Failed to listen for Ctrl-C: {e}"),
        }
    });

    let sent = publisher.run(stop).await?;
    log::info!("Sent {sent} messages");
    Ok(())
}
