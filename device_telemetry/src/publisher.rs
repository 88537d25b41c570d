// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Periodic publishing of telemetry records over a [`TelemetryTransport`].

use std::time::Duration;

use device_telemetry_mqtt::error::{ConnectionError, DeliveryError};
use device_telemetry_mqtt::interface::TelemetryTransport;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{string_from_environment, ConfigurationError};
use crate::payload_serialize::PayloadSerialize;
use crate::record::{TelemetryRecord, TemperatureSensor};

/// Environment variable holding the publish interval in seconds
pub const INTERVAL_ENV_VAR: &str = "DEVICE_TELEMETRY_INTERVAL";
/// Environment variable holding the maximum number of records to send
pub const MAX_MESSAGES_ENV_VAR: &str = "DEVICE_TELEMETRY_MAX_MESSAGES";

/// Publisher Options struct
#[derive(Builder, Clone, Debug)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct PublisherOptions {
    /// Time to wait after a record is sent before sending the next one
    #[builder(default = "Duration::from_secs(10)")]
    interval: Duration,
    /// Number of records after which the publisher stops on its own. Unbounded if `None`.
    #[builder(default = "None", setter(into, strip_option))]
    max_messages: Option<u64>,
}

impl PublisherOptions {
    /// Time waited between sends
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of records after which the publisher stops, if bounded
    #[must_use]
    pub fn max_messages(&self) -> Option<u64> {
        self.max_messages
    }
}

impl PublisherOptionsBuilder {
    /// Initialize the [`PublisherOptionsBuilder`] from environment variables.
    ///
    /// # Errors
    /// Returns a [`ConfigurationError`] if any of the environment variables are invalid.
    pub fn from_environment() -> Result<Self, ConfigurationError> {
        let interval = string_from_environment(INTERVAL_ENV_VAR)?
            .map(|v| v.parse::<u64>().map(Duration::from_secs))
            .transpose()
            .map_err(|e| ConfigurationError::InvalidSetting(format!("{INTERVAL_ENV_VAR}: {e}")))?;
        let max_messages = string_from_environment(MAX_MESSAGES_ENV_VAR)?
            .map(|v| v.parse::<u64>())
            .transpose()
            .map_err(|e| {
                ConfigurationError::InvalidSetting(format!("{MAX_MESSAGES_ENV_VAR}: {e}"))
            })?;

        Ok(Self {
            interval,
            max_messages: Some(max_messages),
        })
    }

    /// Validate the publisher options.
    ///
    /// # Errors
    /// Returns a `String` describing the error if `interval` is zero
    fn validate(&self) -> Result<(), String> {
        if let Some(interval) = &self.interval {
            if interval.is_zero() {
                return Err("interval must be greater than zero".to_string());
            }
        }
        Ok(())
    }
}

/// Lifecycle of a [`TelemetryPublisher`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublisherState {
    /// Not yet connected
    Connecting,
    /// Connected and sending records
    Running,
    /// Finished. A stopped publisher is never restarted.
    Stopped,
}

/// Error running a [`TelemetryPublisher`]
#[derive(Debug, Error)]
pub enum PublisherError {
    /// The transport could not be connected
    #[error("failed to connect transport")]
    Connection(#[from] ConnectionError),
    /// A record could not be delivered. Records before it were delivered.
    #[error("failed to deliver record {count}")]
    Delivery {
        /// Count of the record that failed, equal to the number of records delivered
        count: u64,
        /// Underlying delivery error
        #[source]
        source: DeliveryError,
    },
    /// A record could not be serialized
    #[error("failed to serialize record {count}")]
    Serialization {
        /// Count of the record that failed
        count: u64,
        /// Underlying serialization error
        #[source]
        source: serde_json::Error,
    },
    /// `run` was called on a publisher that has already stopped
    #[error("publisher has already stopped")]
    Stopped,
}

/// Sends a [`TelemetryRecord`] with an increasing count every interval over a single connection.
pub struct TelemetryPublisher<T, S>
where
    T: TelemetryTransport,
    S: TemperatureSensor,
{
    transport: T,
    sensor: S,
    options: PublisherOptions,
    state: PublisherState,
}

impl<T, S> TelemetryPublisher<T, S>
where
    T: TelemetryTransport,
    S: TemperatureSensor,
{
    /// Creates a new [`TelemetryPublisher`]. Nothing is connected until [`run`](Self::run).
    pub fn new(transport: T, sensor: S, options: PublisherOptions) -> Self {
        Self {
            transport,
            sensor,
            options,
            state: PublisherState::Connecting,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> PublisherState {
        self.state
    }

    /// Connect the transport, then send records until `stop` is cancelled, the configured
    /// maximum is reached, or a send fails.
    ///
    /// The transport is disconnected once the loop ends. Returns the number of records sent.
    ///
    /// # Errors
    /// [`PublisherError::Connection`] if the transport fails to connect. Nothing is sent.
    ///
    /// [`PublisherError::Delivery`] if a send fails. The record is not retried and nothing
    /// further is sent.
    ///
    /// [`PublisherError::Serialization`] if a record cannot be serialized.
    ///
    /// [`PublisherError::Stopped`] if the publisher has already run.
    pub async fn run(&mut self, stop: CancellationToken) -> Result<u64, PublisherError> {
        if self.state == PublisherState::Stopped {
            return Err(PublisherError::Stopped);
        }

        log::info!("Connecting");
        if let Err(e) = self.transport.connect().await {
            self.state = PublisherState::Stopped;
            return Err(e.into());
        }
        self.state = PublisherState::Running;
        log::info!("Connected");

        let result = self.publish(&stop).await;
        self.state = PublisherState::Stopped;

        match self.transport.disconnect().await {
            Ok(()) => log::info!("Disconnected"),
            Err(e) => log::warn!("Failed to disconnect: {e}"),
        }
        if let Ok(count) = &result {
            log::info!("Stopped after sending {count} messages");
        }
        result
    }

    async fn publish(&mut self, stop: &CancellationToken) -> Result<u64, PublisherError> {
        let mut count = 0;
        loop {
            if stop.is_cancelled() || self.limit_reached(count) {
                break;
            }

            let record = TelemetryRecord {
                count,
                temperature: self.sensor.read_temperature(),
            };
            let payload = record
                .to_serialized_payload()
                .map_err(|source| PublisherError::Serialization { count, source })?;

            log::info!("Sending message...");
            log::debug!("{record:?}");
            self.transport
                .send(payload)
                .await
                .map_err(|source| PublisherError::Delivery { count, source })?;
            log::info!("Message successfully sent!");
            count += 1;

            if self.limit_reached(count) {
                break;
            }

            tokio::select! {
                biased;
                () = stop.cancelled() => {
                    log::info!("Stop requested");
                    break;
                }
                () = tokio::time::sleep(self.options.interval) => {}
            }
        }
        Ok(count)
    }

    fn limit_reached(&self, count: u64) -> bool {
        self.options.max_messages.is_some_and(|max| count >= max)
    }
}
