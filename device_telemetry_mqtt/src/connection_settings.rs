// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Generic MQTT connection settings implementations

use std::env::{self, VarError};
use std::time::Duration;

/// All the settings required to establish an MQTT connection.
#[derive(Builder, Clone)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct MqttConnectionSettings {
    /// Client identifier
    pub(crate) client_id: String,
    /// FQDN of the host to connect to
    pub(crate) hostname: String,
    /// TCP port to connect to the host on
    #[builder(default = "8883")]
    pub(crate) tcp_port: u16,
    /// Max time between communications
    #[builder(default = "Duration::from_secs(60)")]
    pub(crate) keep_alive: Duration,
    /// Max time to wait for the broker to acknowledge the connection
    #[builder(default = "Duration::from_secs(30)")]
    pub(crate) connection_timeout: Duration,
    /// Clean start
    #[builder(default = "true")]
    pub(crate) clean_start: bool,
    /// Username for MQTT. Defaults to the client identifier when a password is provided.
    #[builder(default = "None")]
    pub(crate) username: Option<String>,
    /// Password for MQTT. Forwarded to the broker verbatim.
    #[builder(default = "None")]
    pub(crate) password: Option<String>,
    /// TLS negotiation enabled
    #[builder(default = "true")]
    pub(crate) use_tls: bool,
    /// Path to a PEM file used to validate server identity
    #[builder(default = "None")]
    pub(crate) ca_file: Option<String>,
}

impl MqttConnectionSettings {
    /// Client identifier used for the connection
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// FQDN of the host to connect to
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Max time to wait for the broker to acknowledge the connection
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }
}

impl MqttConnectionSettingsBuilder {
    /// Initialize the [`MqttConnectionSettingsBuilder`] from environment variables.
    ///
    /// The password is never read from the environment by this function; it is expected to be
    /// provided separately via [`MqttConnectionSettingsBuilder::password`].
    ///
    /// Example
    /// ```
    /// # use device_telemetry_mqtt::{MqttConnectionSettings, MqttConnectionSettingsBuilder};
    /// # fn try_main() -> Result<MqttConnectionSettings, String> {
    /// let connection_settings = MqttConnectionSettingsBuilder::from_environment()?
    ///     .password("device-credential".to_string())
    ///     .build()
    ///     .map_err(|e| e.to_string())?;
    /// # Ok(connection_settings)
    /// # }
    /// # fn main() {
    /// #     // NOTE: The environment is not set up for doctests, so this always fails to build
    /// #     try_main().ok();
    /// # }
    /// ```
    ///
    /// # Errors
    /// Returns a `String` describing the error if any of the environment variables are invalid.
    pub fn from_environment() -> Result<Self, String> {
        let client_id = string_from_environment("DEVICE_MQTT_CLIENT_ID")?;
        let hostname = string_from_environment("DEVICE_BROKER_HOSTNAME")?;
        let tcp_port = string_from_environment("DEVICE_BROKER_TCP_PORT")?
            .map(|v| v.parse::<u16>())
            .transpose()
            .map_err(|e| format!("DEVICE_BROKER_TCP_PORT: {e}"))?;
        let keep_alive = string_from_environment("DEVICE_MQTT_KEEP_ALIVE")?
            .map(|v| v.parse::<u32>().map(u64::from).map(Duration::from_secs))
            .transpose()
            .map_err(|e| format!("DEVICE_MQTT_KEEP_ALIVE: {e}"))?;
        let connection_timeout = string_from_environment("DEVICE_MQTT_CONNECT_TIMEOUT")?
            .map(|v| v.parse::<u32>().map(u64::from).map(Duration::from_secs))
            .transpose()
            .map_err(|e| format!("DEVICE_MQTT_CONNECT_TIMEOUT: {e}"))?;
        let username = Some(string_from_environment("DEVICE_MQTT_USERNAME")?);
        let use_tls = string_from_environment("DEVICE_MQTT_USE_TLS")?
            .map(|v| v.parse::<bool>())
            .transpose()
            .map_err(|e| format!("DEVICE_MQTT_USE_TLS: {e}"))?;
        let ca_file = Some(string_from_environment("DEVICE_TLS_CA_FILE")?);

        // NOTE: Do not error on missing required values. They may still be provided by the
        // caller before building, and .validate() will reject them if they are not.
        if client_id.is_none() {
            log::warn!("DEVICE_MQTT_CLIENT_ID is not set in environment");
        }
        if hostname.is_none() {
            log::warn!("DEVICE_BROKER_HOSTNAME is not set in environment");
        }

        Ok(Self {
            client_id,
            hostname,
            tcp_port,
            keep_alive,
            connection_timeout,
            clean_start: Some(true),
            username,
            password: None,
            use_tls,
            ca_file,
        })
    }

    /// Validate the MQTT Connection Settings.
    ///
    /// # Errors
    /// Returns a `String` describing the error if
    /// - `hostname` is empty
    /// - `client_id` is empty and `clean_start` is false
    /// - `connection_timeout` is zero
    /// - `ca_file` is Some while `use_tls` is false
    fn validate(&self) -> Result<(), String> {
        if let Some(hostname) = &self.hostname {
            if hostname.is_empty() {
                return Err("Host name cannot be empty".to_string());
            }
        }
        if let Some(client_id) = &self.client_id {
            // default for clean_start is true
            if client_id.is_empty() && self.clean_start == Some(false) {
                return Err("client_id is mandatory when clean_start is set to false".to_string());
            }
        }
        if let Some(connection_timeout) = &self.connection_timeout {
            if connection_timeout.is_zero() {
                return Err("connection_timeout must be greater than zero".to_string());
            }
        }
        if let (Some(Some(_)), Some(false)) = (&self.ca_file, &self.use_tls) {
            return Err("ca_file cannot be used when use_tls is false".to_string());
        }
        Ok(())
    }
}

/// Helper function to get an environment variable as a string.
fn string_from_environment(key: &str) -> Result<Option<String>, String> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None), // Handled by the validate function if required
        Err(VarError::NotUnicode(_)) => Err(format!(
            "Could not parse non-unicode environment variable {key}"
        )),
    }
}
