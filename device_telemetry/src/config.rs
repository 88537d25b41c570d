// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Loading of the device credential and settings from the environment.
//!
//! Values can be placed in a `.env` file, which is loaded into the process environment without
//! overriding variables that are already set.

use std::env::{self, VarError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use device_telemetry_mqtt::topic::TopicName;
use device_telemetry_mqtt::{MqttConnectionSettings, MqttConnectionSettingsBuilder};
use thiserror::Error;

use crate::publisher::{PublisherOptions, PublisherOptionsBuilder};

/// Environment variable holding the device credential
pub const CREDENTIAL_ENV_VAR: &str = "IOTHUB_DEVICE_CONNECTION_STRING";
/// Environment variable overriding the topic telemetry is published to
pub const TOPIC_ENV_VAR: &str = "DEVICE_TELEMETRY_TOPIC";
/// Environment file loaded by [`DeviceConfig::load`] in the sample application
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Error loading configuration. Always fatal: nothing is connected without a valid configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The credential environment variable is not set
    #[error("credential environment variable {0} is not set")]
    MissingCredential(String),
    /// The credential environment variable is set, but empty
    #[error("credential environment variable {0} is empty")]
    EmptyCredential(String),
    /// An environment variable is not valid unicode
    #[error("environment variable {0} is not valid unicode")]
    NotUnicode(String),
    /// The environment file exists but could not be loaded
    #[error("failed to load environment file {path}")]
    EnvFile {
        /// Path of the environment file
        path: PathBuf,
        /// Underlying parse or I/O error
        #[source]
        source: dotenvy::Error,
    },
    /// A setting is missing or has an invalid value
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// Opaque authentication secret of the device.
///
/// The value is never interpreted, and never shown by [`Debug`].
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    /// Read the credential from [`CREDENTIAL_ENV_VAR`].
    ///
    /// # Errors
    /// Returns a [`ConfigurationError`] if the variable is not set, empty, or not unicode.
    pub fn from_environment() -> Result<Self, ConfigurationError> {
        Self::from_env_var(CREDENTIAL_ENV_VAR)
    }

    /// Read the credential from the given environment variable.
    ///
    /// # Errors
    /// Returns a [`ConfigurationError`] if the variable is not set, empty, or not unicode.
    pub fn from_env_var(key: &str) -> Result<Self, ConfigurationError> {
        match string_from_environment(key)? {
            None => Err(ConfigurationError::MissingCredential(key.to_string())),
            Some(value) if value.trim().is_empty() => {
                Err(ConfigurationError::EmptyCredential(key.to_string()))
            }
            Some(value) => Ok(Self(value)),
        }
    }

    /// Consume the credential, returning its value
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Load `KEY=VALUE` pairs from an environment file into the process environment.
///
/// Variables that are already set are not overridden. Returns `false` if the file does not exist.
///
/// # Errors
/// Returns [`ConfigurationError::EnvFile`] if the file exists but cannot be read or parsed.
pub fn load_env_file(path: &Path) -> Result<bool, ConfigurationError> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            log::debug!("Loaded environment file {}", path.display());
            Ok(true)
        }
        Err(e) if e.not_found() => {
            log::debug!("No environment file at {}", path.display());
            Ok(false)
        }
        Err(source) => Err(ConfigurationError::EnvFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Default topic for a client: the device-to-cloud events topic of the device.
#[must_use]
pub fn default_topic(client_id: &str) -> String {
    format!("devices/{client_id}/messages/events/")
}

/// Everything needed to run the publisher, resolved from the environment.
pub struct DeviceConfig {
    /// Transport connection settings, with the credential as the password
    pub connection_settings: MqttConnectionSettings,
    /// Topic telemetry is published to
    pub topic: String,
    /// Pacing options of the publisher loop
    pub publisher_options: PublisherOptions,
}

impl DeviceConfig {
    /// Load the environment file at `env_file` (if present), then resolve the configuration
    /// from the environment.
    ///
    /// # Errors
    /// Returns a [`ConfigurationError`] if the environment file is malformed, or if
    /// [`DeviceConfig::from_environment`] fails.
    pub fn load(env_file: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        load_env_file(env_file.as_ref())?;
        Self::from_environment()
    }

    /// Resolve the configuration from the environment.
    ///
    /// The credential is checked first, so a missing credential is always the reported error.
    ///
    /// # Errors
    /// Returns a [`ConfigurationError`] if the credential is missing or empty, or if any
    /// connection or publisher setting is missing or invalid.
    pub fn from_environment() -> Result<Self, ConfigurationError> {
        let credential = Credential::from_environment()?;

        let connection_settings = MqttConnectionSettingsBuilder::from_environment()
            .map_err(ConfigurationError::InvalidSetting)?
            .password(credential.into_inner())
            .build()
            .map_err(|e| ConfigurationError::InvalidSetting(e.to_string()))?;

        let topic = string_from_environment(TOPIC_ENV_VAR)?
            .unwrap_or_else(|| default_topic(connection_settings.client_id()));
        TopicName::from_str(&topic)
            .map_err(|e| ConfigurationError::InvalidSetting(format!("{TOPIC_ENV_VAR}: {e}")))?;

        let publisher_options = PublisherOptionsBuilder::from_environment()?
            .build()
            .map_err(|e| ConfigurationError::InvalidSetting(e.to_string()))?;

        Ok(Self {
            connection_settings,
            topic,
            publisher_options,
        })
    }
}

/// Helper function to get an environment variable as a string.
pub(crate) fn string_from_environment(key: &str) -> Result<Option<String>, ConfigurationError> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigurationError::NotUnicode(key.to_string())),
    }
}
