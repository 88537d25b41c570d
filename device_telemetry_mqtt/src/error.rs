// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Common error types

use std::time::Duration;

use thiserror::Error;

pub use crate::rumqttc_adapter::{ConnectionSettingsAdapterError, ConnectionSettingsField};

/// Error establishing the transport connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection settings could not be converted into client options
    #[error(transparent)]
    InvalidSettings(#[from] ConnectionSettingsAdapterError),
    /// `connect` was called on a transport that already has a connection
    #[error("transport is already connected")]
    AlreadyConnected,
    /// No CONNACK was received within the connection timeout
    #[error("no CONNACK received within {0:?}")]
    Timeout(Duration),
    /// The broker refused the connection
    #[error("connection refused by broker: {0}")]
    Refused(String),
    /// Network or protocol failure while connecting
    #[error("failed to establish MQTT connection")]
    Mqtt(#[source] rumqttc::v5::ConnectionError),
}

/// Error delivering a telemetry message
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// `send` was called before a connection was established
    #[error("transport is not connected")]
    NotConnected,
    /// The connection was lost and will not be re-established
    #[error("connection lost")]
    ConnectionLost,
    /// Client is detached from connection/event loop. Cannot send requests.
    #[error("client is detached from connection/event loop")]
    DetachedClient(#[source] rumqttc::v5::ClientError),
    /// The broker acknowledged the publish with a failure reason code
    #[error("publish rejected by broker: {0}")]
    Rejected(String),
}

/// Error executing an MQTT disconnect
#[derive(Debug, Error)]
pub enum DisconnectError {
    /// There is no connection to disconnect
    #[error("transport is not connected")]
    NotConnected,
    /// Client is detached from connection/event loop. Cannot send requests.
    #[error("client is detached from connection/event loop")]
    DetachedClient(#[source] rumqttc::v5::ClientError),
}
