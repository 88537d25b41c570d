// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Traits and types for delivering telemetry over a transport.

use async_trait::async_trait;

use crate::error::{ConnectionError, DeliveryError, DisconnectError};

/// Format indicator of a payload, as carried in the MQTT payload format indicator property.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatIndicator {
    /// Unspecified Bytes
    UnspecifiedBytes = 0,
    /// UTF-8 Encoded Character Data (as JSON)
    Utf8EncodedCharacterData = 1,
}

/// A payload ready for delivery, along with the metadata describing its encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializedPayload {
    /// The serialized payload bytes
    pub payload: Vec<u8>,
    /// Content type of the payload, e.g. `application/json`
    pub content_type: String,
    /// Format indicator of the payload
    pub format_indicator: FormatIndicator,
}

/// A single long-lived connection used to deliver telemetry messages.
///
/// Implementations do not retry, buffer, or reconnect. Any failure is reported to the caller.
#[async_trait]
pub trait TelemetryTransport: Send {
    /// Establish the connection.
    ///
    /// # Errors
    /// Returns a [`ConnectionError`] if the connection could not be established.
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Deliver a single message, returning once delivery has been acknowledged.
    ///
    /// # Errors
    /// Returns a [`DeliveryError`] if the message could not be delivered.
    async fn send(&mut self, payload: SerializedPayload) -> Result<(), DeliveryError>;

    /// Close the connection.
    ///
    /// # Errors
    /// Returns a [`DisconnectError`] if the disconnect could not be requested.
    async fn disconnect(&mut self) -> Result<(), DisconnectError>;
}
