// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serialization of telemetry payloads.

use std::error::Error;
use std::fmt::Debug;

use device_telemetry_mqtt::interface::{FormatIndicator, SerializedPayload};

/// Trait for serializing payloads.
/// # Examples
/// ```
/// use device_telemetry::payload_serialize::PayloadSerialize;
/// use device_telemetry_mqtt::interface::FormatIndicator;
/// #[derive(Clone, Debug)]
/// pub struct Humidity {
///   relative: f64,
/// }
/// impl PayloadSerialize for Humidity {
///   type Error = String;
///   fn content_type() -> &'static str {
///     "application/json"
///   }
///   fn format_indicator() -> FormatIndicator {
///    FormatIndicator::Utf8EncodedCharacterData
///   }
///   fn serialize(&self) -> Result<Vec<u8>, String> {
///     Ok(format!("{{\"relative\":{}}}", self.relative).into_bytes())
///   }
/// }
/// let payload = Humidity { relative: 0.5 }.to_serialized_payload().unwrap();
/// assert_eq!(payload.payload, br#"{"relative":0.5}"#);
/// assert_eq!(payload.content_type, "application/json");
/// ```
pub trait PayloadSerialize {
    /// The type returned in the event of a serialization error
    type Error: Debug + Into<Box<dyn Error + Sync + Send + 'static>>;

    /// Return content type
    /// Returns a String value to specify the binary format used in the payload, e.g., application/json.
    fn content_type() -> &'static str;

    /// Return format indicator
    /// [`FormatIndicator::Utf8EncodedCharacterData`] for character data (as JSON), [`FormatIndicator::UnspecifiedBytes`] for unspecified.
    fn format_indicator() -> FormatIndicator;

    /// Serializes the payload to a byte vector
    ///
    /// # Errors
    /// Returns a [`PayloadSerialize::Error`] if the serialization fails.
    fn serialize(&self) -> Result<Vec<u8>, Self::Error>;

    /// Serializes the payload along with its content type and format indicator
    ///
    /// # Errors
    /// Returns a [`PayloadSerialize::Error`] if the serialization fails.
    fn to_serialized_payload(&self) -> Result<SerializedPayload, Self::Error> {
        Ok(SerializedPayload {
            payload: self.serialize()?,
            content_type: Self::content_type().to_string(),
            format_indicator: Self::format_indicator(),
        })
    }
}
