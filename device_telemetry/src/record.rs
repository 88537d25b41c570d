// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Telemetry records and the simulated sensor producing their readings.

use std::ops::RangeInclusive;

use device_telemetry_mqtt::interface::FormatIndicator;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::payload_serialize::PayloadSerialize;

/// Range of temperatures reported by the [`SimulatedTemperatureSensor`]
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 35.5..=85.5;

/// A single telemetry measurement.
///
/// Serializes as `{"count":<integer>,"temperature":<float>}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Position of this record in the sequence of records sent, starting at 0
    pub count: u64,
    /// Temperature reading
    pub temperature: f64,
}

impl PayloadSerialize for TelemetryRecord {
    type Error = serde_json::Error;

    fn content_type() -> &'static str {
        "application/json"
    }

    fn format_indicator() -> FormatIndicator {
        FormatIndicator::Utf8EncodedCharacterData
    }

    fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Source of temperature readings
pub trait TemperatureSensor: Send {
    /// Take a reading
    fn read_temperature(&mut self) -> f64;
}

/// [`TemperatureSensor`] reporting values drawn uniformly from [`TEMPERATURE_RANGE`].
pub struct SimulatedTemperatureSensor {
    rng: StdRng,
}

impl SimulatedTemperatureSensor {
    /// Create a sensor seeded from system entropy.
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a sensor producing a reproducible sequence of readings.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl TemperatureSensor for SimulatedTemperatureSensor {
    fn read_temperature(&mut self) -> f64 {
        self.rng.gen_range(TEMPERATURE_RANGE)
    }
}
