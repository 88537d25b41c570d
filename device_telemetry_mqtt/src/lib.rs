// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]
#![allow(clippy::result_large_err)]

//! MQTT version 5.0 transport for publishing device telemetry.
//!
//! The [`interface::TelemetryTransport`] trait is the only surface the telemetry publisher
//! depends on. [`MqttTransport`] implements it on top of `rumqttc`, and
//! [`interface_mocks::MockTransport`] implements it for tests.

pub use crate::connection_settings::{
    MqttConnectionSettings, MqttConnectionSettingsBuilder, MqttConnectionSettingsBuilderError,
};
pub use crate::rumqttc_adapter::MqttTransport;

mod connection_settings;
pub mod error;
pub mod interface;
pub mod interface_mocks;
pub mod topic;

mod rumqttc_adapter;

#[macro_use]
extern crate derive_builder;
