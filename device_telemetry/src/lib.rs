// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Periodic publishing of simulated device telemetry.
//!
//! A [`publisher::TelemetryPublisher`] connects a
//! [`TelemetryTransport`](device_telemetry_mqtt::interface::TelemetryTransport) once, then sends a
//! [`record::TelemetryRecord`] on a fixed interval until it is told to stop or a send fails.

#![warn(missing_docs)]
#![allow(clippy::result_large_err)]

pub mod config;
pub mod payload_serialize;
pub mod publisher;
pub mod record;

#[macro_use]
extern crate derive_builder;
