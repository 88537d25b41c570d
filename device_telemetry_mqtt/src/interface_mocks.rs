// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bespoke mocks for the traits defined in the interface module.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{ConnectionError, DeliveryError, DisconnectError};
use crate::interface::{SerializedPayload, TelemetryTransport};

/// An operation invoked on a [`MockTransport`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportCall {
    /// `connect` was called
    Connect,
    /// `send` was called with the given payload
    Send(SerializedPayload),
    /// `disconnect` was called
    Disconnect,
}

#[derive(Default)]
struct MockState {
    calls: Vec<(TransportCall, Instant)>,
    connected: bool,
    fail_connect: bool,
    fail_send_at: Option<usize>,
    send_attempts: usize,
}

/// Mock implementation of a [`TelemetryTransport`].
///
/// Records every call (shared across all clones) and succeeds unless a failure has been injected.
///
/// # Example
/// ```
/// # use device_telemetry_mqtt::interface::{FormatIndicator, SerializedPayload, TelemetryTransport};
/// # use device_telemetry_mqtt::interface_mocks::{MockTransport, TransportCall};
/// let mock = MockTransport::new();
/// let mut transport = mock.clone();
/// # tokio_test::block_on(async {
/// transport.connect().await.unwrap();
/// transport.send(SerializedPayload {
///     payload: b"{}".to_vec(),
///     content_type: "application/json".to_string(),
///     format_indicator: FormatIndicator::Utf8EncodedCharacterData,
/// }).await.unwrap();
/// # });
/// assert_eq!(mock.calls()[0], TransportCall::Connect);
/// assert_eq!(mock.sent_payloads().len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Return a new mocked transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `connect` fail.
    pub fn fail_connect(&self) {
        self.state.lock().unwrap().fail_connect = true;
    }

    /// Make the send attempt with the given zero-based index fail.
    pub fn fail_send_at(&self, index: usize) {
        self.state.lock().unwrap().fail_send_at = Some(index);
    }

    /// All calls made on this transport, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(call, _)| call.clone())
            .collect()
    }

    /// Payloads of all send attempts, in order, including a failed attempt.
    #[must_use]
    pub fn sent_payloads(&self) -> Vec<SerializedPayload> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Send(payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    /// Times at which each send attempt was made, in order.
    #[must_use]
    pub fn send_times(&self) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter_map(|(call, at)| matches!(call, TransportCall::Send(_)).then_some(*at))
            .collect()
    }
}

#[async_trait]
impl TelemetryTransport for MockTransport {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((TransportCall::Connect, Instant::now()));
        if state.connected {
            return Err(ConnectionError::AlreadyConnected);
        }
        if state.fail_connect {
            return Err(ConnectionError::Refused("injected failure".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn send(&mut self, payload: SerializedPayload) -> Result<(), DeliveryError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push((TransportCall::Send(payload), Instant::now()));
        if !state.connected {
            return Err(DeliveryError::NotConnected);
        }
        let attempt = state.send_attempts;
        state.send_attempts += 1;
        if state.fail_send_at == Some(attempt) {
            return Err(DeliveryError::Rejected("injected failure".to_string()));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DisconnectError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((TransportCall::Disconnect, Instant::now()));
        if !state.connected {
            return Err(DisconnectError::NotConnected);
        }
        state.connected = false;
        Ok(())
    }
}
