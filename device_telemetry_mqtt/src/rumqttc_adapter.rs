// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapter layer for the rumqttc crate

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{fmt, fs, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use openssl::x509::X509;
use rumqttc::v5::mqttbytes::v5::{ConnAck, PubAckReason, PublishProperties};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, Incoming, MqttOptions};
use rumqttc::{TlsConfiguration, Transport};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection_settings::MqttConnectionSettings;
use crate::error::{ConnectionError, DeliveryError, DisconnectError};
use crate::interface::{SerializedPayload, TelemetryTransport};
use crate::topic::{TopicName, TopicParseError};

// NOTE: Only one publish is ever in flight, so the request channel does not need to be deep.
const REQUEST_CHANNEL_CAPACITY: usize = 10;
/// Max time to wait for the event loop to wind down after a DISCONNECT is requested
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Smallest keep alive rumqttc accepts
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// [`TelemetryTransport`] publishing to a single MQTT topic over an MQTT v5 connection.
///
/// Publishes are sent with QoS 1, and each send completes once the broker's PUBACK arrives.
/// The connection is established once; if it drops, it is not re-established and every
/// subsequent send fails.
pub struct MqttTransport {
    connection_settings: MqttConnectionSettings,
    topic: TopicName,
    connection: Option<Connection>,
}

/// State that only exists once the transport is connected
struct Connection {
    client: AsyncClient,
    puback_rx: mpsc::UnboundedReceiver<PubAckReason>,
    event_loop_task: JoinHandle<()>,
    /// Set once a user-initiated disconnect is in progress
    disconnecting: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Create a new, unconnected [`MqttTransport`] that will publish to `topic`.
    ///
    /// # Errors
    /// Returns a [`TopicParseError`] if `topic` is not a valid MQTT topic name.
    pub fn new(
        connection_settings: MqttConnectionSettings,
        topic: impl Into<String>,
    ) -> Result<Self, TopicParseError> {
        let topic = TopicName::from_string(topic.into())?;
        Ok(Self {
            connection_settings,
            topic,
            connection: None,
        })
    }

    /// Topic that telemetry is published to
    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_str()
    }
}

#[async_trait]
impl TelemetryTransport for MqttTransport {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.connection.is_some() {
            return Err(ConnectionError::AlreadyConnected);
        }
        let connection_timeout = self.connection_settings.connection_timeout;
        let mqtt_options: MqttOptions = self.connection_settings.clone().try_into()?;
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        log::info!(
            "Connecting to {}:{} as {}",
            self.connection_settings.hostname,
            self.connection_settings.tcp_port,
            self.connection_settings.client_id
        );
        let connack = tokio::time::timeout(
            connection_timeout,
            wait_for_connack(&mut event_loop, connection_timeout),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(connection_timeout))??;
        log::debug!("Incoming CONNACK: {connack:?}");

        // The event loop must keep being polled for the connection to make progress
        let (puback_tx, puback_rx) = mpsc::unbounded_channel();
        let disconnecting = Arc::new(AtomicBool::new(false));
        let event_loop_task = tokio::spawn(run_event_loop(
            event_loop,
            puback_tx,
            disconnecting.clone(),
        ));

        self.connection = Some(Connection {
            client,
            puback_rx,
            event_loop_task,
            disconnecting,
        });
        Ok(())
    }

    async fn send(&mut self, payload: SerializedPayload) -> Result<(), DeliveryError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(DeliveryError::NotConnected);
        };

        let properties = PublishProperties {
            payload_format_indicator: Some(payload.format_indicator as u8),
            message_expiry_interval: None,
            topic_alias: None,
            response_topic: None,
            correlation_data: None,
            user_properties: Vec::new(),
            subscription_identifiers: Vec::new(),
            content_type: Some(payload.content_type),
        };

        if let Err(e) = connection
            .client
            .publish_with_properties(
                self.topic.as_str(),
                QoS::AtLeastOnce,
                false,
                Bytes::from(payload.payload),
                properties,
            )
            .await
        {
            // A finished event loop means the request channel was closed by a lost connection
            if connection.event_loop_task.is_finished() {
                return Err(DeliveryError::ConnectionLost);
            }
            log::error!("Publish error: {e}");
            return Err(DeliveryError::DetachedClient(e));
        }

        // Wait for and handle the puback
        match connection.puback_rx.recv().await {
            Some(PubAckReason::Success | PubAckReason::NoMatchingSubscribers) => Ok(()),
            Some(reason) => {
                log::error!("Puback error: {reason:?}");
                Err(DeliveryError::Rejected(format!("{reason:?}")))
            }
            None => Err(DeliveryError::ConnectionLost),
        }
    }

    async fn disconnect(&mut self) -> Result<(), DisconnectError> {
        let Some(mut connection) = self.connection.take() else {
            return Err(DisconnectError::NotConnected);
        };
        connection.disconnecting.store(true, Ordering::SeqCst);
        connection
            .client
            .disconnect()
            .await
            .map_err(DisconnectError::DetachedClient)?;
        if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut connection.event_loop_task)
            .await
            .is_err()
        {
            log::warn!("Event loop still running {DISCONNECT_TIMEOUT:?} after DISCONNECT. Aborting.");
            connection.event_loop_task.abort();
        }
        Ok(())
    }
}

/// Poll the event loop until the broker acknowledges the connection.
async fn wait_for_connack(
    event_loop: &mut EventLoop,
    connection_timeout: Duration,
) -> Result<ConnAck, ConnectionError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(connack))) => return Ok(connack),
            Ok(event) => log::debug!("Event before CONNACK: {event:?}"),
            // rumqttc applies the same connection timeout to its own connect
            Err(rumqttc::v5::ConnectionError::Timeout(_)) => {
                return Err(ConnectionError::Timeout(connection_timeout));
            }
            Err(rumqttc::v5::ConnectionError::ConnectionRefused(code)) => {
                return Err(ConnectionError::Refused(format!("{code:?}")));
            }
            Err(e) => return Err(ConnectionError::Mqtt(e)),
        }
    }
}

/// Drive the connection, forwarding PUBACK reason codes, until the connection ends.
///
/// Polling stops on the first error. The event loop would otherwise reconnect on the next poll.
async fn run_event_loop(
    mut event_loop: EventLoop,
    puback_tx: mpsc::UnboundedSender<PubAckReason>,
    disconnecting: Arc<AtomicBool>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Incoming::PubAck(puback))) => {
                log::debug!("Incoming PUBACK: {puback:?}");
                if puback_tx.send(puback.reason).is_err() {
                    // Transport was dropped
                    break;
                }
            }
            Ok(Event::Incoming(Incoming::Disconnect(disconnect))) => {
                log::error!("DISCONNECT received from broker: {disconnect:?}");
                break;
            }
            Ok(event) => log::trace!("Event: {event:?}"),
            Err(e) => {
                if disconnecting.load(Ordering::SeqCst) {
                    log::debug!("Connection closed after DISCONNECT: {e}");
                } else {
                    log::error!("Connection lost: {e}");
                }
                break;
            }
        }
    }
}

/// Error converting [`MqttConnectionSettings`] into client options
#[derive(Error, Debug)]
#[error("{msg}: {field}")]
pub struct ConnectionSettingsAdapterError {
    msg: String,
    field: ConnectionSettingsField,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl ConnectionSettingsAdapterError {
    /// The setting that could not be applied
    #[must_use]
    pub fn field(&self) -> &ConnectionSettingsField {
        &self.field
    }
}

/// Connection setting that failed conversion, along with its value
#[derive(Debug)]
pub enum ConnectionSettingsField {
    /// Keep alive interval
    KeepAlive(Duration),
    /// Path to the CA file
    CaFile(String),
}

impl fmt::Display for ConnectionSettingsField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionSettingsField::KeepAlive(v) => write!(f, "Keep Alive: {v:?}"),
            ConnectionSettingsField::CaFile(v) => write!(f, "CA File: {v:?}"),
        }
    }
}

impl TryFrom<MqttConnectionSettings> for MqttOptions {
    type Error = ConnectionSettingsAdapterError;

    fn try_from(value: MqttConnectionSettings) -> Result<Self, Self::Error> {
        // Client ID, Host Name, TCP Port
        let mut mqtt_options =
            MqttOptions::new(value.client_id.clone(), value.hostname, value.tcp_port);
        // Keep Alive
        // rumqttc panics on a keep alive under 5 seconds
        if value.keep_alive < MIN_KEEP_ALIVE {
            return Err(ConnectionSettingsAdapterError {
                msg: "require >= 5 seconds".to_string(),
                field: ConnectionSettingsField::KeepAlive(value.keep_alive),
                source: None,
            });
        }
        mqtt_options.set_keep_alive(value.keep_alive);
        // Connection Timeout, in whole seconds rounded up
        mqtt_options.set_connection_timeout(
            value.connection_timeout.as_secs()
                + u64::from(value.connection_timeout.subsec_nanos() > 0),
        );
        // Clean Start
        mqtt_options.set_clean_start(value.clean_start);
        // Username, Password
        match (value.username, value.password) {
            (username, Some(password)) => {
                mqtt_options.set_credentials(username.unwrap_or(value.client_id), password);
            }
            (Some(username), None) => {
                mqtt_options.set_credentials(username, String::new());
            }
            (None, None) => {}
        }
        // Use TLS, CA File
        if value.use_tls {
            let transport = tls_config(value.ca_file)?;
            mqtt_options.set_transport(transport);
        }
        Ok(mqtt_options)
    }
}

/// Build a TLS transport trusting the system's roots, or the CA cert in `ca_file` if provided.
fn tls_config(ca_file: Option<String>) -> Result<Transport, ConnectionSettingsAdapterError> {
    let tls_configuration = match ca_file {
        Some(ca_file) => TlsConfiguration::SimpleNative {
            ca: read_root_ca_cert(&ca_file)?,
            client_auth: None,
        },
        None => TlsConfiguration::Native,
    };
    Ok(Transport::tls_with_config(tls_configuration))
}

/// Read the PEM of the root CA cert in `ca_file`.
///
/// rumqttc only trusts a single CA cert, so only the first cert of a bundle is used.
fn read_root_ca_cert(ca_file: &str) -> Result<Vec<u8>, ConnectionSettingsAdapterError> {
    let ca_error = |msg: &str, source: Option<Box<dyn Error + Send + Sync>>| {
        ConnectionSettingsAdapterError {
            msg: msg.to_string(),
            field: ConnectionSettingsField::CaFile(ca_file.to_string()),
            source,
        }
    };

    let ca_pem =
        fs::read(ca_file).map_err(|e| ca_error("cannot read ca file", Some(Box::new(e))))?;
    let ca_certs = X509::stack_from_pem(&ca_pem)
        .map_err(|e| ca_error("invalid certificate in ca file", Some(Box::new(e))))?;

    let Some(ca_cert) = ca_certs.first() else {
        return Err(ca_error("no CA certs available in ca file", None));
    };
    if ca_certs.len() > 1 {
        log::warn!("{ca_file} contains {} certs, only the first is trusted", ca_certs.len());
    }
    ca_cert
        .to_pem()
        .map_err(|e| ca_error("invalid certificate in ca file", Some(Box::new(e))))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use test_case::test_case;

    use super::*;
    use crate::interface::FormatIndicator;
    use crate::MqttConnectionSettingsBuilder;

    fn json_payload() -> SerializedPayload {
        SerializedPayload {
            payload: br#"{"count":0,"temperature":40.0}"#.to_vec(),
            content_type: "application/json".to_string(),
            format_indicator: FormatIndicator::Utf8EncodedCharacterData,
        }
    }

    fn plain_settings() -> MqttConnectionSettings {
        MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .tcp_port(1883u16)
            .use_tls(false)
            .build()
            .unwrap()
    }

    #[test]
    fn test_mqtt_connection_settings_no_tls() {
        let mqtt_options: MqttOptions = plain_settings().try_into().unwrap();
        assert_eq!(
            mqtt_options.broker_address(),
            ("test_host".to_string(), 1883)
        );
        assert_eq!(mqtt_options.client_id(), "test_client_id".to_string());
        assert_eq!(mqtt_options.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_mqtt_connection_settings_credentials() {
        // password alone, username defaults to client id
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .use_tls(false)
            .password("test_password".to_string())
            .build()
            .unwrap();
        let mqtt_options_result: Result<MqttOptions, ConnectionSettingsAdapterError> =
            connection_settings.try_into();
        assert!(mqtt_options_result.is_ok());

        // username and password
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .use_tls(false)
            .username("test_username".to_string())
            .password("test_password".to_string())
            .build()
            .unwrap();
        let mqtt_options_result: Result<MqttOptions, ConnectionSettingsAdapterError> =
            connection_settings.try_into();
        assert!(mqtt_options_result.is_ok());

        // just username
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .use_tls(false)
            .username("test_username".to_string())
            .build()
            .unwrap();
        let mqtt_options_result: Result<MqttOptions, ConnectionSettingsAdapterError> =
            connection_settings.try_into();
        assert!(mqtt_options_result.is_ok());
    }

    #[test_case(Duration::ZERO; "zero")]
    #[test_case(Duration::from_millis(500); "sub second")]
    #[test_case(Duration::from_secs(2); "two seconds")]
    #[test_case(Duration::from_millis(4999); "just under five seconds")]
    fn test_mqtt_connection_settings_keep_alive_too_short(keep_alive: Duration) {
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .use_tls(false)
            .keep_alive(keep_alive)
            .build()
            .unwrap();
        let mqtt_options_result: Result<MqttOptions, ConnectionSettingsAdapterError> =
            connection_settings.try_into();
        assert!(matches!(
            mqtt_options_result.err().unwrap().field(),
            ConnectionSettingsField::KeepAlive(_)
        ));
    }

    #[test_case(Duration::from_secs(5); "five seconds")]
    #[test_case(Duration::from_secs(3600); "one hour")]
    fn test_mqtt_connection_settings_keep_alive(keep_alive: Duration) {
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .use_tls(false)
            .keep_alive(keep_alive)
            .build()
            .unwrap();
        let mqtt_options: MqttOptions = connection_settings.try_into().unwrap();
        assert_eq!(mqtt_options.keep_alive(), keep_alive);
    }

    #[test_case(None, 30; "default")]
    #[test_case(Some(Duration::from_secs(5)), 5; "five seconds")]
    #[test_case(Some(Duration::from_secs(120)), 120; "above rumqttc default")]
    #[test_case(Some(Duration::from_millis(1500)), 2; "fractional rounded up")]
    fn test_mqtt_connection_settings_connection_timeout(
        connection_timeout: Option<Duration>,
        expected_secs: u64,
    ) {
        let mut builder = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .use_tls(false);
        if let Some(connection_timeout) = connection_timeout {
            builder = builder.connection_timeout(connection_timeout);
        }
        let mqtt_options: MqttOptions = builder.build().unwrap().try_into().unwrap();
        assert_eq!(mqtt_options.connection_timeout(), expected_secs);
    }

    #[test]
    fn test_mqtt_connection_settings_tls_system_roots() {
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .build()
            .unwrap();
        let mqtt_options_result: Result<MqttOptions, ConnectionSettingsAdapterError> =
            connection_settings.try_into();
        assert!(mqtt_options_result.is_ok());
    }

    #[test]
    fn test_mqtt_connection_settings_ca_file() {
        let mut ca_file_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        ca_file_path.push("../eng/test/dummy_credentials/TestCa.txt");

        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .ca_file(ca_file_path.into_os_string().into_string().unwrap())
            .build()
            .unwrap();
        let mqtt_options_result: Result<MqttOptions, ConnectionSettingsAdapterError> =
            connection_settings.try_into();
        assert!(mqtt_options_result.is_ok());
    }

    #[test_case(b""; "empty")]
    #[test_case(b"not a certificate"; "no pem blocks")]
    #[test_case(b"-----BEGIN CERTIFICATE-----\nbm90IGEgY2VydA==\n-----END CERTIFICATE-----\n"; "invalid certificate")]
    fn test_mqtt_connection_settings_ca_file_invalid(contents: &[u8]) {
        let mut ca_file = tempfile::NamedTempFile::new().unwrap();
        ca_file.write_all(contents).unwrap();

        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .ca_file(ca_file.path().to_str().unwrap().to_string())
            .build()
            .unwrap();
        let mqtt_options_result: Result<MqttOptions, ConnectionSettingsAdapterError> =
            connection_settings.try_into();
        assert!(matches!(
            mqtt_options_result.err().unwrap().field(),
            ConnectionSettingsField::CaFile(_)
        ));
    }

    #[test]
    fn test_mqtt_connection_settings_ca_file_bundle() {
        let mut ca_file_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        ca_file_path.push("../eng/test/dummy_credentials/TestCa.txt");
        let ca_pem = fs::read(&ca_file_path).unwrap();

        // The first cert of a bundle is the one trusted
        let mut bundle = tempfile::NamedTempFile::new().unwrap();
        bundle.write_all(&ca_pem).unwrap();
        bundle.write_all(&ca_pem).unwrap();

        let first_cert = read_root_ca_cert(bundle.path().to_str().unwrap()).unwrap();
        assert_eq!(
            X509::from_pem(&first_cert).unwrap().to_der().unwrap(),
            X509::from_pem(&ca_pem).unwrap().to_der().unwrap()
        );
    }

    #[test]
    fn test_mqtt_connection_settings_ca_file_missing() {
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("test_host".to_string())
            .ca_file("/nonexistent/path/to/ca.pem".to_string())
            .build()
            .unwrap();
        let mqtt_options_result: Result<MqttOptions, ConnectionSettingsAdapterError> =
            connection_settings.try_into();
        assert!(matches!(
            mqtt_options_result.err().unwrap().field(),
            ConnectionSettingsField::CaFile(_)
        ));
    }

    #[test]
    fn test_new_invalid_topic() {
        assert!(MqttTransport::new(plain_settings(), "devices/+/messages/events/").is_err());
        assert!(MqttTransport::new(plain_settings(), "").is_err());
        let transport = MqttTransport::new(plain_settings(), "devices/test/messages/events/")
            .unwrap();
        assert_eq!(transport.topic(), "devices/test/messages/events/");
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let mut transport = MqttTransport::new(plain_settings(), "test/telemetry").unwrap();
        assert!(matches!(
            transport.send(json_payload()).await,
            Err(DeliveryError::NotConnected)
        ));
        assert!(matches!(
            transport.disconnect().await,
            Err(DisconnectError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_unreachable_broker() {
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .hostname("127.0.0.1".to_string())
            .tcp_port(1u16)
            .use_tls(false)
            .connection_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let mut transport = MqttTransport::new(connection_settings, "test/telemetry").unwrap();
        assert!(transport.connect().await.is_err());
        // A failed connect leaves the transport unconnected
        assert!(matches!(
            transport.send(json_payload()).await,
            Err(DeliveryError::NotConnected)
        ));
    }
}
