//! Transport layer for broker communication
//!
//! This module provides the publish/subscribe transport abstraction the
//! provisioning and twin-synchronization state machines are written against,
//! plus the MQTT implementation. The traits exist to enable dependency
//! injection and testing with scripted brokers.

use async_trait::async_trait;
use thiserror::Error;

pub mod mqtt;

/// Events surfaced by a connection, in broker delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The broker acknowledged the connection.
    Connected,
    /// A message arrived on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
    /// The connection failed. Fatal; no retry happens at this layer.
    Error(String),
}

/// A broker endpoint (TLS assumed, port 8883 for both DPS and IoT Hub).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Mutual-TLS credentials for one connection attempt.
///
/// The username differs between the provisioning service and the hub; it is
/// built by the caller from the topic grammar.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub username: String,
    pub private_key: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub ca_cert: Vec<u8>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("connection closed")]
    Closed,
}

/// One established broker session.
///
/// Messages on a given topic arrive in publish order via
/// [`next_event`](Connection::next_event).
#[async_trait]
pub trait Connection: Send {
    /// Subscribe to a topic filter. Issuance is ordered relative to
    /// subsequent publishes on the same connection.
    async fn subscribe(&mut self, topic_filter: &str) -> Result<(), TransportError>;

    /// Publish a payload to a topic.
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Await the next connection event. `None` means the event stream ended.
    async fn next_event(&mut self) -> Option<ConnectionEvent>;

    /// Close the session and release its listeners.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Factory for broker sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    type Conn: Connection;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Self::Conn, TransportError>;
}

/// Type alias for the MQTT transport.
pub type MqttTransport = mqtt::MqttClient;
