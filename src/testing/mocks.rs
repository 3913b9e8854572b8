//! Mock transport implementations for testing
//!
//! Provides a scripted broker connection so the provisioning and twin state
//! machines can be exercised without a real MQTT stack: tests pre-queue
//! events, attach per-publish response batches, or inject events at any
//! point through the [`BrokerHandle`].

use crate::transport::{
    Connection, ConnectionEvent, Credentials, Endpoint, Transport, TransportError,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

type Published = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

/// Test-side handle into a [`MockConnection`]: inject broker events and
/// inspect what the device published.
#[derive(Clone)]
pub struct BrokerHandle {
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    responses: Arc<Mutex<VecDeque<Vec<ConnectionEvent>>>>,
    published: Published,
    subscriptions: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<bool>>,
}

impl BrokerHandle {
    /// Deliver an event to the device immediately.
    pub fn send(&self, event: ConnectionEvent) {
        // The receiver lives as long as the connection; a closed channel
        // just means the test tore the connection down first.
        let _ = self.event_tx.send(event);
    }

    /// Deliver a message to the device immediately.
    pub fn send_message(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.send(ConnectionEvent::Message {
            topic: topic.into(),
            payload: payload.into(),
        });
    }

    /// Queue a batch of events to be delivered when the device next
    /// publishes. Batches are consumed in order, one per publish.
    pub async fn respond_to_next_publish(&self, events: Vec<ConnectionEvent>) {
        self.responses.lock().await.push_back(events);
    }

    pub async fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().await.clone()
    }

    pub async fn published_topics(&self) -> Vec<String> {
        self.published
            .lock()
            .await
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.lock().await
    }
}

/// Scripted broker connection for tests.
pub struct MockConnection {
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    responses: Arc<Mutex<VecDeque<Vec<ConnectionEvent>>>>,
    published: Published,
    subscriptions: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<bool>>,
}

impl MockConnection {
    pub fn new() -> (Self, BrokerHandle) {
        let (event_tx, events) = mpsc::unbounded_channel();
        let conn = Self {
            event_tx: event_tx.clone(),
            events,
            responses: Arc::new(Mutex::new(VecDeque::new())),
            published: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(false)),
        };
        let handle = BrokerHandle {
            event_tx,
            responses: conn.responses.clone(),
            published: conn.published.clone(),
            subscriptions: conn.subscriptions.clone(),
            closed: conn.closed.clone(),
        };
        (conn, handle)
    }

    /// A connection whose broker immediately acknowledges the session.
    pub fn connected() -> (Self, BrokerHandle) {
        let (conn, handle) = Self::new();
        handle.send(ConnectionEvent::Connected);
        (conn, handle)
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn subscribe(&mut self, topic_filter: &str) -> Result<(), TransportError> {
        self.subscriptions.lock().await.push(topic_filter.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.published
            .lock()
            .await
            .push((topic.to_string(), payload.to_vec()));
        if let Some(events) = self.responses.lock().await.pop_front() {
            for event in events {
                let _ = self.event_tx.send(event);
            }
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        *self.closed.lock().await = true;
        Ok(())
    }
}

/// Mock transport handing out pre-built connections, one per `connect`.
#[derive(Default)]
pub struct MockTransport {
    connections: Mutex<VecDeque<MockConnection>>,
    connects: Mutex<Vec<(Endpoint, String)>>,
    should_fail: bool,
}

impl MockTransport {
    pub fn new(conn: MockConnection) -> Self {
        let mut connections = VecDeque::new();
        connections.push_back(conn);
        Self {
            connections: Mutex::new(connections),
            connects: Mutex::new(Vec::new()),
            should_fail: false,
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn push_connection(&self, conn: MockConnection) {
        self.connections.lock().await.push_back(conn);
    }

    /// Endpoints and usernames of every connection attempt, in order.
    pub async fn connects(&self) -> Vec<(Endpoint, String)> {
        self.connects.lock().await.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Conn = MockConnection;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Self::Conn, TransportError> {
        if self.should_fail {
            return Err(TransportError::ConnectionFailed(
                "mock connection failure".to_string(),
            ));
        }
        self.connects
            .lock()
            .await
            .push((endpoint.clone(), credentials.username.clone()));
        self.connections
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| TransportError::ConnectionFailed("no scripted connection".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_publishes_and_subscriptions() {
        let (mut conn, handle) = MockConnection::new();
        conn.subscribe("a/#").await.unwrap();
        conn.publish("a/b", b"hi").await.unwrap();
        assert_eq!(handle.subscriptions().await, vec!["a/#"]);
        assert_eq!(
            handle.published().await,
            vec![("a/b".to_string(), b"hi".to_vec())]
        );
    }

    #[tokio::test]
    async fn scripted_responses_fire_per_publish() {
        let (mut conn, handle) = MockConnection::new();
        handle
            .respond_to_next_publish(vec![ConnectionEvent::Message {
                topic: "reply".to_string(),
                payload: b"1".to_vec(),
            }])
            .await;
        conn.publish("req", b"").await.unwrap();
        assert_eq!(
            conn.next_event().await,
            Some(ConnectionEvent::Message {
                topic: "reply".to_string(),
                payload: b"1".to_vec(),
            })
        );
    }

    #[tokio::test]
    async fn transport_hands_out_scripted_connections() {
        let (conn, _handle) = MockConnection::connected();
        let transport = MockTransport::new(conn);
        let endpoint = Endpoint::new("example.com", 8883);
        let credentials = Credentials {
            client_id: "dev".to_string(),
            username: "user".to_string(),
            private_key: vec![],
            client_cert: vec![],
            ca_cert: vec![],
        };
        assert!(transport.connect(&endpoint, &credentials).await.is_ok());
        assert!(transport.connect(&endpoint, &credentials).await.is_err());
        assert_eq!(transport.connects().await.len(), 2);
    }
}
