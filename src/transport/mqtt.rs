//! MQTT implementation of the transport contract
//!
//! Both the provisioning service and IoT Hub speak MQTT 3.1.1 over TLS on
//! port 8883, authenticating the device with its client certificate. The
//! event loop runs in a spawned task and forwards broker events over a
//! channel; an event-loop failure is terminal for the session.

use super::{Connection, ConnectionEvent, Credentials, Endpoint, Transport, TransportError};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration,
    Transport as RumqttcTransport,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// MQTT transport factory. One instance serves both the short-lived
/// provisioning session and the long-lived hub session.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttClient;

impl MqttClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Conn = MqttConnection;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Self::Conn, TransportError> {
        let mut options = MqttOptions::new(&credentials.client_id, &endpoint.host, endpoint.port);
        options.set_credentials(&credentials.username, "");
        options.set_keep_alive(Duration::from_secs(60));

        let tls = TlsConfiguration::Simple {
            ca: credentials.ca_cert.clone(),
            alpn: None,
            client_auth: Some((
                credentials.client_cert.clone(),
                credentials.private_key.clone(),
            )),
        };
        options.set_transport(RumqttcTransport::Tls(tls));

        let (client, mut event_loop) = AsyncClient::new(options, 10);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let host = endpoint.host.clone();
        let handle = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        debug!(host = %host, "broker acknowledged connection");
                        if event_tx.send(ConnectionEvent::Connected).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let event = ConnectionEvent::Message {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        };
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(packet)) => {
                        trace!(?packet, "mqtt packet");
                    }
                    Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        warn!(host = %host, error = %e, "mqtt event loop error");
                        let _ = event_tx.send(ConnectionEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
        });

        Ok(MqttConnection {
            client,
            events: event_rx,
            event_loop_handle: handle,
        })
    }
}

/// One live MQTT session.
pub struct MqttConnection {
    client: AsyncClient,
    events: mpsc::Receiver<ConnectionEvent>,
    event_loop_handle: JoinHandle<()>,
}

#[async_trait]
impl Connection for MqttConnection {
    async fn subscribe(&mut self, topic_filter: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(topic_filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Best-effort disconnect; the event loop task is released either way.
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "disconnect after session end");
        }
        self.event_loop_handle.abort();
        Ok(())
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        self.event_loop_handle.abort();
    }
}
