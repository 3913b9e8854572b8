//! Device-twin synchronization engine
//!
//! Owns the long-lived hub connection: requests the twin snapshot once at
//! startup, merges desired configuration into [`DeviceConfig`], republishes
//! reported state, and drives the FOTA and ADU workflows from desired-state
//! notifications. All mutable state lives inside the engine and is touched
//! only by its own event loop.
//!
//! Received topics are classified in a fixed priority order: twin-snapshot
//! response, reported-state acks (ignored), desired-state updates, then a
//! fallback that forwards the message to the presentation channel.

use crate::protocol::{hub, PropertyBag};
use crate::report;
use crate::settings::DeviceConfig;
use crate::transport::{Connection, ConnectionEvent, TransportError};
use crate::updates::{adu, FotaSimulator};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Twin synchronization failures. Transport errors are fatal for the loop;
/// workflow dispatch errors are logged and absorbed.
#[derive(Debug, Error)]
pub enum TwinError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed twin payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A message the engine does not interpret, forwarded verbatim to an
/// external presentation collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationEvent {
    pub topic: String,
    pub payload: Vec<u8>,
}

enum Step {
    Event(Option<ConnectionEvent>),
    FotaComplete(Value),
}

/// The twin synchronization engine. Generic over the connection so tests can
/// drive it with a scripted broker.
pub struct TwinEngine<C: Connection> {
    conn: C,
    device_id: String,
    config: DeviceConfig,
    fota: FotaSimulator,
    cell_id: u32,
    twin_request_id: String,
    presentation: Option<mpsc::Sender<PresentationEvent>>,
}

impl<C: Connection> TwinEngine<C> {
    pub fn new(conn: C, device_id: impl Into<String>, cell_id: u32) -> Self {
        Self {
            conn,
            device_id: device_id.into(),
            config: DeviceConfig::default(),
            fota: FotaSimulator::new(report::FIRMWARE_VERSION),
            cell_id,
            twin_request_id: Uuid::new_v4().to_string(),
            presentation: None,
        }
    }

    /// Attach the channel unmatched messages are forwarded on.
    pub fn with_presentation(mut self, tx: mpsc::Sender<PresentationEvent>) -> Self {
        self.presentation = Some(tx);
        self
    }

    /// Override the simulated firmware download delay.
    pub fn with_fota_delay(mut self, delay: Duration) -> Self {
        self.fota = FotaSimulator::new(report::FIRMWARE_VERSION).with_delay(delay);
        self
    }

    /// Correlation id of the startup twin-snapshot request.
    pub fn twin_request_id(&self) -> &str {
        &self.twin_request_id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Run the synchronization loop until the connection fails.
    pub async fn run(&mut self) -> Result<(), TwinError> {
        self.conn.subscribe(hub::TWIN_RESPONSES).await?;
        self.conn.subscribe(hub::DESIRED_UPDATES).await?;
        // Assistance-data responses arrive on device-scoped topics and are
        // handled by the presentation collaborator, not the engine.
        self.conn.subscribe(&hub::agps(&self.device_id)).await?;
        self.conn.subscribe(&hub::pgps(&self.device_id)).await?;

        let get_topic = hub::get_twin(&self.twin_request_id);
        info!(device_id = %self.device_id, topic = %get_topic, "requesting twin snapshot");
        self.conn.publish(&get_topic, b"").await?;

        loop {
            let step = tokio::select! {
                event = self.conn.next_event() => Step::Event(event),
                Some(completed) = fota_tick(&mut self.fota) => Step::FotaComplete(completed),
            };
            match step {
                Step::Event(None) => return Err(TransportError::Closed.into()),
                Step::Event(Some(ConnectionEvent::Connected)) => {
                    debug!(device_id = %self.device_id, "hub connection acknowledged");
                }
                Step::Event(Some(ConnectionEvent::Message { topic, payload })) => {
                    self.handle_message(&topic, &payload).await?;
                }
                Step::Event(Some(ConnectionEvent::Error(e))) => {
                    return Err(TransportError::ConnectionError(e).into());
                }
                Step::FotaComplete(completed) => {
                    self.publish_reported(&completed).await?;
                }
            }
        }
    }

    async fn handle_message(&mut self, topic: &str, payload: &[u8]) -> Result<(), TwinError> {
        // Snapshot response to the startup twin request
        if topic == hub::twin_response(200, &self.twin_request_id) {
            let Some(twin) = parse_payload(topic, payload) else {
                return Ok(());
            };
            let desired = twin.get("desired").cloned().unwrap_or(Value::Null);
            info!("received twin snapshot");
            self.apply_config(desired.get("cfg").unwrap_or(&Value::Null))
                .await?;
            // An update action may already be pending in the snapshot
            self.dispatch_adu(&desired).await?;
            return Ok(());
        }

        // Reported-state acks are observed but intentionally ignored
        if hub::is_reported_ack(topic) {
            debug!(topic, "reported-state update acknowledged");
            return Ok(());
        }

        if hub::is_desired_update(topic) {
            let Some(desired) = parse_payload(topic, payload) else {
                return Ok(());
            };
            if let Some(cfg) = desired.get("cfg") {
                self.apply_config(cfg).await?;
            }
            if let Some(firmware) = desired.get("firmware") {
                if let Some(started) = self.fota.start(firmware) {
                    self.publish_reported(&started).await?;
                }
            }
            // An update action may coexist with a config change
            self.dispatch_adu(&desired).await?;
            return Ok(());
        }

        self.forward(topic, payload).await;
        Ok(())
    }

    /// Merge a desired configuration delta and republish the full reported
    /// document.
    async fn apply_config(&mut self, delta: &Value) -> Result<(), TwinError> {
        self.config.merge(delta);
        info!(config = %self.config.as_value(), "configuration updated");
        let document = report::reported_document(&self.config, self.cell_id);
        self.publish_reported(&document).await
    }

    /// Run one ADU dispatch. Manifest failures abort the dispatch, not the
    /// subscription loop.
    async fn dispatch_adu(&mut self, desired: &Value) -> Result<(), TwinError> {
        match adu::dispatch(desired) {
            Ok(Some(document)) => self.publish_reported(&document).await,
            Ok(None) => Ok(()),
            Err(e) => {
                error!(error = %e, "device update dispatch failed");
                Ok(())
            }
        }
    }

    /// Publish a reported-state document with a fresh correlation id.
    /// Fire-and-forget: the ack is never awaited and no retry is performed.
    pub async fn publish_reported(&mut self, document: &Value) -> Result<(), TwinError> {
        let request_id = Uuid::new_v4().to_string();
        let topic = hub::update_reported(&request_id);
        debug!(topic = %topic, "publishing reported state");
        let payload = serde_json::to_vec(document)?;
        self.conn.publish(&topic, &payload).await?;
        Ok(())
    }

    /// Publish a device-to-cloud message with an optional property bag.
    pub async fn send_message(
        &mut self,
        properties: &PropertyBag,
        payload: &[u8],
    ) -> Result<(), TwinError> {
        let topic = hub::messages(&self.device_id, properties);
        self.conn.publish(&topic, payload).await?;
        Ok(())
    }

    /// Publish a batched device-to-cloud message.
    pub async fn send_batch(&mut self, payload: &[u8]) -> Result<(), TwinError> {
        let topic = hub::batch(&self.device_id);
        self.conn.publish(&topic, payload).await?;
        Ok(())
    }

    async fn forward(&mut self, topic: &str, payload: &[u8]) {
        let Some(tx) = &self.presentation else {
            debug!(topic, "ignoring message on unhandled topic");
            return;
        };
        let event = PresentationEvent {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        if tx.send(event).await.is_err() {
            warn!(topic, "presentation channel closed, dropping message");
        }
    }
}

/// Parse a twin payload, swallowing malformed documents. The service is the
/// source of truth for twin state; a garbled message must not take the
/// subscription down.
fn parse_payload(topic: &str, payload: &[u8]) -> Option<Value> {
    match serde_json::from_slice(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(topic, error = %e, "discarding malformed twin payload");
            None
        }
    }
}

/// Resolves when the pending firmware download completes; pending-less
/// engines leave the select branch disabled.
async fn fota_tick(fota: &mut FotaSimulator) -> Option<Value> {
    let deadline: Instant = fota.deadline()?;
    tokio::time::sleep_until(deadline).await;
    fota.complete()
}
