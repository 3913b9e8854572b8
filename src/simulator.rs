//! Simulator startup wiring
//!
//! Connects the device to its IoT Hub: reuse the persisted registration when
//! the identity file carries one, otherwise run the provisioning handshake
//! and write the result back. The resolved hub then hosts the long-lived
//! twin synchronization session.

use crate::error::SimulatorResult;
use crate::identity::IdentityFile;
use crate::protocol::hub;
use crate::provision::provision;
use crate::report;
use crate::transport::{Credentials, Endpoint, Transport};
use crate::twin::{PresentationEvent, TwinEngine};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{info, warn};

const HUB_PORT: u16 = 8883;
const PRESENTATION_CHANNEL_CAPACITY: usize = 16;

/// Run the simulator until its hub connection fails.
pub async fn run<T: Transport>(
    transport: &T,
    identity_path: &Path,
    cell_id: Option<u32>,
) -> SimulatorResult<()> {
    let mut file = IdentityFile::load(identity_path)?;
    let identity = file.device_identity();

    let registration = match &file.registration {
        Some(registration) => {
            info!(hub = %registration.assigned_hub, "reusing persisted registration");
            registration.clone()
        }
        None => provision(transport, &identity).await?,
    };

    // Persist the resolved registration, merged with the original fields,
    // whenever it differs from what was supplied.
    if file.registration.as_ref() != Some(&registration) {
        file.registration = Some(registration.clone());
        file.save(identity_path)?;
        info!(path = %identity_path.display(), "registration information written");
    }

    let endpoint = Endpoint::new(&registration.assigned_hub, HUB_PORT);
    let credentials = Credentials {
        client_id: identity.device_id.clone(),
        username: hub::username(
            &registration.assigned_hub,
            &identity.device_id,
            report::MODEL_ID,
        ),
        private_key: identity.private_key.clone(),
        client_cert: identity.client_cert.clone(),
        ca_cert: identity.ca_cert.clone(),
    };

    info!(hub = %registration.assigned_hub, device_id = %identity.device_id, model_id = report::MODEL_ID, "connecting to hub");
    let conn = transport.connect(&endpoint, &credentials).await?;

    let (presentation_tx, mut presentation_rx) =
        mpsc::channel::<PresentationEvent>(PRESENTATION_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(event) = presentation_rx.recv().await {
            info!(
                topic = %event.topic,
                payload = %String::from_utf8_lossy(&event.payload),
                "unhandled message"
            );
        }
    });

    let cell_id = cell_id.unwrap_or(report::DEFAULT_CELL_ID);
    if cell_id != report::DEFAULT_CELL_ID {
        info!(cell_id, "simulating a non-default radio cell");
    }

    let mut engine =
        TwinEngine::new(conn, identity.device_id, cell_id).with_presentation(presentation_tx);
    let result = engine.run().await;
    warn!("twin synchronization loop ended");
    result.map_err(Into::into)
}
