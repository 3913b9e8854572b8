//! Device Provisioning Service registration state machine
//!
//! Runs once at startup over a dedicated MQTT session:
//! `Connecting -> Registering -> Polling -> {Assigned | Rejected | ProtocolError}`.
//! Response status codes arrive embedded in topic names, not payload fields,
//! so classification is a prefix test against the status-parameterized
//! response template. The session is closed on every terminal path and never
//! reused for device traffic.
//!
//! See <https://docs.microsoft.com/en-us/azure/iot-dps/iot-dps-mqtt-support>.

use crate::identity::{DeviceIdentity, RegistrationState};
use crate::protocol::dps;
use crate::transport::{Connection, ConnectionEvent, Credentials, Endpoint, Transport, TransportError};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Global provisioning endpoint.
pub const DPS_HOST: &str = "global.azure-devices-provisioning.net";
pub const DPS_PORT: u16 = 8883;

/// Poll delay used when a 202 response carries no usable `retry-after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

/// Provisioning failures. All are fatal; restarting the whole operation is
/// the caller's responsibility.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Status 401: the service rejected the device's credentials.
    #[error("connection forbidden: {message}")]
    Rejected { message: String },
    /// A response arrived on a topic matching no recognized status prefix.
    #[error("unexpected message on topic {topic}")]
    UnexpectedTopic { topic: String },
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed provisioning payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// 202 response payload: the registration operation is still processing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationOperationStatus {
    operation_id: String,
    status: String,
}

/// 200 response payload carrying the final registration state.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationResult {
    status: String,
    registration_state: RegistrationState,
}

/// 401 response payload.
#[derive(Debug, Deserialize)]
struct RejectionMessage {
    #[serde(default)]
    message: String,
}

/// Register the device against the provisioning service and resolve its
/// assigned hub.
pub async fn provision<T: Transport>(
    transport: &T,
    identity: &DeviceIdentity,
) -> Result<RegistrationState, ProvisionError> {
    let endpoint = Endpoint::new(DPS_HOST, DPS_PORT);
    let credentials = Credentials {
        client_id: identity.device_id.clone(),
        username: dps::username(&identity.id_scope, &identity.device_id),
        private_key: identity.private_key.clone(),
        client_cert: identity.client_cert.clone(),
        ca_cert: identity.ca_cert.clone(),
    };

    info!(host = DPS_HOST, id_scope = %identity.id_scope, "connecting to provisioning service");
    let mut conn = transport.connect(&endpoint, &credentials).await?;

    let result = register(&mut conn, &identity.device_id).await;

    // The provisioning session is never reused for device traffic.
    if let Err(e) = conn.close().await {
        warn!(error = %e, "failed to close provisioning session");
    }
    if let Ok(registration) = &result {
        info!(hub = %registration.assigned_hub, "device registration succeeded");
    }
    result
}

async fn register<C: Connection>(
    conn: &mut C,
    device_id: &str,
) -> Result<RegistrationState, ProvisionError> {
    // Subscribe before publishing anything: responses may otherwise arrive
    // with nothing listening.
    conn.subscribe(dps::REGISTRATION_RESPONSES).await?;

    let mut last_request_id: Option<String> = None;

    loop {
        let event = conn
            .next_event()
            .await
            .ok_or(TransportError::Closed)?;
        match event {
            ConnectionEvent::Connected => {
                info!(device_id, "connected, publishing register request");
                let request_id = Uuid::new_v4().to_string();
                let payload = serde_json::to_vec(&json!({ "registrationId": device_id }))?;
                conn.publish(&dps::register(&request_id), &payload).await?;
                last_request_id = Some(request_id);
            }
            ConnectionEvent::Message { topic, payload } => {
                check_correlation(&topic, last_request_id.as_deref());
                if topic.starts_with(&dps::registration_result(202)) {
                    let operation: RegistrationOperationStatus =
                        serde_json::from_slice(&payload)?;
                    let retry_after = retry_after_secs(&topic);
                    info!(
                        status = %operation.status,
                        retry_after,
                        "registration pending, polling for the result"
                    );
                    tokio::time::sleep(Duration::from_secs(retry_after)).await;
                    let request_id = Uuid::new_v4().to_string();
                    conn.publish(
                        &dps::operation_status(&request_id, &operation.operation_id),
                        b"",
                    )
                    .await?;
                    last_request_id = Some(request_id);
                } else if topic.starts_with(&dps::registration_result(200)) {
                    let result: RegistrationResult = serde_json::from_slice(&payload)?;
                    info!(status = %result.status, hub = %result.registration_state.assigned_hub, "assigned");
                    return Ok(result.registration_state);
                } else if topic.starts_with(&dps::registration_result(401)) {
                    let rejection: RejectionMessage = serde_json::from_slice(&payload)?;
                    warn!(message = %rejection.message, "credentials rejected");
                    return Err(ProvisionError::Rejected {
                        message: rejection.message,
                    });
                } else {
                    return Err(ProvisionError::UnexpectedTopic { topic });
                }
            }
            ConnectionEvent::Error(e) => {
                return Err(TransportError::ConnectionError(e).into());
            }
        }
    }
}

/// Server-proposed poll delay embedded in the 202 response topic.
fn retry_after_secs(topic: &str) -> u64 {
    dps::response_properties(topic)
        .get("retry-after")
        .flatten()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// Responses are matched by status prefix, not correlation id; a mismatched
/// id is logged and tolerated because the service does not echo it reliably.
fn check_correlation(topic: &str, last_request_id: Option<&str>) {
    let Some(expected) = last_request_id else {
        return;
    };
    if let Some(Some(rid)) = dps::response_properties(topic).get("$rid") {
        if rid != expected {
            debug!(received = rid, expected, "response correlation id mismatch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_falls_back_to_one_second() {
        assert_eq!(retry_after_secs("$dps/registrations/res/202/?$rid=x"), 1);
        assert_eq!(
            retry_after_secs("$dps/registrations/res/202/?$rid=x&retry-after=oops"),
            1
        );
        assert_eq!(
            retry_after_secs("$dps/registrations/res/202/?$rid=x&retry-after=7"),
            7
        );
    }
}
