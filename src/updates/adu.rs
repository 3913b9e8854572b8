//! Simulated device-update-agent (ADU) workflow
//!
//! The device-update service drives the agent through integer action codes
//! in the desired payload's `azureDeviceUpdateAgent.service` object. The
//! codes are a flat enumeration, not a sequence; dispatch branches on the
//! exact value and keeps no state between dispatches beyond what is echoed
//! back as reported properties.
//!
//! See <https://docs.microsoft.com/en-us/azure/iot-hub-device-update/device-update-plug-and-play>.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

/// Service-issued update actions.
pub mod action {
    pub const DOWNLOAD: i64 = 0;
    pub const INSTALL: i64 = 1;
    pub const APPLY: i64 = 2;
    pub const ABORT: i64 = 255;
}

/// Agent client states reported back to the service.
pub mod client_state {
    pub const IDLE: i64 = 0;
    pub const DOWNLOAD_SUCCEEDED: i64 = 2;
    pub const INSTALL_SUCCEEDED: i64 = 4;
}

/// Dispatch failures. Fatal for the dispatch only; the synchronization loop
/// logs them and keeps running.
#[derive(Debug, Error)]
pub enum AduError {
    #[error("update manifest missing from service action")]
    MissingManifest,
    #[error("malformed update manifest: {0}")]
    MalformedManifest(#[source] serde_json::Error),
}

/// Run one dispatch against a full desired payload.
///
/// Returns the reported-state document to publish, or `None` when the
/// payload carries no service action or an unrecognized action code.
pub fn dispatch(desired: &Value) -> Result<Option<Value>, AduError> {
    let Some(service) = desired.pointer("/azureDeviceUpdateAgent/service") else {
        return Ok(None);
    };
    let Some(code) = service.get("action").and_then(Value::as_i64) else {
        return Ok(None);
    };

    match code {
        action::DOWNLOAD => {
            info!("downloading update");
            if let Some(urls) = service.get("fileUrls").and_then(Value::as_object) {
                for url in urls.values() {
                    info!(url = %url, "update file");
                }
            }
            Ok(Some(client_report(json!({
                "state": client_state::DOWNLOAD_SUCCEEDED,
            }))))
        }
        action::INSTALL => {
            info!("installing update");
            let manifest = parse_manifest(service)?;
            let mut client = json!({ "state": client_state::INSTALL_SUCCEEDED });
            // A manifest without an update id reports no installed id at all
            if let Some(update_id) = manifest.get("updateId") {
                let installed_update_id =
                    serde_json::to_string(update_id).map_err(AduError::MalformedManifest)?;
                client["installedUpdateId"] = json!(installed_update_id);
            }
            Ok(Some(client_report(client)))
        }
        action::APPLY => {
            info!("applying update");
            let manifest = parse_manifest(service)?;
            let mut report = client_report(json!({ "state": client_state::IDLE }));
            report["deviceInformation"] = json!({
                "swVersion": manifest["installedCriteria"],
            });
            Ok(Some(report))
        }
        action::ABORT => {
            info!("aborting update");
            Ok(Some(client_report(json!({
                "state": client_state::IDLE,
                "installedUpdateId": Value::Null,
            }))))
        }
        other => {
            info!(action = other, "ignoring unknown update action");
            Ok(None)
        }
    }
}

/// The update manifest arrives as a JSON document embedded in a string field.
fn parse_manifest(service: &Value) -> Result<Value, AduError> {
    let raw = service
        .get("updateManifest")
        .and_then(Value::as_str)
        .ok_or(AduError::MissingManifest)?;
    serde_json::from_str(raw).map_err(AduError::MalformedManifest)
}

fn client_report(client: Value) -> Value {
    json!({ "azureDeviceUpdateAgent": { "client": client } })
}
