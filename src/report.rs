//! Reported-state document assembly
//!
//! Every config-triggered reported update carries the merged configuration
//! plus static device/roaming telemetry and the IoT Plug-and-Play model
//! identity blocks. The update workflows publish partial documents of the
//! same shape.

use crate::settings::DeviceConfig;
use serde_json::{json, Value};

/// Firmware version the simulated device boots with.
pub const FIRMWARE_VERSION: &str = "1.0.0";

/// Plug-and-Play model announced on the hub connection.
pub const MODEL_ID: &str = "dtmi:AzureDeviceUpdate;1";

pub const MANUFACTURER: &str = "Nordic-Semiconductor-ASA";
pub const MODEL: &str = "Device-Simulator";

/// Cell identifier reported when no `CELL_ID` override is supplied.
pub const DEFAULT_CELL_ID: u32 = 16_964_098;

/// Static device and roaming telemetry blocks.
pub fn device_and_roaming(cell_id: u32) -> Value {
    let now = chrono::Utc::now().timestamp_millis();
    json!({
        "dev": {
            "v": {
                "modV": "device-simulator",
                "brdV": "device-simulator",
                "iccid": "12345678901234567890",
                "imei": "352656106111232",
            },
            "ts": now,
        },
        "roam": {
            "v": {
                "band": 666,
                "nw": "LAN",
                "rsrp": -70,
                "area": 30401,
                "mccmnc": 24201,
                "cell": cell_id,
                "ip": "0.0.0.0",
            },
            "ts": now,
        },
        "firmware": {
            "status": "current",
            "currentFwVersion": FIRMWARE_VERSION,
            "pendingFwVersion": "",
        },
    })
}

/// Plug-and-Play component blocks: device information and the device-update
/// agent's initial client state. The `__t: "c"` markers flag component
/// objects for the hub.
pub fn model_identity() -> Value {
    json!({
        "deviceInformation": {
            "__t": "c",
            "manufacturer": MANUFACTURER,
            "model": MODEL,
            "swVersion": FIRMWARE_VERSION,
            "osName": std::env::consts::OS,
            "processorManufacturer": std::env::consts::ARCH,
            "totalStorage": 0,
            "totalMemory": 0,
        },
        "azureDeviceUpdateAgent": {
            "__t": "c",
            "client": {
                "resultCode": 200,
                "state": 0,
                "deviceProperties": {
                    "manufacturer": MANUFACTURER,
                    "model": MODEL,
                },
                "installedUpdateId": null,
            },
        },
    })
}

/// Full reported-state document published after every config merge:
/// `{cfg}` merged with the telemetry and model blocks.
pub fn reported_document(config: &DeviceConfig, cell_id: u32) -> Value {
    let mut doc = json!({ "cfg": config.as_value() });
    merge_objects(&mut doc, device_and_roaming(cell_id));
    merge_objects(&mut doc, model_identity());
    doc
}

fn merge_objects(target: &mut Value, source: Value) {
    if let (Value::Object(target), Value::Object(source)) = (target, source) {
        target.extend(source);
    }
}
