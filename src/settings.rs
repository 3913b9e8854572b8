//! Simulated device configuration
//!
//! The tunables mirror the asset-tracker firmware's `cfg` twin object.
//! Desired-state deltas are merged by shallow key-overwrite; keys the
//! simulator does not know about are kept and reported back unchanged.

use serde::Serialize;
use serde_json::{json, Map, Value};

/// Flat map of simulation parameters, seeded with the documented defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DeviceConfig {
    values: Map<String, Value>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let defaults = json!({
            // Whether to enable the active mode
            "act": false,
            // Active mode: seconds to wait before sending the next update
            "actwt": 60,
            // Passive mode: seconds to wait after movement before the next update
            "mvres": 300,
            // Passive mode: send an update at least this often (seconds)
            "mvt": 3600,
            // GPS fix timeout (seconds)
            "gpst": 60,
            // Accelerometer activity threshold (m/s²)
            "accath": 10.5,
            // Accelerometer inactivity threshold (m/s²)
            "accith": 5.2,
            // Accelerometer inactivity timeout (seconds)
            "accito": 1.7,
        });
        let Value::Object(values) = defaults else {
            unreachable!("defaults are an object literal")
        };
        Self { values }
    }
}

impl DeviceConfig {
    /// Shallow key-overwrite merge of a desired `cfg` delta. Non-object
    /// deltas are ignored; the merge is never partially applied.
    pub fn merge(&mut self, delta: &Value) {
        if let Value::Object(delta) = delta {
            for (key, value) in delta {
                self.values.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_firmware_documentation() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.get("act"), Some(&json!(false)));
        assert_eq!(cfg.get("actwt"), Some(&json!(60)));
        assert_eq!(cfg.get("mvres"), Some(&json!(300)));
        assert_eq!(cfg.get("mvt"), Some(&json!(3600)));
        assert_eq!(cfg.get("gpst"), Some(&json!(60)));
        assert_eq!(cfg.get("accath"), Some(&json!(10.5)));
        assert_eq!(cfg.get("accith"), Some(&json!(5.2)));
        assert_eq!(cfg.get("accito"), Some(&json!(1.7)));
    }

    #[test]
    fn merge_overwrites_shallowly() {
        let mut cfg = DeviceConfig::default();
        cfg.merge(&json!({"act": true, "gpst": 120, "custom": "kept"}));
        assert_eq!(cfg.get("act"), Some(&json!(true)));
        assert_eq!(cfg.get("gpst"), Some(&json!(120)));
        assert_eq!(cfg.get("custom"), Some(&json!("kept")));
        // Untouched keys stay at their defaults
        assert_eq!(cfg.get("mvt"), Some(&json!(3600)));
    }

    #[test]
    fn merge_ignores_non_object_deltas() {
        let mut cfg = DeviceConfig::default();
        let before = cfg.clone();
        cfg.merge(&Value::Null);
        cfg.merge(&json!(42));
        assert_eq!(cfg, before);
    }

    #[test]
    fn serializes_as_a_flat_object() {
        let cfg = DeviceConfig::default();
        let value = serde_json::to_value(&cfg).unwrap();
        assert!(value.is_object());
        assert_eq!(value["mvres"], json!(300));
    }
}
