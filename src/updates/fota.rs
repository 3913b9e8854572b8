//! Simulated firmware-over-the-air update workflow
//!
//! Two-phase and time-driven: a desired `firmware.fwVersion` immediately
//! reports a `downloading` transition, and after a fixed simulated delay the
//! device reports `current` with the new version installed. There is no
//! cancellation; a new target while a download is pending restarts the timer
//! and overwrites the pending version.

use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Simulated download time, matching the firmware-update tutorial cadence.
pub const SIMULATED_DOWNLOAD_SECS: u64 = 10;

#[derive(Debug, Clone)]
struct PendingDownload {
    version: String,
    deadline: Instant,
}

/// Firmware update state machine: idle, or downloading towards a deadline.
#[derive(Debug)]
pub struct FotaSimulator {
    current_version: String,
    pending: Option<PendingDownload>,
    delay: Duration,
}

impl FotaSimulator {
    pub fn new(current_version: impl Into<String>) -> Self {
        Self {
            current_version: current_version.into(),
            pending: None,
            delay: Duration::from_secs(SIMULATED_DOWNLOAD_SECS),
        }
    }

    /// Override the simulated download delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    /// Begin (or restart) a simulated download from a desired `firmware`
    /// object. Returns the immediate `downloading` report, or `None` when the
    /// object names no target version.
    pub fn start(&mut self, firmware: &Value) -> Option<Value> {
        let target = firmware.get("fwVersion")?.as_str()?.to_string();
        info!(target = %target, "starting simulated firmware download");
        let report = json!({
            "firmware": {
                "currentFwVersion": self.current_version,
                "pendingFwVersion": target,
                "status": "downloading",
            },
        });
        self.pending = Some(PendingDownload {
            version: target,
            deadline: Instant::now() + self.delay,
        });
        Some(report)
    }

    /// Deadline of the pending download, if one is in flight.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Complete the pending download: the target becomes the running version
    /// and the `current` report is returned.
    pub fn complete(&mut self) -> Option<Value> {
        let pending = self.pending.take()?;
        self.current_version = pending.version;
        info!(version = %self.current_version, "simulated firmware download complete");
        Some(json!({
            "firmware": {
                "currentFwVersion": self.current_version,
                "pendingFwVersion": self.current_version,
                "status": "current",
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_reports_downloading_with_pending_target() {
        let mut fota = FotaSimulator::new("1.0.0");
        let report = fota.start(&json!({"fwVersion": "2.0.0"})).unwrap();
        assert_eq!(report["firmware"]["status"], "downloading");
        assert_eq!(report["firmware"]["currentFwVersion"], "1.0.0");
        assert_eq!(report["firmware"]["pendingFwVersion"], "2.0.0");
        assert!(fota.deadline().is_some());
    }

    #[test]
    fn complete_reports_current_with_the_new_version() {
        let mut fota = FotaSimulator::new("1.0.0");
        fota.start(&json!({"fwVersion": "2.0.0"})).unwrap();
        let report = fota.complete().unwrap();
        assert_eq!(report["firmware"]["status"], "current");
        assert_eq!(report["firmware"]["currentFwVersion"], "2.0.0");
        assert_eq!(report["firmware"]["pendingFwVersion"], "2.0.0");
        assert_eq!(fota.current_version(), "2.0.0");
        // Back to idle
        assert!(fota.deadline().is_none());
        assert!(fota.complete().is_none());
    }

    #[test]
    fn a_new_target_restarts_and_overwrites_the_pending_download() {
        let mut fota = FotaSimulator::new("1.0.0").with_delay(Duration::from_secs(30));
        fota.start(&json!({"fwVersion": "2.0.0"})).unwrap();
        let first_deadline = fota.deadline().unwrap();
        let report = fota.start(&json!({"fwVersion": "3.0.0"})).unwrap();
        assert_eq!(report["firmware"]["pendingFwVersion"], "3.0.0");
        assert!(fota.deadline().unwrap() >= first_deadline);
        let done = fota.complete().unwrap();
        assert_eq!(done["firmware"]["currentFwVersion"], "3.0.0");
    }

    #[test]
    fn firmware_object_without_a_target_is_ignored() {
        let mut fota = FotaSimulator::new("1.0.0");
        assert!(fota.start(&json!({"status": "current"})).is_none());
        assert!(fota.start(&json!({"fwVersion": 7})).is_none());
        assert!(fota.deadline().is_none());
    }
}
