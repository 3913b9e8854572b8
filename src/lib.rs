//! Azure IoT Hub device simulator
//!
//! Simulates a single device end to end:
//! - provisions against the Device Provisioning Service over MQTT and
//!   persists the assigned-hub registration for reuse,
//! - synchronizes the device twin (config merges, reported-state updates),
//! - runs the simulated firmware (FOTA) and device-update-agent (ADU)
//!   workflows driven by desired-state payloads.
//!
//! The protocol state machines are written against the transport traits in
//! [`transport`], so tests drive them with the scripted broker from
//! [`testing`] while the binary injects the rumqttc client.

pub mod error;
pub mod identity;
pub mod logging;
pub mod protocol;
pub mod provision;
pub mod report;
pub mod settings;
pub mod simulator;
pub mod testing;
pub mod transport;
pub mod twin;
pub mod updates;

pub use error::{SimulatorError, SimulatorResult};
pub use identity::{DeviceIdentity, IdentityFile, RegistrationState};
pub use protocol::PropertyBag;
pub use provision::{provision, ProvisionError};
pub use settings::DeviceConfig;
pub use transport::{Connection, ConnectionEvent, Transport};
pub use twin::{PresentationEvent, TwinEngine, TwinError};
