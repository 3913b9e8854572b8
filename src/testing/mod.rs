//! Testing utilities and mock implementations
//!
//! This module provides a scripted transport so the provisioning and twin
//! state machines can be tested without an MQTT broker.

pub mod mocks;

pub use mocks::*;
