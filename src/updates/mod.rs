//! Simulated update workflows driven by desired-state payloads.

pub mod adu;
pub mod fota;

pub use adu::AduError;
pub use fota::FotaSimulator;
