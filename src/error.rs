//! Top-level error type for the simulator binary.

use crate::identity::IdentityError;
use crate::provision::ProvisionError;
use crate::transport::TransportError;
use crate::twin::TwinError;
use thiserror::Error;

/// Everything that can take the simulator down. All variants are fatal;
/// there is no automatic retry of a failed run.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("twin synchronization failed: {0}")]
    Twin(#[from] TwinError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type for simulator operations.
pub type SimulatorResult<T> = Result<T, SimulatorError>;
