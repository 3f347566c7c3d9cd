//! Error taxonomy for the provisioning and relay paths
//!
//! Remote failures never crash the process; they resolve to one of these and
//! the session router decides the user-visible response. Unknown department
//! ids are not errors at all (`DepartmentRegistry::lookup` returns `Option`).

use crate::matrix::MatrixError;

/// Space or room creation failed. Fatal to the provisioning attempt,
/// retryable by re-selecting the department.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("no space configured for channel {0:?}")]
    UnknownChannel(String),

    #[error("space hierarchy resolution failed: {0}")]
    Space(String),

    #[error("room creation failed: {0}")]
    RoomCreation(#[from] MatrixError),
}

/// A message send failed. Reported to the caller; no automatic retry.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("message delivery failed: {0}")]
    Send(#[from] MatrixError),
}
