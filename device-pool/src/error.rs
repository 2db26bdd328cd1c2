use std::borrow::Cow;

use faststr::FastStr;
use thiserror::Error;

/// Opaque error produced by a back-end a pool delegates to.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = ProvisioningError> = std::result::Result<T, E>;

/// Errors surfaced by the provisioning half of a device pool.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("device pool is closed")]
    Closed,
    #[error("provision {0} not found")]
    NotFound(FastStr),
    #[error("provision {id} failed: {message}")]
    Failed { id: FastStr, message: FastStr },
    #[error("invalid input: {0}")]
    InvalidInput(Cow<'static, str>),
    #[error("provisioning backend error: {0:?}")]
    Backend(#[from] BoxError),
    #[error("reservation error: {0}")]
    Reservation(#[from] ReservationError),
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("content transfer error: {0}")]
    ContentTransfer(#[from] ContentTransferError),
}

/// Errors surfaced when exchanging a reservation for host coordinates.
#[derive(Error, Debug)]
pub enum ReservationError {
    #[error("no host found for device {0}")]
    NotFound(FastStr),
    #[error("reservation backend error: {0:?}")]
    Backend(#[from] BoxError),
    #[error("device pool is closed")]
    Closed,
}

/// Errors produced by a command channel to a device.
///
/// The pool core never opens connections itself; it only wraps these when a
/// collaborator fails while a caller obtains devices.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("failed to reach {0}: {1:?}")]
    Unreachable(FastStr, #[source] BoxError),
    #[error("command failed: {0}")]
    Command(Cow<'static, str>),
}

/// Errors produced by a content transfer agent.
#[derive(Error, Debug)]
pub enum ContentTransferError {
    #[error("transfer of {0} failed: {1:?}")]
    Transfer(FastStr, #[source] BoxError),
    #[error("staging error: {0}")]
    Staging(Cow<'static, str>),
}
