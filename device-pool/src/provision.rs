//! Provision and reservation data model.
//!
//! A provision is a request for N devices identified by a caller-chosen id; a
//! [`Reservation`] is that provision's claim on one specific device. Outputs
//! move through the status DAG `Requested -> Provisioning -> {Succeeded,
//! Failed}`, never backwards.

use std::fmt;

use faststr::FastStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Requested,
    Provisioning,
    Succeeded,
    Failed,
    Canceled,
}

impl Status {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Succeeded | Status::Failed | Status::Canceled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Requested => "REQUESTED",
            Status::Provisioning => "PROVISIONING",
            Status::Succeeded => "SUCCEEDED",
            Status::Failed => "FAILED",
            Status::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// One provision's claim on one specific device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub device_id: FastStr,
    pub status: Status,
}

impl Reservation {
    pub fn new(device_id: impl Into<FastStr>, status: Status) -> Self {
        Self {
            device_id: device_id.into(),
            status,
        }
    }

    pub fn succeeded(device_id: impl Into<FastStr>) -> Self {
        Self::new(device_id, Status::Succeeded)
    }

    pub fn provisioning(device_id: impl Into<FastStr>) -> Self {
        Self::new(device_id, Status::Provisioning)
    }
}

/// A request for `amount` devices. The `id` is the idempotency key: repeated
/// calls with the same id observe the same provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionInput {
    pub id: FastStr,
    pub amount: usize,
}

impl ProvisionInput {
    pub fn new(id: impl Into<FastStr>, amount: usize) -> Self {
        Self {
            id: id.into(),
            amount,
        }
    }
}

/// Snapshot of one provision.
///
/// Invariants, holding at every stable point:
/// - `Succeeded` implies one `Succeeded` reservation per requested device;
/// - `Provisioning` implies at most `amount` reservations;
/// - `Requested` implies no reservations yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutput {
    pub id: FastStr,
    pub status: Status,
    pub reservations: Vec<Reservation>,
    pub message: Option<FastStr>,
}

impl ProvisionOutput {
    pub(crate) fn requested(id: FastStr) -> Self {
        Self {
            id,
            status: Status::Requested,
            reservations: Vec::new(),
            message: None,
        }
    }

    pub fn succeeded_reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations
            .iter()
            .filter(|r| r.status == Status::Succeeded)
    }
}
