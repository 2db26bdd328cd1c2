//! Device pool is a control plane that hands out temporary, exclusive leases on
//! a fleet of remote compute hosts (lab machines, cloud instances, loopback
//! hosts), so that callers can obtain one or more devices, run shell commands
//! over a connection and transfer files to and from them.
//!
//! The crate decouples four concerns:
//!
//! - *provisioning*: selecting or producing devices for a request, see
//!   [`ProvisionService`];
//! - *reservation exchange*: mapping a reserved device id to reachable host
//!   coordinates, see [`ReservationService`];
//! - *connection*: establishing a command channel, see
//!   [`connection::ConnectionFactory`];
//! - *content transfer*: moving files, see
//!   [`connection::ContentTransferAgentFactory`].
//!
//! [`pool::LocalDevicePool`] is the in-process implementation backed by a fixed
//! set of hosts. Cloud-backed implementations plug their own allocation
//! strategy into the same machinery through [`pool::Allocate`].

pub mod connection;
pub mod device;
pub mod error;
pub mod host;
pub mod inventory;
pub mod ledger;
pub mod pool;
pub mod provision;
pub mod service;

pub use faststr::FastStr;

pub use crate::{
    device::{Device, DevicePool},
    error::{BoxError, ProvisioningError, ReservationError, Result},
    host::{Arch, Host, Os, Platform},
    pool::{LocalDevicePool, PoolConfig},
    provision::{ProvisionInput, ProvisionOutput, Reservation, Status},
    service::{ProvisionService, ReservationService},
};
