//! EC2-describe and autoscaling-group back-ends for
//! [`device-pool`](device_pool).
//!
//! Neither back-end owns a fixed inventory. The EC2-describe side resolves
//! reservations that carry instance ids into reachable [`device_pool::Host`]
//! coordinates; the autoscaling side provisions by detaching instances from a
//! group, growing it first when it is short.
//!
//! Cloud RPCs happen through the narrow [`client`] interfaces so that any SDK
//! (or a test double) can be injected at construction time.

pub mod autoscaling;
pub mod client;
pub mod ec2;

pub use crate::{
    autoscaling::AutoscalingDevicePool,
    client::{AutoscalingApi, AutoscalingGroup, Ec2Api, Ec2Instance, GroupInstance, LifecycleState},
    ec2::{Ec2ReservationService, HostMapping},
};
