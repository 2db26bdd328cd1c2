//! Narrow client interfaces for the two cloud services the adapters talk to.
//!
//! These are the injection points for the real SDK clients; the adapters only
//! ever need the handful of calls below. Failures stay opaque
//! ([`BoxError`]) and are wrapped into provisioning or reservation errors by
//! the adapters, never swallowed.

use std::future::Future;

use device_pool::{BoxError, FastStr};

/// EC2 instance state codes, per the DescribeInstances wire contract.
pub const STATE_PENDING: i32 = 0;
pub const STATE_RUNNING: i32 = 16;
pub const STATE_TERMINATED: i32 = 48;
pub const STATE_STOPPED: i32 = 80;

/// One instance as reported by DescribeInstances, reduced to what host
/// mapping needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ec2Instance {
    pub instance_id: FastStr,
    pub state_code: i32,
    pub public_ip: Option<FastStr>,
    pub private_ip: Option<FastStr>,
}

pub trait Ec2Api: Send + Sync + 'static {
    /// Describes the given instances. Instances unknown to the provider are
    /// simply absent from the result, not an error.
    fn describe_instances(
        &self,
        instance_ids: &[FastStr],
    ) -> impl Future<Output = Result<Vec<Ec2Instance>, BoxError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    InService,
    Pending,
    /// Detaching, terminating, standby and everything else the adapters
    /// never select.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInstance {
    pub instance_id: FastStr,
    pub lifecycle_state: LifecycleState,
    pub healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoscalingGroup {
    pub desired_capacity: usize,
    pub instances: Vec<GroupInstance>,
}

pub trait AutoscalingApi: Send + Sync + 'static {
    fn describe_group(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<AutoscalingGroup, BoxError>> + Send;

    fn set_desired_capacity(
        &self,
        name: &str,
        capacity: usize,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;

    fn detach_instances(
        &self,
        name: &str,
        instance_ids: &[FastStr],
    ) -> impl Future<Output = Result<(), BoxError>> + Send;
}
