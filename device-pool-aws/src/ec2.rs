//! Reservation exchange over EC2 DescribeInstances.
//!
//! Reservations made by the cloud back-ends carry instance ids; this module
//! turns them into reachable [`Host`] coordinates and keeps in-flight
//! reservation statuses in step with the instance states the provider
//! reports.

use std::collections::HashMap;

use device_pool::{
    FastStr, Host, Platform, ProvisionOutput, ProvisioningError, Reservation, ReservationError,
    ReservationService, Status,
};

use crate::client::{Ec2Api, Ec2Instance, STATE_RUNNING, STATE_STOPPED, STATE_TERMINATED};

/// How described instances become hosts: which address to pick, which port
/// and platform to stamp on, and an optional jump host.
#[derive(Debug, Clone)]
pub struct HostMapping {
    platform: Platform,
    port: u16,
    proxy_jump: Option<FastStr>,
    use_private_ip: bool,
}

impl HostMapping {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            port: 22,
            proxy_jump: None,
            use_private_ip: false,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn proxy_jump(mut self, proxy_jump: impl Into<FastStr>) -> Self {
        self.proxy_jump = Some(proxy_jump.into());
        self
    }

    /// Addresses devices by their private ip, for callers inside the VPC.
    pub fn use_private_ip(mut self, use_private_ip: bool) -> Self {
        self.use_private_ip = use_private_ip;
        self
    }

    fn host(&self, instance: &Ec2Instance) -> Result<Host, ReservationError> {
        let address = if self.use_private_ip {
            &instance.private_ip
        } else {
            &instance.public_ip
        };
        let Some(address) = address else {
            return Err(ReservationError::NotFound(instance.instance_id.clone()));
        };
        let mut host = Host::new(
            instance.instance_id.clone(),
            address.clone(),
            self.port,
            self.platform,
        );
        if let Some(proxy_jump) = &self.proxy_jump {
            host = host.with_proxy_jump(proxy_jump.clone());
        }
        Ok(host)
    }
}

/// Maps an EC2 instance state code onto a reservation status: running is
/// ready, terminated or stopped is gone for good, anything else is still on
/// its way.
pub fn instance_status(state_code: i32) -> Status {
    match state_code {
        STATE_RUNNING => Status::Succeeded,
        STATE_TERMINATED | STATE_STOPPED => Status::Failed,
        _ => Status::Provisioning,
    }
}

/// Exchanges instance-id reservations through DescribeInstances.
pub struct Ec2ReservationService<C> {
    client: C,
    mapping: HostMapping,
}

impl<C: Ec2Api> Ec2ReservationService<C> {
    pub fn new(client: C, mapping: HostMapping) -> Self {
        Self { client, mapping }
    }

    /// Looks up the live state of every non-terminal reservation in
    /// `output`. Instances the provider no longer reports are failed.
    pub async fn refresh(
        &self,
        output: &ProvisionOutput,
    ) -> Result<HashMap<FastStr, Status>, ProvisioningError> {
        let pending: Vec<FastStr> = output
            .reservations
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.device_id.clone())
            .collect();
        if pending.is_empty() {
            return Ok(HashMap::new());
        }
        let described = self.client.describe_instances(&pending).await?;
        let codes: HashMap<FastStr, i32> = described
            .into_iter()
            .map(|i| (i.instance_id, i.state_code))
            .collect();
        let mut statuses = HashMap::with_capacity(pending.len());
        for instance_id in pending {
            let status = match codes.get(&instance_id) {
                Some(code) => instance_status(*code),
                None => {
                    tracing::warn!("instance {} disappeared from the provider", instance_id);
                    Status::Failed
                }
            };
            statuses.insert(instance_id, status);
        }
        Ok(statuses)
    }
}

impl<C: Ec2Api> ReservationService for Ec2ReservationService<C> {
    async fn exchange(&self, reservation: &Reservation) -> Result<Host, ReservationError> {
        let instances = self
            .client
            .describe_instances(std::slice::from_ref(&reservation.device_id))
            .await?;
        let instance = instances
            .into_iter()
            .find(|i| i.instance_id == reservation.device_id)
            .ok_or_else(|| ReservationError::NotFound(reservation.device_id.clone()))?;
        self.mapping.host(&instance)
    }
}

#[cfg(test)]
mod tests {
    use device_pool::{Arch, Os};
    use parking_lot::Mutex;

    use super::*;
    use crate::client::STATE_PENDING;

    #[derive(Default)]
    struct FakeEc2 {
        instances: Mutex<Vec<Ec2Instance>>,
    }

    impl FakeEc2 {
        fn with(instances: Vec<Ec2Instance>) -> Self {
            Self {
                instances: Mutex::new(instances),
            }
        }
    }

    impl Ec2Api for FakeEc2 {
        async fn describe_instances(
            &self,
            instance_ids: &[FastStr],
        ) -> Result<Vec<Ec2Instance>, device_pool::BoxError> {
            Ok(self
                .instances
                .lock()
                .iter()
                .filter(|i| instance_ids.contains(&i.instance_id))
                .cloned()
                .collect())
        }
    }

    fn running(id: &str, public_ip: Option<&str>, private_ip: Option<&str>) -> Ec2Instance {
        Ec2Instance {
            instance_id: FastStr::from(id.to_owned()),
            state_code: STATE_RUNNING,
            public_ip: public_ip.map(|ip| FastStr::from(ip.to_owned())),
            private_ip: private_ip.map(|ip| FastStr::from(ip.to_owned())),
        }
    }

    fn linux() -> Platform {
        Platform::new(Os::Linux, Arch::X86_64)
    }

    #[tokio::test]
    async fn test_exchange_maps_instance_to_host() {
        let service = Ec2ReservationService::new(
            FakeEc2::with(vec![running("i-1", Some("203.0.113.7"), Some("10.0.0.7"))]),
            HostMapping::new(linux()).proxy_jump("bastion.example.com"),
        );

        let host = service.exchange(&Reservation::succeeded("i-1")).await.unwrap();
        assert_eq!(host.device_id, "i-1");
        assert_eq!(host.host_name, "203.0.113.7");
        assert_eq!(host.port, 22);
        assert_eq!(host.proxy_jump.as_deref(), Some("bastion.example.com"));
    }

    #[tokio::test]
    async fn test_exchange_can_prefer_private_addresses() {
        let service = Ec2ReservationService::new(
            FakeEc2::with(vec![running("i-1", Some("203.0.113.7"), Some("10.0.0.7"))]),
            HostMapping::new(linux()).use_private_ip(true).port(2222),
        );

        let host = service.exchange(&Reservation::succeeded("i-1")).await.unwrap();
        assert_eq!(host.host_name, "10.0.0.7");
        assert_eq!(host.port, 2222);
    }

    #[tokio::test]
    async fn test_exchange_fails_for_unknown_or_addressless_instances() {
        let service = Ec2ReservationService::new(
            FakeEc2::with(vec![running("i-1", None, Some("10.0.0.7"))]),
            HostMapping::new(linux()),
        );

        assert!(matches!(
            service.exchange(&Reservation::succeeded("i-2")).await,
            Err(ReservationError::NotFound(_))
        ));
        // known instance, but no public address to map
        assert!(matches!(
            service.exchange(&Reservation::succeeded("i-1")).await,
            Err(ReservationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_maps_state_codes() {
        let mut i2 = running("i-2", None, None);
        i2.state_code = STATE_PENDING;
        let mut i3 = running("i-3", None, None);
        i3.state_code = STATE_STOPPED;
        let service = Ec2ReservationService::new(
            FakeEc2::with(vec![running("i-1", None, None), i2, i3]),
            HostMapping::new(linux()),
        );

        let output = ProvisionOutput {
            id: FastStr::from("p1"),
            status: Status::Provisioning,
            reservations: vec![
                Reservation::provisioning("i-1"),
                Reservation::provisioning("i-2"),
                Reservation::provisioning("i-3"),
                Reservation::provisioning("i-4"),
            ],
            message: None,
        };
        let statuses = service.refresh(&output).await.unwrap();
        assert_eq!(statuses[&FastStr::from("i-1")], Status::Succeeded);
        assert_eq!(statuses[&FastStr::from("i-2")], Status::Provisioning);
        assert_eq!(statuses[&FastStr::from("i-3")], Status::Failed);
        // the provider does not know i-4 at all
        assert_eq!(statuses[&FastStr::from("i-4")], Status::Failed);
    }

    #[tokio::test]
    async fn test_refresh_skips_terminal_reservations() {
        let service =
            Ec2ReservationService::new(FakeEc2::default(), HostMapping::new(linux()));
        let output = ProvisionOutput {
            id: FastStr::from("p1"),
            status: Status::Succeeded,
            reservations: vec![Reservation::succeeded("i-1")],
            message: None,
        };
        assert!(service.refresh(&output).await.unwrap().is_empty());
    }
}
