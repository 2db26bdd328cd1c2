//! Provisioning out of an autoscaling group.
//!
//! Devices are healthy `InService` instances detached from the group. When
//! the group is short, desired capacity is raised by the shortfall first and
//! the group is polled until enough instances exist; instances still
//! `Pending` at selection time surface as `Provisioning` reservations and are
//! upgraded later by describe refreshes against EC2.

use std::future::Future;

use device_pool::{
    pool::{Allocate, Pool, PoolConfig},
    FastStr, Host, ProvisionInput, ProvisionOutput, ProvisioningError, Reservation,
    ReservationError, ReservationService, Result, Status,
};
use tokio::time::Duration;

use crate::{
    client::{AutoscalingApi, Ec2Api, GroupInstance, LifecycleState},
    ec2::{Ec2ReservationService, HostMapping},
};

const POLL_BASE: Duration = Duration::from_millis(500);
const POLL_CAP: Duration = Duration::from_secs(8);
const POLL_ATTEMPTS: usize = 60;

struct AutoscalingAllocate<C> {
    client: C,
    group: FastStr,
}

impl<C: AutoscalingApi> AutoscalingAllocate<C> {
    fn usable(instance: &GroupInstance) -> bool {
        instance.healthy
            && matches!(
                instance.lifecycle_state,
                LifecycleState::InService | LifecycleState::Pending
            )
    }

    fn select(instances: &[GroupInstance], amount: usize) -> Vec<Reservation> {
        // ready instances first, so a partially grown group yields as many
        // usable devices as it can
        let (ready, pending): (Vec<_>, Vec<_>) = instances
            .iter()
            .filter(|i| Self::usable(i))
            .partition(|i| i.lifecycle_state == LifecycleState::InService);
        ready
            .into_iter()
            .chain(pending)
            .take(amount)
            .map(|i| match i.lifecycle_state {
                LifecycleState::InService => Reservation::succeeded(i.instance_id.clone()),
                _ => Reservation::provisioning(i.instance_id.clone()),
            })
            .collect()
    }
}

impl<C: AutoscalingApi> Allocate for AutoscalingAllocate<C> {
    async fn allocate(
        &self,
        input: &ProvisionInput,
    ) -> Result<Vec<Reservation>, ProvisioningError> {
        let group = self.client.describe_group(&self.group).await?;
        let prev = group.desired_capacity;
        let in_service = group
            .instances
            .iter()
            .filter(|i| i.healthy && i.lifecycle_state == LifecycleState::InService)
            .count();

        if in_service >= input.amount {
            let reservations = Self::select(&group.instances, input.amount);
            let ids: Vec<FastStr> = reservations.iter().map(|r| r.device_id.clone()).collect();
            self.client.detach_instances(&self.group, &ids).await?;
            // compensate the detach so the group does not immediately
            // replace the instances we just took
            self.client
                .set_desired_capacity(&self.group, prev.saturating_sub(input.amount))
                .await?;
            return Ok(reservations);
        }

        // grow by the shortfall, then wait for the capacity to show up
        let target = prev + (input.amount - in_service);
        tracing::info!(
            "growing autoscaling group {} from {} to {}",
            self.group,
            prev,
            target
        );
        self.client.set_desired_capacity(&self.group, target).await?;

        let mut delay = POLL_BASE;
        let mut attempt = 0;
        let reservations = loop {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(POLL_CAP);
            attempt += 1;
            let group = self.client.describe_group(&self.group).await?;
            let usable = group.instances.iter().filter(|i| Self::usable(i)).count();
            if usable >= input.amount {
                break Self::select(&group.instances, input.amount);
            }
            if attempt >= POLL_ATTEMPTS {
                return Err(ProvisioningError::Backend(
                    format!(
                        "autoscaling group {} has {usable} of {} usable instances after {attempt} polls",
                        self.group, input.amount
                    )
                    .into(),
                ));
            }
            tracing::debug!(
                "autoscaling group {} has {usable} of {} usable instances, polling again in {:?}",
                self.group,
                input.amount,
                delay
            );
        };

        let ids: Vec<FastStr> = reservations.iter().map(|r| r.device_id.clone()).collect();
        self.client.detach_instances(&self.group, &ids).await?;
        // the detach took the new instances with it; settle desired capacity
        // back where the group started
        self.client.set_desired_capacity(&self.group, prev).await?;
        Ok(reservations)
    }

    async fn reclaim(&self, _device_id: &FastStr) -> bool {
        // detached instances never rejoin the group; expiry and release only
        // drop the ledger entry
        false
    }
}

/// A device pool that provisions by detaching instances from one autoscaling
/// group and resolves reservations through EC2 DescribeInstances.
pub struct AutoscalingDevicePool<A: AutoscalingApi, E: Ec2Api> {
    pool: Pool<AutoscalingAllocate<A>>,
    reservations: Ec2ReservationService<E>,
}

impl<A: AutoscalingApi, E: Ec2Api> AutoscalingDevicePool<A, E> {
    pub fn new(
        autoscaling: A,
        ec2: E,
        group_name: impl Into<FastStr>,
        mapping: HostMapping,
        config: PoolConfig,
    ) -> Result<Self, ProvisioningError> {
        let group = group_name.into();
        if group.is_empty() {
            return Err(ProvisioningError::InvalidInput(
                "autoscaling group name is required".into(),
            ));
        }
        let pool = Pool::new(
            AutoscalingAllocate {
                client: autoscaling,
                group,
            },
            config,
        );
        Ok(Self {
            pool,
            reservations: Ec2ReservationService::new(ec2, mapping),
        })
    }
}

impl<A: AutoscalingApi, E: Ec2Api> device_pool::ProvisionService for AutoscalingDevicePool<A, E> {
    fn provision(
        &self,
        input: ProvisionInput,
    ) -> impl Future<Output = Result<ProvisionOutput>> + Send {
        self.pool.provision(input)
    }

    /// A plain ledger snapshot, upgraded against live instance states while
    /// the provision is still settling.
    async fn describe(&self, output: &ProvisionOutput) -> Result<ProvisionOutput> {
        let snapshot = self.pool.describe(output).await?;
        if snapshot.status != Status::Provisioning || snapshot.reservations.is_empty() {
            return Ok(snapshot);
        }
        let statuses = self.reservations.refresh(&snapshot).await?;
        Ok(self
            .pool
            .refresh_statuses(&snapshot.id, &statuses)
            .unwrap_or(snapshot))
    }

    fn release(&self, output: &ProvisionOutput) -> impl Future<Output = Result<usize>> + Send {
        self.pool.release(output)
    }

    fn extend(&self, output: &ProvisionOutput) -> impl Future<Output = Result<()>> + Send {
        self.pool.extend(output)
    }

    fn close(&self) -> impl Future<Output = Result<()>> + Send {
        self.pool.close()
    }
}

impl<A: AutoscalingApi, E: Ec2Api> ReservationService for AutoscalingDevicePool<A, E> {
    async fn exchange(&self, reservation: &Reservation) -> Result<Host, ReservationError> {
        if self.pool.is_closed() {
            return Err(ReservationError::Closed);
        }
        self.reservations.exchange(reservation).await
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Arc};

    use device_pool::{Arch, BoxError, Os, Platform, ProvisionService};
    use parking_lot::Mutex;

    use super::*;
    use crate::client::{AutoscalingGroup, Ec2Instance, STATE_PENDING, STATE_RUNNING};

    #[derive(Debug, PartialEq, Eq)]
    enum AsgCall {
        Describe,
        SetDesired(usize),
        Detach(Vec<FastStr>),
    }

    /// Plays back a script of DescribeAutoScalingGroup answers (the last one
    /// is sticky) and records every call. Clones share the script and the
    /// call log, so tests keep a handle for assertions.
    #[derive(Clone, Default)]
    struct FakeAutoscaling {
        describes: Arc<Mutex<VecDeque<AutoscalingGroup>>>,
        calls: Arc<Mutex<Vec<AsgCall>>>,
        fail_describe: bool,
    }

    impl FakeAutoscaling {
        fn script(&self, group: AutoscalingGroup) {
            self.describes.lock().push_back(group);
        }
    }

    impl AutoscalingApi for FakeAutoscaling {
        async fn describe_group(&self, _: &str) -> Result<AutoscalingGroup, BoxError> {
            self.calls.lock().push(AsgCall::Describe);
            if self.fail_describe {
                return Err("asg describe throttled".into());
            }
            let mut describes = self.describes.lock();
            match describes.len() {
                0 => Err("no scripted describe left".into()),
                1 => Ok(describes.front().cloned().unwrap()),
                _ => Ok(describes.pop_front().unwrap()),
            }
        }

        async fn set_desired_capacity(&self, _: &str, capacity: usize) -> Result<(), BoxError> {
            self.calls.lock().push(AsgCall::SetDesired(capacity));
            Ok(())
        }

        async fn detach_instances(
            &self,
            _: &str,
            instance_ids: &[FastStr],
        ) -> Result<(), BoxError> {
            self.calls.lock().push(AsgCall::Detach(instance_ids.to_vec()));
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeEc2 {
        instances: Arc<Mutex<Vec<Ec2Instance>>>,
    }

    impl FakeEc2 {
        fn set_states(&self, states: &[(&str, i32)]) {
            *self.instances.lock() = states
                .iter()
                .map(|(id, code)| Ec2Instance {
                    instance_id: FastStr::from((*id).to_owned()),
                    state_code: *code,
                    public_ip: Some(FastStr::from(format!("203.0.113.{}", code + 1))),
                    private_ip: None,
                })
                .collect();
        }
    }

    impl Ec2Api for FakeEc2 {
        async fn describe_instances(
            &self,
            instance_ids: &[FastStr],
        ) -> Result<Vec<Ec2Instance>, BoxError> {
            Ok(self
                .instances
                .lock()
                .iter()
                .filter(|i| instance_ids.contains(&i.instance_id))
                .cloned()
                .collect())
        }
    }

    fn instance(id: &str, lifecycle_state: LifecycleState) -> GroupInstance {
        GroupInstance {
            instance_id: FastStr::from(id.to_owned()),
            lifecycle_state,
            healthy: true,
        }
    }

    fn mapping() -> HostMapping {
        HostMapping::new(Platform::new(Os::Linux, Arch::X86_64))
    }

    fn config() -> PoolConfig {
        PoolConfig::new().expire_provisions(false)
    }

    async fn wait_for_reservations<P: ProvisionService>(
        pool: &P,
        output: &ProvisionOutput,
        amount: usize,
    ) -> ProvisionOutput {
        let mut snapshot = pool.describe(output).await.unwrap();
        while snapshot.reservations.len() < amount && !snapshot.status.is_terminal() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            snapshot = pool.describe(output).await.unwrap();
        }
        snapshot
    }

    #[tokio::test(start_paused = true)]
    async fn test_enough_in_service_instances_detach_immediately() {
        let asg = FakeAutoscaling::default();
        asg.script(AutoscalingGroup {
            desired_capacity: 3,
            instances: vec![
                instance("i-1", LifecycleState::InService),
                instance("i-2", LifecycleState::InService),
                instance("i-3", LifecycleState::InService),
            ],
        });
        let pool = AutoscalingDevicePool::new(
            asg.clone(),
            FakeEc2::default(),
            "fleet",
            mapping(),
            config(),
        )
        .unwrap();

        let output = pool.provision(ProvisionInput::new("p1", 2)).await.unwrap();
        let done = wait_for_reservations(&pool, &output, 2).await;
        assert_eq!(done.status, Status::Succeeded);
        assert_eq!(
            done.reservations,
            vec![Reservation::succeeded("i-1"), Reservation::succeeded("i-2")]
        );

        let calls = asg.calls.lock();
        assert_eq!(
            *calls,
            vec![
                AsgCall::Describe,
                AsgCall::Detach(vec![FastStr::from("i-1"), FastStr::from("i-2")]),
                AsgCall::SetDesired(1),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_group_grows_polls_and_detaches_once() {
        let asg = FakeAutoscaling::default();
        // initial look: one in-service instance, desired 1
        asg.script(AutoscalingGroup {
            desired_capacity: 1,
            instances: vec![instance("i-1", LifecycleState::InService)],
        });
        // first poll: the group is still catching up
        asg.script(AutoscalingGroup {
            desired_capacity: 3,
            instances: vec![
                instance("i-1", LifecycleState::InService),
                instance("i-2", LifecycleState::Pending),
            ],
        });
        // second poll: enough capacity, two instances still pending
        asg.script(AutoscalingGroup {
            desired_capacity: 3,
            instances: vec![
                instance("i-1", LifecycleState::InService),
                instance("i-2", LifecycleState::Pending),
                instance("i-3", LifecycleState::Pending),
            ],
        });
        let ec2 = FakeEc2::default();
        ec2.set_states(&[
            ("i-1", STATE_RUNNING),
            ("i-2", STATE_PENDING),
            ("i-3", STATE_PENDING),
        ]);
        let pool = AutoscalingDevicePool::new(
            asg.clone(),
            ec2,
            "fleet",
            mapping(),
            config(),
        )
        .unwrap();

        let output = pool.provision(ProvisionInput::new("q", 3)).await.unwrap();
        let snapshot = wait_for_reservations(&pool, &output, 3).await;

        assert_eq!(snapshot.status, Status::Provisioning);
        let statuses: Vec<Status> = snapshot.reservations.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![Status::Succeeded, Status::Provisioning, Status::Provisioning]
        );

        let calls = asg.calls.lock();
        let grow = calls
            .iter()
            .position(|c| *c == AsgCall::SetDesired(3))
            .expect("group must be grown to 3");
        let detach = calls
            .iter()
            .position(|c| {
                *c == AsgCall::Detach(vec![
                    FastStr::from("i-1"),
                    FastStr::from("i-2"),
                    FastStr::from("i-3"),
                ])
            })
            .expect("all three instances detach in one call");
        let settle = calls
            .iter()
            .rposition(|c| *c == AsgCall::SetDesired(1))
            .expect("desired capacity settles back to 1");
        assert!(grow < detach && detach < settle);
        assert_eq!(
            calls.iter().filter(|c| matches!(c, AsgCall::Detach(_))).count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_describe_upgrades_pending_reservations() {
        let asg = FakeAutoscaling::default();
        asg.script(AutoscalingGroup {
            desired_capacity: 1,
            instances: vec![instance("i-1", LifecycleState::InService)],
        });
        asg.script(AutoscalingGroup {
            desired_capacity: 2,
            instances: vec![
                instance("i-1", LifecycleState::InService),
                instance("i-2", LifecycleState::Pending),
            ],
        });
        let ec2 = FakeEc2::default();
        ec2.set_states(&[("i-1", STATE_RUNNING), ("i-2", STATE_PENDING)]);
        let pool =
            AutoscalingDevicePool::new(asg, ec2.clone(), "fleet", mapping(), config()).unwrap();

        let output = pool.provision(ProvisionInput::new("q", 2)).await.unwrap();
        let snapshot = wait_for_reservations(&pool, &output, 2).await;
        assert_eq!(snapshot.status, Status::Provisioning);

        // the instance comes up; the next describe sees code 16 and settles
        ec2.set_states(&[("i-1", STATE_RUNNING), ("i-2", STATE_RUNNING)]);
        let upgraded = pool.describe(&output).await.unwrap();
        assert_eq!(upgraded.status, Status::Succeeded);
        assert!(upgraded
            .reservations
            .iter()
            .all(|r| r.status == Status::Succeeded));

        // and the upgrade sticks in the ledger
        let again = pool.describe(&output).await.unwrap();
        assert_eq!(again, upgraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_marks_provision_failed() {
        let asg = FakeAutoscaling {
            fail_describe: true,
            ..Default::default()
        };
        let pool =
            AutoscalingDevicePool::new(asg, FakeEc2::default(), "fleet", mapping(), config())
                .unwrap();

        let output = pool.provision(ProvisionInput::new("p1", 1)).await.unwrap();
        let mut snapshot = pool.describe(&output).await.unwrap();
        while !snapshot.status.is_terminal() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            snapshot = pool.describe(&output).await.unwrap();
        }
        assert_eq!(snapshot.status, Status::Failed);
        assert!(snapshot.message.unwrap().contains("asg describe throttled"));
    }

    #[tokio::test]
    async fn test_empty_group_name_is_rejected() {
        assert!(matches!(
            AutoscalingDevicePool::new(
                FakeAutoscaling::default(),
                FakeEc2::default(),
                "",
                mapping(),
                config(),
            ),
            Err(ProvisioningError::InvalidInput(_))
        ));
    }
}
