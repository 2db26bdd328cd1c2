use std::{future::Future, sync::Arc};

use faststr::FastStr;

use super::{base::Allocate, Pool, PoolConfig};
use crate::{
    error::{ProvisioningError, ReservationError, Result},
    host::Host,
    inventory::HostInventory,
    provision::{ProvisionInput, ProvisionOutput, Reservation},
    service::{ProvisionService, ReservationService},
};

/// Allocation against the in-memory host inventory: take FIFO until the
/// request is satisfied, blocking while the inventory is starved.
struct LocalAllocate {
    inventory: Arc<HostInventory>,
}

impl Allocate for LocalAllocate {
    async fn allocate(
        &self,
        input: &ProvisionInput,
    ) -> Result<Vec<Reservation>, ProvisioningError> {
        let mut taken = Vec::with_capacity(input.amount);
        for _ in 0..input.amount {
            match self.inventory.take().await {
                Ok(host) => taken.push(host),
                Err(e) => {
                    // hand back whatever was already collected
                    for host in &taken {
                        self.inventory.offer(host);
                    }
                    return Err(e);
                }
            }
        }
        Ok(taken
            .iter()
            .map(|host| Reservation::succeeded(host.device_id.clone()))
            .collect())
    }

    async fn reclaim(&self, device_id: &FastStr) -> bool {
        match self.inventory.lookup(device_id) {
            Some(host) => self.inventory.offer(&host),
            None => false,
        }
    }

    fn close(&self) {
        self.inventory.close();
    }
}

/// A device pool over a fixed set of hosts, no cloud calls involved.
///
/// Requests are served strictly in arrival order; a request that wants more
/// devices than are currently free blocks assignment (including for the
/// requests behind it) until releases or reaping free enough hosts.
pub struct LocalDevicePool {
    pool: Pool<LocalAllocate>,
    inventory: Arc<HostInventory>,
}

impl LocalDevicePool {
    pub fn new(
        hosts: impl IntoIterator<Item = Host>,
        config: PoolConfig,
    ) -> Result<Self, ProvisioningError> {
        let inventory = Arc::new(HostInventory::new(hosts)?);
        let pool = Pool::new(
            LocalAllocate {
                inventory: inventory.clone(),
            },
            config,
        );
        Ok(Self { pool, inventory })
    }
}

impl ProvisionService for LocalDevicePool {
    fn provision(
        &self,
        input: ProvisionInput,
    ) -> impl Future<Output = Result<ProvisionOutput>> + Send {
        self.pool.provision(input)
    }

    fn describe(
        &self,
        output: &ProvisionOutput,
    ) -> impl Future<Output = Result<ProvisionOutput>> + Send {
        self.pool.describe(output)
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

impl ReservationService for LocalDevicePool {
    async fn exchange(&self, reservation: &Reservation) -> Result<Host, ReservationError> {
        if self.pool.is_closed() {
            return Err(ReservationError::Closed);
        }
        // resolves over the whole known set: a reservation that is no longer
        // live still exchanges for its coordinates
        self.inventory
            .lookup(&reservation.device_id)
            .ok_or_else(|| ReservationError::NotFound(reservation.device_id.clone()))
    }
}
