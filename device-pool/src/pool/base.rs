use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use faststr::FastStr;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};

use super::PoolConfig;
use crate::{
    error::{ProvisioningError, Result},
    ledger::ProvisionLedger,
    provision::{ProvisionInput, ProvisionOutput, Reservation, Status},
    service::ProvisionService,
};

/// The step that turns a queued request into reservations.
///
/// The assignment worker calls [`allocate`](Allocate::allocate) under the
/// assignment lock; the implementation may block until capacity exists (the
/// local inventory does) or grow capacity itself (the autoscaling adapter
/// does).
pub trait Allocate: Send + Sync + 'static {
    /// Produces one reservation per requested device, in allocation order.
    fn allocate(
        &self,
        input: &ProvisionInput,
    ) -> impl Future<Output = Result<Vec<Reservation>, ProvisioningError>> + Send;

    /// Hands a previously allocated device back. Returns whether the device
    /// actually went back into circulation.
    fn reclaim(&self, device_id: &FastStr) -> impl Future<Output = bool> + Send;

    /// Interrupts in-flight allocations on shutdown.
    fn close(&self) {}
}

struct Shared<A> {
    ledger: ProvisionLedger,
    allocator: A,
    config: PoolConfig,
    // the reaper must never observe a half-assigned provision, so it shares
    // this lock with the assignment worker
    assignment: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    // taken on close so the worker's recv observes a closed queue
    queue: parking_lot::Mutex<Option<mpsc::UnboundedSender<ProvisionInput>>>,
    // taken on close so the reaper's drop sender resolves
    reaper: parking_lot::Mutex<Option<oneshot::Receiver<()>>>,
}

/// The provisioning + reservation state machine, generic over what a device
/// is allocated from.
///
/// Cheap to clone; all clones share one ledger and one pair of background
/// tasks. Dropping every clone shuts the tasks down, but [`close`] is the
/// orderly path: it also interrupts takes blocked inside an allocation.
///
/// [`close`]: ProvisionService::close
pub struct Pool<A: Allocate> {
    shared: Arc<Shared<A>>,
}

impl<A: Allocate> Clone for Pool<A> {
    fn clone(&self) -> Self {
        Pool {
            shared: self.shared.clone(),
        }
    }
}

impl<A: Allocate> Pool<A> {
    pub fn new(allocator: A, config: PoolConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (reaper_tx, reaper_rx) = oneshot::channel();
        let expire = config.expire_provisions;
        let reap_interval = config.reap_interval;
        let shared = Arc::new(Shared {
            ledger: ProvisionLedger::new(),
            allocator,
            config,
            assignment: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            queue: parking_lot::Mutex::new(Some(queue_tx)),
            reaper: parking_lot::Mutex::new(expire.then_some(reaper_rx)),
        });
        tokio::spawn(assignment_loop(Arc::downgrade(&shared), queue_rx));
        if expire {
            tokio::spawn(reaper_loop(Arc::downgrade(&shared), reaper_tx, reap_interval));
        }
        Pool { shared }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub async fn provision(&self, input: ProvisionInput) -> Result<ProvisionOutput> {
        if self.is_closed() {
            return Err(ProvisioningError::Closed);
        }
        if input.amount == 0 {
            return Err(ProvisioningError::InvalidInput(
                "amount must be at least 1".into(),
            ));
        }
        let (snapshot, inserted) = self
            .shared
            .ledger
            .get_or_insert(&input.id, self.shared.config.provision_timeout);
        if !inserted {
            tracing::debug!("provision {} already ledgered, returning snapshot", input.id);
            return Ok(snapshot);
        }
        tracing::info!(
            "accepted provision {} for {} device(s)",
            input.id,
            input.amount
        );
        let sent = {
            let queue = self.shared.queue.lock();
            queue.as_ref().map(|tx| tx.send(input.clone()).is_ok())
        };
        match sent {
            Some(true) => Ok(snapshot),
            // closed between the ledger insert and the enqueue
            _ => {
                self.shared.ledger.remove(&input.id);
                Err(ProvisioningError::Closed)
            }
        }
    }

    pub async fn describe(&self, output: &ProvisionOutput) -> Result<ProvisionOutput> {
        if self.is_closed() {
            return Err(ProvisioningError::Closed);
        }
        self.shared
            .ledger
            .get(&output.id)
            .ok_or_else(|| ProvisioningError::NotFound(output.id.clone()))
    }

    /// Deliberately does not take the assignment lock: releasing a provision
    /// is what un-wedges an assignment blocked on a starved inventory.
    pub async fn release(&self, output: &ProvisionOutput) -> Result<usize> {
        if self.is_closed() {
            return Err(ProvisioningError::Closed);
        }
        let Some(entry) = self.shared.ledger.remove(&output.id) else {
            return Ok(0);
        };
        let mut count = 0;
        for reservation in entry.output.succeeded_reservations() {
            if self.shared.allocator.reclaim(&reservation.device_id).await {
                count += 1;
            }
        }
        tracing::info!(
            "released provision {}, {} device(s) back in circulation",
            output.id,
            count
        );
        Ok(count)
    }

    pub async fn extend(&self, output: &ProvisionOutput) -> Result<()> {
        if self.is_closed() {
            return Err(ProvisioningError::Closed);
        }
        if self
            .shared
            .ledger
            .extend(&output.id, self.shared.config.provision_timeout)
        {
            tracing::debug!("extended provision {}", output.id);
        } else {
            tracing::debug!("extend of absent provision {} ignored", output.id);
        }
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::info!("closing device pool");
        self.shared.queue.lock().take();
        self.shared.reaper.lock().take();
        self.shared.allocator.close();
        Ok(())
    }

    /// Merges externally observed reservation statuses into the ledger.
    ///
    /// Terminal reservations are left alone, so statuses only ever move
    /// forward; the overall status settles the same way assignment does.
    /// Returns the updated snapshot, or `None` when the id is gone.
    pub fn refresh_statuses(
        &self,
        id: &FastStr,
        statuses: &HashMap<FastStr, Status>,
    ) -> Option<ProvisionOutput> {
        self.shared.ledger.transition(id, |output| {
            for reservation in output.reservations.iter_mut() {
                if reservation.status.is_terminal() {
                    continue;
                }
                if let Some(next) = statuses.get(&reservation.device_id) {
                    reservation.status = *next;
                }
            }
            settle(output);
        })
    }
}

impl<A: Allocate> ProvisionService for Pool<A> {
    async fn provision(&self, input: ProvisionInput) -> Result<ProvisionOutput> {
        Pool::provision(self, input).await
    }

    async fn describe(&self, output: &ProvisionOutput) -> Result<ProvisionOutput> {
        Pool::describe(self, output).await
    }

    async fn release(&self, output: &ProvisionOutput) -> Result<usize> {
        Pool::release(self, output).await
    }

    async fn extend(&self, output: &ProvisionOutput) -> Result<()> {
        Pool::extend(self, output).await
    }

    async fn close(&self) -> Result<()> {
        Pool::close(self).await
    }
}

/// Settles the overall status of an output from its reservations: all
/// succeeded means succeeded, any failure fails the whole provision, anything
/// else is still provisioning.
fn settle(output: &mut ProvisionOutput) {
    if output.status.is_terminal() || output.reservations.is_empty() {
        return;
    }
    if output
        .reservations
        .iter()
        .all(|r| r.status == Status::Succeeded)
    {
        output.status = Status::Succeeded;
        return;
    }
    let failed: Vec<&str> = output
        .reservations
        .iter()
        .filter(|r| r.status == Status::Failed)
        .map(|r| r.device_id.as_str())
        .collect();
    if failed.is_empty() {
        output.status = Status::Provisioning;
    } else {
        output.status = Status::Failed;
        output.message = Some(FastStr::from(format!(
            "devices failed to start: {}",
            failed.join(", ")
        )));
    }
}

async fn assignment_loop<A: Allocate>(
    shared: Weak<Shared<A>>,
    mut requests: mpsc::UnboundedReceiver<ProvisionInput>,
) {
    while let Some(input) = requests.recv().await {
        let Some(shared) = shared.upgrade() else { break };
        let _guard = shared.assignment.lock().await;
        if shared
            .ledger
            .transition(&input.id, |o| o.status = Status::Provisioning)
            .is_none()
        {
            tracing::debug!("provision {} vanished before assignment, skipping", input.id);
            continue;
        }
        tracing::debug!(
            "assigning {} device(s) to provision {}",
            input.amount,
            input.id
        );
        match shared.allocator.allocate(&input).await {
            Ok(reservations) => {
                let updated = shared.ledger.transition(&input.id, |o| {
                    o.reservations.extend(reservations.iter().cloned());
                    settle(o);
                });
                match updated {
                    Some(output) => {
                        tracing::info!("provision {} assigned, status {}", input.id, output.status)
                    }
                    None => {
                        // released mid-assignment: hand every device back
                        tracing::warn!(
                            "provision {} released during assignment, reclaiming {} device(s)",
                            input.id,
                            reservations.len()
                        );
                        for reservation in &reservations {
                            shared.allocator.reclaim(&reservation.device_id).await;
                        }
                    }
                }
            }
            Err(e) => {
                if shared.closed.load(Ordering::Acquire) {
                    tracing::debug!("assignment interrupted by shutdown: {e}");
                    continue;
                }
                tracing::error!("assignment for provision {} failed: {e}", input.id);
                shared.ledger.transition(&input.id, |o| {
                    o.status = Status::Failed;
                    o.message = Some(FastStr::from(e.to_string()));
                });
            }
        }
    }
    tracing::trace!("request queue closed, assignment loop exiting");
}

async fn reaper_loop<A: Allocate>(
    shared: Weak<Shared<A>>,
    mut pool_drop_tx: oneshot::Sender<()>,
    period: tokio::time::Duration,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = pool_drop_tx.closed() => {
                tracing::trace!("device pool closed, stopping reaper");
                return;
            }
            _ = interval.tick() => {}
        }
        let Some(shared) = shared.upgrade() else { return };
        let _guard = shared.assignment.lock().await;
        let now = Instant::now();
        for expired in shared.ledger.expired(now) {
            let id = expired.output.id.clone();
            // a release or an extend may have won the race since the snapshot
            let Some(entry) = shared.ledger.remove_expired(&id, now) else {
                continue;
            };
            let mut reclaimed = 0;
            for reservation in entry.output.succeeded_reservations() {
                if shared.allocator.reclaim(&reservation.device_id).await {
                    reclaimed += 1;
                }
            }
            tracing::debug!(
                "reaped expired provision {}, {} device(s) back in circulation",
                id,
                reclaimed
            );
        }
    }
}
