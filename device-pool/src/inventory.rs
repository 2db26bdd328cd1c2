//! The bounded pool of currently available hosts.
//!
//! The inventory is the only mutable shared state of significance in the
//! core: a FIFO of idle device ids over the immutable set of known hosts.
//! `take` parks the caller on a waiter list when nothing is idle; `offer`
//! hands a returning host straight to the oldest live waiter before it ever
//! touches the idle queue, so a waiter is woken at most once per host.

use std::collections::{HashMap, VecDeque};

use faststr::FastStr;
use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{error::ProvisioningError, host::Host};

struct WaiterList<T> {
    inner: LinkedHashMap<usize, oneshot::Sender<T>>,
    counter: usize,
}

impl<T> Default for WaiterList<T> {
    fn default() -> Self {
        Self {
            inner: Default::default(),
            counter: 0,
        }
    }
}

impl<T> WaiterList<T> {
    fn pop(&mut self) -> Option<oneshot::Sender<T>> {
        self.inner.pop_front().map(|(_, v)| v)
    }

    fn insert(&mut self, sender: oneshot::Sender<T>) -> usize {
        let index = self.counter;
        self.counter = self.counter.wrapping_add(1);
        self.inner.insert(index, sender);
        index
    }
}

struct Inner {
    // idle device ids, oldest first
    idle: VecDeque<FastStr>,
    // takers waiting for a host to come back
    waiters: WaiterList<Host>,
    closed: bool,
}

/// The set of known hosts plus the subset currently available.
///
/// Invariant: every known host is either idle here or reserved by exactly one
/// live provision, never both.
pub struct HostInventory {
    known: HashMap<FastStr, Host>,
    inner: Mutex<Inner>,
}

impl HostInventory {
    /// Builds an inventory from a fixed host set. Every host starts idle, in
    /// the order given.
    pub fn new(hosts: impl IntoIterator<Item = Host>) -> Result<Self, ProvisioningError> {
        let mut known = HashMap::new();
        let mut idle = VecDeque::new();
        for host in hosts {
            let device_id = host.device_id.clone();
            if known.insert(device_id.clone(), host).is_some() {
                return Err(ProvisioningError::InvalidInput(
                    format!("duplicate device id {device_id}").into(),
                ));
            }
            idle.push_back(device_id);
        }
        if known.is_empty() {
            return Err(ProvisioningError::InvalidInput(
                "at least one host is required".into(),
            ));
        }
        Ok(Self {
            known,
            inner: Mutex::new(Inner {
                idle,
                waiters: WaiterList::default(),
                closed: false,
            }),
        })
    }

    /// Removes and returns the oldest available host, waiting for one to be
    /// offered back when none is idle.
    ///
    /// Fails with `Closed` once the inventory shuts down; a caller dropping
    /// the returned future simply abandons its place in line.
    pub async fn take(&self) -> Result<Host, ProvisioningError> {
        let rx = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(ProvisioningError::Closed);
            }
            while let Some(device_id) = inner.idle.pop_front() {
                if let Some(host) = self.known.get(&device_id) {
                    tracing::trace!("take: {} handed out from idle", device_id);
                    return Ok(host.clone());
                }
            }
            let (tx, rx) = oneshot::channel();
            inner.waiters.insert(tx);
            rx
            // drop lock guard before await
        };
        tracing::trace!("take: no idle host, parking waiter");
        rx.await.map_err(|_| ProvisioningError::Closed)
    }

    /// Returns `host` to circulation. False when the host is unknown, already
    /// idle, or the inventory is closed; in that case nothing changes.
    pub fn offer(&self, host: &Host) -> bool {
        if !self.known.contains_key(&host.device_id) {
            tracing::trace!("offer: {} is not a known host, ignoring", host.device_id);
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }
        if inner.idle.contains(&host.device_id) {
            tracing::trace!("offer: {} already idle, ignoring", host.device_id);
            return false;
        }
        // prefer the oldest waiter that is still around
        let mut value = Some(host.clone());
        while let Some(waiter) = inner.waiters.pop() {
            if waiter.is_closed() {
                continue;
            }
            match waiter.send(value.take().unwrap_or_else(|| host.clone())) {
                Ok(()) => {
                    tracing::trace!("offer: {} handed to waiter", host.device_id);
                    return true;
                }
                Err(host) => value = Some(host),
            }
        }
        tracing::trace!("offer: {} back to idle", host.device_id);
        inner.idle.push_back(host.device_id.clone());
        true
    }

    /// Pure lookup over the known set. The host may currently be reserved.
    pub fn lookup(&self, device_id: &FastStr) -> Option<Host> {
        self.known.get(device_id).cloned()
    }

    /// Shuts the inventory down: pending and future `take`s fail with
    /// `Closed`.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        // dropping the senders wakes every parked taker with an error
        while inner.waiters.pop().is_some() {}
    }

    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    pub fn idle_len(&self) -> usize {
        self.inner.lock().idle.len()
    }
}

impl std::fmt::Debug for HostInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostInventory")
            .field("known", &self.known.len())
            .field("idle", &self.idle_len())
            .finish()
    }
}
