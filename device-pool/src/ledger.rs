//! The ledger of live provisions and their TTLs.
//!
//! A concurrent map from provision id to the provision's current output plus
//! its wall-clock expiry. Transitions for a given id are serialized by the
//! map's per-shard locks; `transition` and `remove` on the same id are
//! linearizable. Cross-id operations are not serialized against each other.

use dashmap::DashMap;
use faststr::FastStr;
use tokio::time::{Duration, Instant};

use crate::provision::ProvisionOutput;

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub output: ProvisionOutput,
    pub expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct ProvisionLedger {
    entries: DashMap<FastStr, LedgerEntry>,
}

impl ProvisionLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Records a fresh `Requested` entry for `id`, or returns the existing one.
    ///
    /// The returned flag is true only for the call that inserted, which is the
    /// caller that must enqueue the request. This is what makes `provision`
    /// idempotent.
    pub fn get_or_insert(&self, id: &FastStr, ttl: Duration) -> (ProvisionOutput, bool) {
        let mut inserted = false;
        let entry = self.entries.entry(id.clone()).or_insert_with(|| {
            inserted = true;
            LedgerEntry {
                output: ProvisionOutput::requested(id.clone()),
                expires_at: Instant::now() + ttl,
            }
        });
        (entry.output.clone(), inserted)
    }

    /// Atomic read-modify-write of the output for `id`, preserving its expiry.
    ///
    /// Returns the updated snapshot, or `None` when the id is absent (e.g.
    /// released while the update was in flight).
    pub fn transition<F>(&self, id: &FastStr, f: F) -> Option<ProvisionOutput>
    where
        F: FnOnce(&mut ProvisionOutput),
    {
        let mut entry = self.entries.get_mut(id)?;
        f(&mut entry.output);
        Some(entry.output.clone())
    }

    /// Pushes the expiry of `id` out by `delta`. No-op when absent.
    pub fn extend(&self, id: &FastStr, delta: Duration) -> bool {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                entry.expires_at += delta;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &FastStr) -> Option<ProvisionOutput> {
        self.entries.get(id).map(|e| e.output.clone())
    }

    pub fn remove(&self, id: &FastStr) -> Option<LedgerEntry> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    /// Removes `id` only if it is still expired at `now`.
    ///
    /// A concurrent `extend` between an [`expired`](Self::expired) snapshot
    /// and the removal keeps the entry alive.
    pub fn remove_expired(&self, id: &FastStr, now: Instant) -> Option<LedgerEntry> {
        self.entries
            .remove_if(id, |_, entry| entry.expires_at < now)
            .map(|(_, entry)| entry)
    }

    /// Snapshot of the entries whose expiry lies before `now`, without
    /// removing them.
    pub fn expired(&self, now: Instant) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.expires_at < now)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
