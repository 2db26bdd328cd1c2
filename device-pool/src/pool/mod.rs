//! The provisioning state machine and its back-end seam.
//!
//! [`Pool`] owns the ledger, the request FIFO and the two background tasks
//! (assignment worker and reaper); what "producing a device" means is left to
//! an [`Allocate`] implementation. [`LocalDevicePool`] plugs in the in-memory
//! host inventory; cloud adapters plug in their own allocation strategies.

mod base;
mod local;

pub use base::{Allocate, Pool};
pub use local::LocalDevicePool;

use tokio::time::Duration;

/// Tunables shared by every pool back-end.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub(crate) provision_timeout: Duration,
    pub(crate) expire_provisions: bool,
    pub(crate) reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            provision_timeout: Duration::from_secs(60 * 60),
            expire_provisions: true,
            reap_interval: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Default::default()
    }

    /// Wall-clock lifetime of a provision, applied on create and by each
    /// extend. This is not an assignment deadline: a starved request stays
    /// queued until it expires or is released.
    pub fn provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout = timeout;
        self
    }

    /// Whether to run the reaper at all. With this off, provisions live until
    /// they are released.
    pub fn expire_provisions(mut self, expire: bool) -> Self {
        self.expire_provisions = expire;
        self
    }

    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }
}
