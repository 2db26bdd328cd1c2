//! The public contract of a device pool.
//!
//! Back-ends implement these two traits; callers combine them (usually
//! through [`crate::DevicePool`]) without caring which back-end is behind
//! them.

use std::future::Future;

use crate::{
    error::{ProvisioningError, ReservationError},
    host::Host,
    provision::{ProvisionInput, ProvisionOutput, Reservation},
};

/// Accepts, tracks and releases provisions.
pub trait ProvisionService: Send + Sync + 'static {
    /// Accepts or rejects a request for devices. Never blocks waiting for
    /// assignment; poll [`describe`](Self::describe) for progress.
    fn provision(
        &self,
        input: ProvisionInput,
    ) -> impl Future<Output = Result<ProvisionOutput, ProvisioningError>> + Send;

    /// Snapshot of a provision by id. Cloud back-ends may refresh reservation
    /// statuses from the provider while answering.
    fn describe(
        &self,
        output: &ProvisionOutput,
    ) -> impl Future<Output = Result<ProvisionOutput, ProvisioningError>> + Send;

    /// Drops the provision and hands its devices back. Returns how many
    /// devices actually went back into circulation.
    fn release(
        &self,
        output: &ProvisionOutput,
    ) -> impl Future<Output = Result<usize, ProvisioningError>> + Send;

    /// Extends the provision's lifetime by one provision timeout.
    fn extend(
        &self,
        output: &ProvisionOutput,
    ) -> impl Future<Output = Result<(), ProvisioningError>> + Send;

    /// Stops background work and releases owned resources. Idempotent; every
    /// call after the first is a no-op, and every other operation fails with
    /// `Closed` afterwards.
    fn close(&self) -> impl Future<Output = Result<(), ProvisioningError>> + Send;
}

/// Resolves a reservation into reachable host coordinates.
pub trait ReservationService: Send + Sync + 'static {
    fn exchange(
        &self,
        reservation: &Reservation,
    ) -> impl Future<Output = Result<Host, ReservationError>> + Send;
}

// A shared back-end serves both halves of the contract through one Arc.

impl<T: ProvisionService> ProvisionService for std::sync::Arc<T> {
    async fn provision(
        &self,
        input: ProvisionInput,
    ) -> Result<ProvisionOutput, ProvisioningError> {
        (**self).provision(input).await
    }

    async fn describe(
        &self,
        output: &ProvisionOutput,
    ) -> Result<ProvisionOutput, ProvisioningError> {
        (**self).describe(output).await
    }

    async fn release(&self, output: &ProvisionOutput) -> Result<usize, ProvisioningError> {
        (**self).release(output).await
    }

    async fn extend(&self, output: &ProvisionOutput) -> Result<(), ProvisioningError> {
        (**self).extend(output).await
    }

    async fn close(&self) -> Result<(), ProvisioningError> {
        (**self).close().await
    }
}

impl<T: ReservationService> ReservationService for std::sync::Arc<T> {
    async fn exchange(&self, reservation: &Reservation) -> Result<Host, ReservationError> {
        (**self).exchange(reservation).await
    }
}
