//! What a caller ends up holding: devices, and the pool façade that makes
//! them.

use std::path::Path;

use faststr::FastStr;
use futures::future::try_join_all;
use tokio::time::Duration;

use crate::{
    connection::{
        CommandResult, Connection, ConnectionFactory, ContentTransferAgent,
        ContentTransferAgentFactory, NoTransfers,
    },
    error::{ConnectionError, ContentTransferError, ProvisioningError, ReservationError, Result},
    host::Host,
    provision::{ProvisionInput, ProvisionOutput, Reservation, Status},
    service::{ProvisionService, ReservationService},
};

/// One reserved device, ready to use: its coordinates, a command channel and
/// a transfer agent.
pub struct Device<C, A> {
    host: Host,
    connection: C,
    transfers: A,
}

impl<C, A> Device<C, A>
where
    C: Connection,
    A: ContentTransferAgent,
{
    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub async fn execute(&self, command: &str) -> Result<CommandResult, ConnectionError> {
        self.connection.execute(command).await
    }

    pub async fn copy_to(
        &self,
        source: &Path,
        destination: &str,
    ) -> Result<(), ContentTransferError> {
        self.transfers.send(source, destination).await
    }

    pub async fn copy_from(
        &self,
        source: &str,
        destination: &Path,
    ) -> Result<(), ContentTransferError> {
        self.transfers.receive(source, destination).await
    }
}

/// Combines a provision back-end, a reservation back-end and the connection
/// collaborators into the interface callers actually program against.
///
/// The pieces are plain values passed in at construction; background tasks
/// inside the provision service never see this type.
pub struct DevicePool<P, R, F, T = NoTransfers> {
    provisions: P,
    reservations: R,
    connections: F,
    transfers: T,
}

impl<P, R, F> DevicePool<P, R, F, NoTransfers> {
    pub fn new(provisions: P, reservations: R, connections: F) -> Self {
        Self {
            provisions,
            reservations,
            connections,
            transfers: NoTransfers,
        }
    }
}

impl<P, R, F, T> DevicePool<P, R, F, T> {
    /// Swaps in a content transfer factory.
    pub fn with_transfers<NT>(self, transfers: NT) -> DevicePool<P, R, F, NT> {
        DevicePool {
            provisions: self.provisions,
            reservations: self.reservations,
            connections: self.connections,
            transfers,
        }
    }
}

impl<P, R, F, T> DevicePool<P, R, F, T>
where
    P: ProvisionService,
    R: ReservationService,
    F: ConnectionFactory,
    T: ContentTransferAgentFactory<F::Connection>,
{
    pub async fn provision(&self, input: ProvisionInput) -> Result<ProvisionOutput> {
        self.provisions.provision(input).await
    }

    pub async fn describe(&self, output: &ProvisionOutput) -> Result<ProvisionOutput> {
        self.provisions.describe(output).await
    }

    pub async fn exchange(&self, reservation: &Reservation) -> Result<Host, ReservationError> {
        self.reservations.exchange(reservation).await
    }

    pub async fn release(&self, output: &ProvisionOutput) -> Result<usize> {
        self.provisions.release(output).await
    }

    pub async fn extend(&self, output: &ProvisionOutput) -> Result<()> {
        self.provisions.extend(output).await
    }

    pub async fn close(&self) -> Result<()> {
        self.provisions.close().await
    }

    /// Provisions devices and sees the request all the way through: polls
    /// until assignment settles, exchanges every reservation, connects, and
    /// wires up transfer agents.
    ///
    /// Collaborator failures surface as [`ProvisioningError`]; the provision
    /// itself stays live, so the caller decides whether to retry or release.
    pub async fn obtain(
        &self,
        input: ProvisionInput,
        poll_interval: Duration,
    ) -> Result<Vec<Device<F::Connection, T::Agent>>> {
        let mut output = self.provisions.provision(input).await?;
        while !output.status.is_terminal() {
            tokio::time::sleep(poll_interval).await;
            output = self.provisions.describe(&output).await?;
        }
        if output.status != Status::Succeeded {
            let message = output
                .message
                .clone()
                .unwrap_or_else(|| FastStr::from(format!("status {}", output.status)));
            return Err(ProvisioningError::Failed {
                id: output.id.clone(),
                message,
            });
        }
        tracing::debug!(
            "provision {} settled, connecting {} device(s)",
            output.id,
            output.reservations.len()
        );
        let id = &output.id;
        try_join_all(output.reservations.iter().map(|reservation| async move {
            let host = self.reservations.exchange(reservation).await?;
            let connection = self.connections.connect(&host).await?;
            let transfers = self.transfers.connect(id, &connection, &host).await?;
            Ok::<_, ProvisioningError>(Device {
                host,
                connection,
                transfers,
            })
        }))
        .await
    }
}
