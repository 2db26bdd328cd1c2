//! Collaborator interfaces around the pool core.
//!
//! The core never opens command channels or moves files itself; the
//! surrounding [`DevicePool`](crate::DevicePool) drives these right after a
//! reservation is exchanged for host coordinates. Transports (SSH, IoT
//! shadow, RPC) and transfer mechanisms (staged through object storage,
//! direct copy) live entirely behind these traits.

use std::{future::Future, path::Path};

use faststr::FastStr;

use crate::{
    error::{ConnectionError, ContentTransferError},
    host::Host,
};

/// Outcome of one shell command on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A live command channel to one device.
pub trait Connection: Send + Sync + 'static {
    fn execute(
        &self,
        command: &str,
    ) -> impl Future<Output = Result<CommandResult, ConnectionError>> + Send;
}

/// Opens command channels to hosts.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Connection;

    fn connect(
        &self,
        host: &Host,
    ) -> impl Future<Output = Result<Self::Connection, ConnectionError>> + Send;
}

/// Moves files between the caller and one device.
pub trait ContentTransferAgent: Send + Sync + 'static {
    fn send(
        &self,
        source: &Path,
        destination: &str,
    ) -> impl Future<Output = Result<(), ContentTransferError>> + Send;

    fn receive(
        &self,
        source: &str,
        destination: &Path,
    ) -> impl Future<Output = Result<(), ContentTransferError>> + Send;
}

/// Creates a transfer agent for one reserved device. The agent may stage
/// content through the given command channel (e.g. download from object
/// storage on the device side).
pub trait ContentTransferAgentFactory<C: Connection>: Send + Sync + 'static {
    type Agent: ContentTransferAgent;

    fn connect(
        &self,
        provision_id: &FastStr,
        connection: &C,
        host: &Host,
    ) -> impl Future<Output = Result<Self::Agent, ContentTransferError>> + Send;
}

/// Default transfer factory for pools that only run commands: connecting
/// always succeeds, moving content always fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTransfers;

pub struct NoTransferAgent;

impl ContentTransferAgent for NoTransferAgent {
    async fn send(&self, _: &Path, _: &str) -> Result<(), ContentTransferError> {
        Err(ContentTransferError::Staging(
            "no content transfer agent configured".into(),
        ))
    }

    async fn receive(&self, _: &str, _: &Path) -> Result<(), ContentTransferError> {
        Err(ContentTransferError::Staging(
            "no content transfer agent configured".into(),
        ))
    }
}

impl<C: Connection> ContentTransferAgentFactory<C> for NoTransfers {
    type Agent = NoTransferAgent;

    async fn connect(
        &self,
        _: &FastStr,
        _: &C,
        _: &Host,
    ) -> Result<Self::Agent, ContentTransferError> {
        Ok(NoTransferAgent)
    }
}
