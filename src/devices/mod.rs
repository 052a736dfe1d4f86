//! Alpaca-backed implementations of the capability traits.

#[cfg(feature = "dome")]
mod dome;
#[cfg(feature = "dome")]
pub use dome::AlpacaDome;

#[cfg(feature = "focuser")]
mod focuser;
#[cfg(feature = "focuser")]
pub use focuser::AlpacaFocuser;

#[cfg(feature = "telescope")]
mod telescope;
#[cfg(feature = "telescope")]
pub use telescope::AlpacaTelescope;

use crate::api::{DeviceEvent, DeviceKind};
use crate::client::AlpacaClient;
use crate::config::{ConfigError, ConnectionConfig};
use crate::motion::{MotionLock, MotionState, MotionStatus};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 16;

/// State shared by every adapter: name, transport, motion status and motion lock.
#[derive(Debug)]
pub(crate) struct DeviceCore {
    name: String,
    client: Arc<AlpacaClient>,
    alive_interval: Duration,
    motion: MotionState,
    lock: MotionLock,
    events: broadcast::Sender<DeviceEvent>,
}

impl DeviceCore {
    pub(crate) fn new(
        name: &str,
        kind: DeviceKind,
        connection: &ConnectionConfig,
    ) -> Result<Self, ConfigError> {
        let rename = |err: ConfigError| match err {
            ConfigError::ValidationError { reason, .. } => ConfigError::invalid(name, reason),
            err => err,
        };
        let client = AlpacaClient::new(kind, connection).map_err(rename)?;

        Ok(Self {
            name: name.to_owned(),
            client: Arc::new(client),
            alive_interval: connection.alive_interval().map_err(rename)?,
            motion: MotionState::new(MotionStatus::Unknown),
            lock: MotionLock::default(),
            events: broadcast::Sender::new(EVENT_CAPACITY),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn client(&self) -> &AlpacaClient {
        &self.client
    }

    pub(crate) const fn motion(&self) -> &MotionState {
        &self.motion
    }

    pub(crate) const fn lock(&self) -> &MotionLock {
        &self.lock
    }

    pub(crate) fn status(&self) -> MotionStatus {
        self.motion.get()
    }

    pub(crate) fn set_status(&self, status: MotionStatus) {
        self.motion.set(&self.name, status);
    }

    pub(crate) fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub(crate) fn send_event(&self, event: DeviceEvent) {
        tracing::debug!(device = self.name, ?event, "Sending event");
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn ensure_connected(&self) -> Result<()> {
        if self.client.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Marks the status unknown after a failed motion.
    ///
    /// An aborted motion leaves the status to whoever aborted it.
    pub(crate) fn fail(&self, err: Error) -> Error {
        if !matches!(err, Error::Aborted) {
            self.set_status(MotionStatus::Unknown);
        }
        err
    }

    pub(crate) fn spawn_liveness(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.client.spawn_liveness(self.alive_interval, shutdown)
    }

    /// Initial liveness check shared by all `open` implementations.
    pub(crate) async fn open(&self) {
        if !self.client.check_connected().await {
            tracing::warn!(device = self.name, "Could not connect to Alpaca server");
        }
    }
}
