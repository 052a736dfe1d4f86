//! Motion status and motion serialisation shared by all adapters.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Motion state of a device as seen by the host.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum MotionStatus {
    /// Parked, not ready for observations.
    #[display("parked")]
    Parked,
    /// Initialization in progress.
    #[display("initializing")]
    Initializing,
    /// Parking in progress.
    #[display("parking")]
    Parking,
    /// Moving to a new position.
    #[display("slewing")]
    Slewing,
    /// Following a moving target.
    #[display("tracking")]
    Tracking,
    /// Ready and not moving.
    #[display("idle")]
    Idle,
    /// Reached the requested position.
    #[display("positioned")]
    Positioned,
    /// In an error state.
    #[display("error")]
    Error,
    /// State could not be determined.
    #[display("unknown")]
    Unknown,
}

impl MotionStatus {
    /// Whether a device in this state can accept new motions.
    pub const fn is_ready(self) -> bool {
        !matches!(
            self,
            Self::Parked | Self::Initializing | Self::Parking | Self::Error | Self::Unknown
        )
    }
}

/// Current motion status plus a channel for observers.
#[derive(Debug)]
pub(crate) struct MotionState {
    tx: watch::Sender<MotionStatus>,
}

impl MotionState {
    pub(crate) fn new(initial: MotionStatus) -> Self {
        Self {
            tx: watch::Sender::new(initial),
        }
    }

    pub(crate) fn get(&self) -> MotionStatus {
        *self.tx.borrow()
    }

    pub(crate) fn set(&self, device: &str, status: MotionStatus) {
        let previous = self.tx.send_replace(status);
        if previous != status {
            tracing::debug!(device, %previous, %status, "Motion status changed");
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<MotionStatus> {
        self.tx.subscribe()
    }
}

/// Serialises motions of one device.
///
/// Acquiring the lock aborts whichever motion currently holds it, so the most
/// recent request always wins.
#[derive(Debug, Default)]
pub(crate) struct MotionLock {
    lock: tokio::sync::Mutex<()>,
    abort: Mutex<CancellationToken>,
}

#[derive(Debug)]
pub(crate) struct MotionGuard<'lock> {
    _guard: tokio::sync::MutexGuard<'lock, ()>,
    token: CancellationToken,
}

impl MotionGuard<'_> {
    pub(crate) const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Sleep for `duration` unless the motion gets aborted first.
    pub(crate) async fn sleep(&self, duration: Duration) -> Result<()> {
        sleep_or_abort(&self.token, duration).await
    }

    pub(crate) fn check_aborted(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }
}

impl MotionLock {
    pub(crate) async fn acquire(&self) -> MotionGuard<'_> {
        self.abort_current();
        let guard = self.lock.lock().await;
        let token = CancellationToken::new();
        *self.abort.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        MotionGuard {
            _guard: guard,
            token,
        }
    }

    pub(crate) fn abort_current(&self) {
        self.abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

pub(crate) async fn sleep_or_abort(token: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        () = token.cancelled() => Err(Error::Aborted),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}
