use super::DeviceKind;
use crate::Result;
use crate::motion::MotionStatus;
use std::collections::BTreeMap;
use std::fmt::Debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Notification for the host that is not covered by a motion status change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum DeviceEvent {
    /// The dome shutter finished opening.
    RoofOpened,
    /// The dome shutter started closing.
    RoofClosing,
    /// New RA/Dec offsets were requested.
    OffsetsRaDec {
        /// RA offset in degrees.
        ra: f64,
        /// Dec offset in degrees.
        dec: f64,
    },
}

/// Methods common to all Alpaca device adapters.
#[async_trait::async_trait]
pub trait Device: Debug + Send + Sync {
    /// Configured name of the device.
    fn name(&self) -> &str;

    /// Device type.
    fn kind(&self) -> DeviceKind;

    /// Whether the last liveness check reached the device.
    fn is_connected(&self) -> bool;

    /// Current motion status.
    fn motion_status(&self) -> MotionStatus;

    /// Channel that receives every motion status change.
    fn subscribe_motion_status(&self) -> watch::Receiver<MotionStatus>;

    /// Channel that receives the device's [`DeviceEvent`]s.
    ///
    /// Events sent while nobody is subscribed are dropped.
    fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent>;

    /// Whether the device is connected and in a state that accepts new motions.
    fn is_ready(&self) -> bool {
        self.is_connected() && self.motion_status().is_ready()
    }

    /// Requests the alive parameter and updates the connection state.
    ///
    /// Returns whether the device could be reached.
    async fn check_alive(&self) -> bool;

    /// Performs the initial liveness check and determines the initial motion status.
    async fn open(&self) -> Result<()>;

    /// Brings the device into its operational state.
    async fn init(&self) -> Result<()>;

    /// Brings the device into its safe resting state.
    async fn park(&self) -> Result<()>;

    /// Stops any motion in progress.
    async fn stop_motion(&self) -> Result<()>;

    /// Spawns the background loops of this device (liveness, status refresh).
    ///
    /// All of them stop once `shutdown` is cancelled.
    fn spawn_background(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>>;
}

/// FITS header cards: keyword mapped to value and comment.
pub type FitsHeader = BTreeMap<String, (serde_json::Value, String)>;

/// Provides FITS header cards describing the device right before an exposure.
#[async_trait::async_trait]
pub trait FitsHeaderBefore: Device {
    /// Header cards for the current device state.
    async fn fits_header_before(&self) -> FitsHeader;
}
