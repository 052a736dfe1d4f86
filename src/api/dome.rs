use super::Device;
use crate::Result;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Shutter or roof control.
#[async_trait::async_trait]
pub trait Shutterable: Device {
    /// Opens the shutter and waits until it reports [`ShutterState::Open`].
    async fn open_shutter(&self) -> Result<()>;

    /// Closes the shutter, moves to the park azimuth and waits until it reports [`ShutterState::Closed`].
    async fn close_shutter(&self) -> Result<()>;

    /// Current state of the shutter.
    async fn shutter_state(&self) -> Result<ShutterState>;
}

/// Indicates the current state of the shutter or roof.
#[derive(
    Debug,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Serialize_repr,
    Deserialize_repr,
    TryFromPrimitive,
    IntoPrimitive,
)]
#[repr(i32)]
pub enum ShutterState {
    /// The shutter or roof is open.
    Open = 0,

    /// The shutter or roof is closed.
    Closed = 1,

    /// The shutter or roof is opening.
    Opening = 2,

    /// The shutter or roof is closing.
    Closing = 3,

    /// The shutter or roof has encountered a problem.
    Error = 4,
}
