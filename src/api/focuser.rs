use super::Device;
use crate::Result;

/// Focus control in millimetres.
#[async_trait::async_trait]
pub trait Focusable: Device {
    /// Moves to the given focus plus the current offset.
    async fn set_focus(&self, focus: f64) -> Result<()>;

    /// Current focus without the offset.
    async fn get_focus(&self) -> Result<f64>;

    /// Sets a new offset and moves so that the offset-free focus stays the same.
    async fn set_focus_offset(&self, offset: f64) -> Result<()>;

    /// Current focus offset.
    async fn get_focus_offset(&self) -> Result<f64>;
}
