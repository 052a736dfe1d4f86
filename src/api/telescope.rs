use super::Device;
use crate::Result;

/// Direct control over the slewing of a mount.
#[async_trait::async_trait]
pub trait Movable: Device {
    /// Slews to the given equatorial coordinates and returns once the slew is finished.
    ///
    /// Issues a single synchronous `SlewToCoordinates` request.
    async fn slew_to_coordinates(&self, ra: f64, dec: f64) -> Result<()>;

    /// Immediately stops a slew in progress.
    async fn abort_slew(&self) -> Result<()>;

    /// Whether the mount is currently slewing.
    async fn is_slewing(&self) -> Result<bool>;
}

/// Pointing in equatorial coordinates.
#[async_trait::async_trait]
pub trait PointingRaDec: Device {
    /// Moves to the given RA/Dec and starts tracking.
    async fn move_radec(&self, ra: f64, dec: f64) -> Result<()>;

    /// Current RA/Dec without offsets.
    async fn get_radec(&self) -> Result<(f64, f64)>;
}

/// Pointing in horizontal coordinates.
#[async_trait::async_trait]
pub trait PointingAltAz: Device {
    /// Moves to the given Alt/Az.
    async fn move_altaz(&self, alt: f64, az: f64) -> Result<()>;

    /// Current Alt/Az.
    async fn get_altaz(&self) -> Result<(f64, f64)>;
}

/// Offsets applied on top of the RA/Dec target.
#[async_trait::async_trait]
pub trait OffsetsRaDec: Device {
    /// Moves by the given offsets (degrees) relative to the target.
    async fn set_offsets_radec(&self, dra: f64, ddec: f64) -> Result<()>;

    /// Current RA/Dec offsets.
    async fn get_offsets_radec(&self) -> Result<(f64, f64)>;
}

/// Synchronisation of the mount model on the current target.
#[async_trait::async_trait]
pub trait SyncTarget: Device {
    /// Syncs the mount on the current target using the current offsets.
    async fn sync_target(&self) -> Result<()>;
}
