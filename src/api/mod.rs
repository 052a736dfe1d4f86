/*!
Capability interfaces implemented by the Alpaca device adapters.

Every adapter implements the general [`Device`] trait plus only the
capabilities that make sense for its device type:

| Device    | Capabilities                                                                             |
|-----------|------------------------------------------------------------------------------------------|
| Telescope | [`Movable`], [`PointingRaDec`], [`PointingAltAz`], [`OffsetsRaDec`], [`SyncTarget`], [`FitsHeaderBefore`] |
| Focuser   | [`Focusable`], [`FitsHeaderBefore`]                                                      |
| Dome      | [`Shutterable`], [`PointingAltAz`]                                                       |

All angles are in degrees unless noted otherwise.
*/

use serde::{Deserialize, Serialize};

/// Types related to the general [`Device`] trait.
pub mod device;
pub use device::{Device, DeviceEvent, FitsHeader, FitsHeaderBefore};

mod telescope;
pub use telescope::{Movable, OffsetsRaDec, PointingAltAz, PointingRaDec, SyncTarget};

mod focuser;
pub use focuser::Focusable;

mod dome;
pub use dome::{ShutterState, Shutterable};

/// Device types supported by the adapters.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Telescope mount.
    #[display("telescope")]
    Telescope,
    /// Focuser.
    #[display("focuser")]
    Focuser,
    /// Dome or roll-off roof.
    #[display("dome")]
    Dome,
}

impl DeviceKind {
    /// Path segment used in Alpaca URLs.
    pub const fn as_path(self) -> &'static str {
        match self {
            Self::Telescope => "telescope",
            Self::Focuser => "focuser",
            Self::Dome => "dome",
        }
    }
}

/// Shortest angular distance between two azimuths, in degrees.
pub(crate) fn azimuth_distance(a: f64, b: f64) -> f64 {
    180.0 - ((a - b).abs() - 180.0).abs()
}

/// Converts between South-based and North-based azimuth. The conversion is its own inverse.
pub(crate) fn flip_azimuth(az: f64) -> f64 {
    let az = az + 180.0;
    if az >= 360.0 { az - 360.0 } else { az }
}

pub(crate) fn check_range(
    name: &str,
    value: f64,
    range: std::ops::RangeInclusive<f64>,
) -> crate::Result<f64> {
    if value.is_finite() && range.contains(&value) {
        Ok(value)
    } else {
        Err(crate::Error::invalid_value(format_args!(
            "{name} {value} is outside of [{}, {}]",
            range.start(),
            range.end()
        )))
    }
}
