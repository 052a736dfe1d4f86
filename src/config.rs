//! Device configuration.
//!
//! A configuration file lists every device under its own table:
//!
//! ```toml
//! [devices.telescope]
//! server = "192.168.1.89"
//! port = 11111
//! device_type = "telescope"
//! device = 0
//! settle_time = 3.0
//! wait_for_dome = "dome"
//!
//! [devices.dome]
//! server = "192.168.1.89"
//! port = 11111
//! device_type = "dome"
//! device = 0
//! follow = "telescope"
//! ```

use crate::api::DeviceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Error raised while loading or validating configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file {0} not found")]
    FileNotFound(String),

    /// TOML parsing failed, including unknown device types and missing fields.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration of {device:?} is invalid: {reason}")]
    ValidationError {
        /// Name of the offending device.
        device: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(device: &str, reason: impl std::fmt::Display) -> Self {
        Self::ValidationError {
            device: device.to_owned(),
            reason: reason.to_string(),
        }
    }
}

/// Configuration of all devices, keyed by device name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservatoryConfig {
    /// Configured devices.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,
}

impl ObservatoryConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        content.parse()
    }

    /// Validate every device entry and the references between them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, device) in &self.devices {
            device.validate(name)?;

            match &device.options {
                DeviceOptions::Telescope(TelescopeOptions {
                    wait_for_dome: Some(dome),
                    ..
                }) => self.check_reference(name, "wait_for_dome", dome, DeviceKind::Dome)?,
                DeviceOptions::Dome(DomeOptions {
                    follow: Some(leader),
                    ..
                }) => self.check_reference(name, "follow", leader, DeviceKind::Telescope)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn check_reference(
        &self,
        device: &str,
        field: &str,
        target: &str,
        kind: DeviceKind,
    ) -> Result<(), ConfigError> {
        match self.devices.get(target) {
            Some(config) if config.kind() == kind => Ok(()),
            Some(config) => Err(ConfigError::invalid(
                device,
                format_args!("{field} must name a {kind}, but {target:?} is a {}", config.kind()),
            )),
            None => Err(ConfigError::invalid(
                device,
                format_args!("{field} names unknown device {target:?}"),
            )),
        }
    }
}

impl std::str::FromStr for ObservatoryConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration of a single Alpaca device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Where the device lives.
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    /// Device type and type-specific options.
    #[serde(flatten)]
    pub options: DeviceOptions,
}

impl DeviceConfig {
    /// Device type of this entry.
    pub const fn kind(&self) -> DeviceKind {
        self.options.kind()
    }

    /// Validate connection and device-specific settings.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        self.connection.validate(name)?;
        self.options.validate(name)
    }
}

/// Address of a device on its Alpaca server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Name or IP of the Alpaca server.
    pub server: String,
    /// Port of the Alpaca server.
    pub port: u16,
    /// Device number on the server.
    pub device: u32,
    /// Alpaca API version; only `v1` exists.
    #[serde(default = "default_version")]
    pub version: String,
    /// Property requested by liveness checks.
    #[serde(default = "default_alive_parameter")]
    pub alive_parameter: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// Interval between liveness checks in seconds.
    #[serde(default = "default_alive_interval")]
    pub alive_interval: f64,
}

fn default_version() -> String {
    "v1".to_owned()
}

fn default_alive_parameter() -> String {
    "Connected".to_owned()
}

const fn default_timeout() -> f64 {
    5.0
}

const fn default_alive_interval() -> f64 {
    5.0
}

impl ConnectionConfig {
    /// Connection to device `device` on `server:port` with defaults for everything else.
    pub fn new(server: impl Into<String>, port: u16, device: u32) -> Self {
        Self {
            server: server.into(),
            port,
            device,
            version: default_version(),
            alive_parameter: default_alive_parameter(),
            timeout: default_timeout(),
            alive_interval: default_alive_interval(),
        }
    }

    /// Request timeout.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        positive(&self.server, "timeout", self.timeout)
    }

    /// Interval between liveness checks.
    pub fn alive_interval(&self) -> Result<Duration, ConfigError> {
        positive(&self.server, "alive_interval", self.alive_interval)
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::invalid(name, "server cannot be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid(name, "port cannot be 0"));
        }
        if self.version != "v1" {
            return Err(ConfigError::invalid(
                name,
                format_args!("unsupported Alpaca version {:?}, only v1 is supported", self.version),
            ));
        }
        if self.alive_parameter.trim().is_empty() {
            return Err(ConfigError::invalid(name, "alive_parameter cannot be empty"));
        }
        let _ = positive(name, "timeout", self.timeout)?;
        let _ = positive(name, "alive_interval", self.alive_interval)?;
        Ok(())
    }
}

/// Converts `value` seconds into a non-zero [`Duration`].
fn positive(device: &str, field: &str, value: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(ConfigError::invalid(
            device,
            format_args!("{field} must be a positive number of seconds, got {value}"),
        )),
    }
}

/// Converts `value` seconds into a [`Duration`], allowing zero.
fn non_negative(
    device: &str,
    field: &str,
    value: f64,
) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|err| {
        ConfigError::invalid(
            device,
            format_args!("{field} must be a non-negative number of seconds, got {value} ({err})"),
        )
    })
}

fn positive_number(device: &str, field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            device,
            format_args!("{field} must be positive, got {value}"),
        ))
    }
}

/// Type-specific options, selected by the `device_type` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "device_type", rename_all = "lowercase")]
pub enum DeviceOptions {
    /// A telescope mount.
    Telescope(TelescopeOptions),
    /// A focuser.
    Focuser(FocuserOptions),
    /// A dome or roll-off roof.
    Dome(DomeOptions),
}

impl DeviceOptions {
    /// Device type these options belong to.
    pub const fn kind(&self) -> DeviceKind {
        match self {
            Self::Telescope(_) => DeviceKind::Telescope,
            Self::Focuser(_) => DeviceKind::Focuser,
            Self::Dome(_) => DeviceKind::Dome,
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match self {
            Self::Telescope(options) => options.timings(name).map(drop),
            Self::Focuser(options) => options.poll_interval(name).map(drop),
            Self::Dome(options) => options.check(name).map(drop),
        }
    }
}

/// Waits and poll intervals of a telescope.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TelescopeTimings {
    pub(crate) settle_time: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) status_interval: Duration,
}

/// Poll intervals of a dome.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DomeTimings {
    pub(crate) follow_interval: Duration,
    pub(crate) poll_interval: Duration,
    pub(crate) status_interval: Duration,
}

/// Telescope-specific options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelescopeOptions {
    /// Seconds to wait after a slew before reporting it as finished.
    pub settle_time: f64,
    /// Seconds between `Slewing` polls.
    pub poll_interval: f64,
    /// Seconds between status refreshes while the status is unknown.
    pub status_interval: f64,
    /// Name of the dome to wait for after slewing.
    pub wait_for_dome: Option<String>,
    /// Name of the weather module that gates operation; relayed to the host.
    pub weather: Option<String>,
    /// Whether the mount reports azimuth measured from South.
    pub azimuth_from_south: bool,
}

impl TelescopeOptions {
    pub(crate) fn timings(&self, name: &str) -> Result<TelescopeTimings, ConfigError> {
        Ok(TelescopeTimings {
            settle_time: non_negative(name, "settle_time", self.settle_time)?,
            poll_interval: positive(name, "poll_interval", self.poll_interval)?,
            status_interval: positive(name, "status_interval", self.status_interval)?,
        })
    }
}

impl Default for TelescopeOptions {
    fn default() -> Self {
        Self {
            settle_time: 3.0,
            poll_interval: 1.0,
            status_interval: 5.0,
            wait_for_dome: None,
            weather: None,
            azimuth_from_south: false,
        }
    }
}

/// Focuser-specific options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FocuserOptions {
    /// Seconds between `Position` polls while moving.
    pub poll_interval: f64,
    /// Distance in steps at which a move counts as finished.
    pub position_tolerance: u32,
}

impl FocuserOptions {
    pub(crate) fn poll_interval(&self, name: &str) -> Result<Duration, ConfigError> {
        positive(name, "poll_interval", self.poll_interval)
    }
}

impl Default for FocuserOptions {
    fn default() -> Self {
        Self {
            poll_interval: 0.1,
            position_tolerance: 10,
        }
    }
}

/// Dome-specific options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomeOptions {
    /// Azimuth tolerance in degrees.
    pub tolerance: f64,
    /// Azimuth of the park position in degrees.
    pub park_az: f64,
    /// Name of the device (usually a telescope) to follow.
    pub follow: Option<String>,
    /// Seconds between follow updates.
    pub follow_interval: f64,
    /// Seconds between shutter and azimuth polls during a motion.
    pub poll_interval: f64,
    /// Seconds between background azimuth refreshes.
    pub status_interval: f64,
    /// Whether the dome reports azimuth measured from South.
    pub azimuth_from_south: bool,
}

impl DomeOptions {
    /// Checks tolerance and park position, then converts the intervals.
    pub(crate) fn check(&self, name: &str) -> Result<DomeTimings, ConfigError> {
        positive_number(name, "tolerance", self.tolerance)?;
        if !(0.0..360.0).contains(&self.park_az) {
            return Err(ConfigError::invalid(
                name,
                format_args!("park_az must be within [0, 360), got {}", self.park_az),
            ));
        }
        Ok(DomeTimings {
            follow_interval: positive(name, "follow_interval", self.follow_interval)?,
            poll_interval: positive(name, "poll_interval", self.poll_interval)?,
            status_interval: positive(name, "status_interval", self.status_interval)?,
        })
    }
}

impl Default for DomeOptions {
    fn default() -> Self {
        Self {
            tolerance: 3.0,
            park_az: 180.0,
            follow: None,
            follow_interval: 10.0,
            poll_interval: 1.0,
            status_interval: 2.0,
            azimuth_from_south: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
        [devices.telescope]
        server = "localhost"
        port = 11111
        device_type = "telescope"
        device = 0
        settle_time = 1
        wait_for_dome = "dome"
        weather = "weather"

        [devices.focuser]
        server = "localhost"
        port = 11111
        device_type = "focuser"
        device = 0

        [devices.dome]
        server = "localhost"
        port = 11111
        device_type = "dome"
        device = 0
        follow = "telescope"
        tolerance = 5.0
    "#;

    #[test]
    fn parses_all_device_types() {
        let config: ObservatoryConfig = SAMPLE.parse().expect("valid config");
        assert_eq!(config.devices.len(), 3);

        let telescope = &config.devices["telescope"];
        assert_eq!(telescope.kind(), DeviceKind::Telescope);
        assert_eq!(telescope.connection.alive_parameter, "Connected");
        assert_eq!(telescope.connection.version, "v1");
        match &telescope.options {
            DeviceOptions::Telescope(options) => {
                assert!((options.settle_time - 1.0).abs() < f64::EPSILON);
                assert_eq!(options.wait_for_dome.as_deref(), Some("dome"));
                assert_eq!(options.weather.as_deref(), Some("weather"));
            }
            other => panic!("unexpected options {other:?}"),
        }

        match &config.devices["dome"].options {
            DeviceOptions::Dome(options) => {
                assert_eq!(options.follow.as_deref(), Some("telescope"));
                assert!((options.park_az - 180.0).abs() < f64::EPSILON);
                assert!(options.azimuth_from_south);
            }
            other => panic!("unexpected options {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_device_type() {
        let err = r#"
            [devices.camera]
            server = "localhost"
            port = 11111
            device_type = "camera"
            device = 0
        "#
        .parse::<ObservatoryConfig>()
        .expect_err("camera is not supported");
        assert!(matches!(err, ConfigError::ParseError(_)), "{err}");
    }

    #[test]
    fn rejects_missing_server() {
        let err = r#"
            [devices.focuser]
            port = 11111
            device_type = "focuser"
            device = 0
        "#
        .parse::<ObservatoryConfig>()
        .expect_err("server is required");
        assert!(matches!(err, ConfigError::ParseError(_)), "{err}");
    }

    #[test]
    fn rejects_other_versions() {
        let err = r#"
            [devices.focuser]
            server = "localhost"
            port = 11111
            device_type = "focuser"
            device = 0
            version = "v2"
        "#
        .parse::<ObservatoryConfig>()
        .expect_err("only v1 is supported");
        assert!(
            matches!(&err, ConfigError::ValidationError { device, .. } if device == "focuser"),
            "{err}"
        );
    }

    #[test]
    fn rejects_non_positive_tolerance() {
        let err = r#"
            [devices.dome]
            server = "localhost"
            port = 11111
            device_type = "dome"
            device = 0
            tolerance = 0
        "#
        .parse::<ObservatoryConfig>()
        .expect_err("tolerance must be positive");
        assert!(err.to_string().contains("tolerance"), "{err}");
    }

    #[test]
    fn rejects_unrepresentable_durations() {
        let err = r#"
            [devices.focuser]
            server = "localhost"
            port = 11111
            device_type = "focuser"
            device = 0
            timeout = 1e20
        "#
        .parse::<ObservatoryConfig>()
        .expect_err("timeout overflows a Duration");
        assert!(
            matches!(&err, ConfigError::ValidationError { device, reason } if device == "focuser" && reason.contains("timeout")),
            "{err}"
        );

        let err = r#"
            [devices.telescope]
            server = "localhost"
            port = 11111
            device_type = "telescope"
            device = 0
            settle_time = -1
        "#
        .parse::<ObservatoryConfig>()
        .expect_err("settle_time cannot be negative");
        assert!(err.to_string().contains("settle_time"), "{err}");

        let mut connection = ConnectionConfig::new("localhost", 11111, 0);
        connection.alive_interval = f64::NAN;
        assert!(connection.alive_interval().is_err());
        assert!(connection.timeout().is_ok());
    }

    #[test]
    fn rejects_dangling_references() {
        let err = r#"
            [devices.telescope]
            server = "localhost"
            port = 11111
            device_type = "telescope"
            device = 0
            wait_for_dome = "dome"
        "#
        .parse::<ObservatoryConfig>()
        .expect_err("dome is not configured");
        assert!(err.to_string().contains("wait_for_dome"), "{err}");

        let err = r#"
            [devices.focuser]
            server = "localhost"
            port = 11111
            device_type = "focuser"
            device = 0

            [devices.dome]
            server = "localhost"
            port = 11111
            device_type = "dome"
            device = 0
            follow = "focuser"
        "#
        .parse::<ObservatoryConfig>()
        .expect_err("a focuser cannot be followed");
        assert!(
            matches!(&err, ConfigError::ValidationError { device, .. } if device == "dome"),
            "{err}"
        );
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(SAMPLE.as_bytes()).expect("write config");

        let config = ObservatoryConfig::load(file.path()).expect("load config");
        assert!(config.devices.contains_key("focuser"));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = ObservatoryConfig::load(Path::new("/nonexistent/obs-alpaca.toml"))
            .expect_err("file does not exist");
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
