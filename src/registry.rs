//! Construction of adapters from configuration.

use crate::api::{Device, DeviceKind};
use crate::config::{ConfigError, DeviceConfig, DeviceOptions, ObservatoryConfig};
#[cfg(feature = "dome")]
use crate::devices::AlpacaDome;
#[cfg(feature = "focuser")]
use crate::devices::AlpacaFocuser;
#[cfg(feature = "telescope")]
use crate::devices::AlpacaTelescope;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// An adapter of any of the supported device types.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum TypedDevice {
    #[cfg(feature = "telescope")]
    Telescope(Arc<AlpacaTelescope>),
    #[cfg(feature = "focuser")]
    Focuser(Arc<AlpacaFocuser>),
    #[cfg(feature = "dome")]
    Dome(Arc<AlpacaDome>),
}

impl TypedDevice {
    /// The adapter as a general [`Device`].
    pub fn as_device(&self) -> Arc<dyn Device> {
        match *self {
            #[cfg(feature = "telescope")]
            Self::Telescope(ref device) => Arc::clone(device) as Arc<dyn Device>,
            #[cfg(feature = "focuser")]
            Self::Focuser(ref device) => Arc::clone(device) as Arc<dyn Device>,
            #[cfg(feature = "dome")]
            Self::Dome(ref device) => Arc::clone(device) as Arc<dyn Device>,
        }
    }

    /// Device type of the adapter.
    pub const fn kind(&self) -> DeviceKind {
        match *self {
            #[cfg(feature = "telescope")]
            Self::Telescope(_) => DeviceKind::Telescope,
            #[cfg(feature = "focuser")]
            Self::Focuser(_) => DeviceKind::Focuser,
            #[cfg(feature = "dome")]
            Self::Dome(_) => DeviceKind::Dome,
        }
    }
}

/// Creates the adapter for a single configuration entry.
///
/// No request is made; call [`Device::open`] to connect.
pub fn build_device(name: &str, config: &DeviceConfig) -> Result<TypedDevice, ConfigError> {
    config.validate(name)?;

    match config.options {
        #[cfg(feature = "telescope")]
        DeviceOptions::Telescope(ref options) => Ok(TypedDevice::Telescope(Arc::new(
            AlpacaTelescope::new(name, &config.connection, options)?,
        ))),
        #[cfg(feature = "focuser")]
        DeviceOptions::Focuser(ref options) => Ok(TypedDevice::Focuser(Arc::new(
            AlpacaFocuser::new(name, &config.connection, options)?,
        ))),
        #[cfg(feature = "dome")]
        DeviceOptions::Dome(ref options) => Ok(TypedDevice::Dome(Arc::new(AlpacaDome::new(
            name,
            &config.connection,
            options,
        )?))),
        #[allow(unreachable_patterns)]
        _ => Err(ConfigError::invalid(
            name,
            format_args!("support for {} devices is not enabled", config.kind()),
        )),
    }
}

/// All configured adapters, keyed by name.
#[derive(Debug, Default)]
pub struct Registry {
    devices: BTreeMap<String, TypedDevice>,
}

impl Registry {
    /// Builds every adapter in `config` and links telescopes to the domes they wait for.
    pub fn from_config(config: &ObservatoryConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let devices = config
            .devices
            .iter()
            .map(|(name, device)| Ok((name.clone(), build_device(name, device)?)))
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        let registry = Self { devices };
        registry.link_domes();
        Ok(registry)
    }

    #[cfg(all(feature = "telescope", feature = "dome"))]
    fn link_domes(&self) {
        for telescope in self.telescopes() {
            if let Some(dome) = telescope.wait_for_dome().and_then(|name| self.dome(name)) {
                telescope.attach_dome(dome);
            }
        }
    }

    #[cfg(not(all(feature = "telescope", feature = "dome")))]
    #[allow(clippy::unused_self)]
    const fn link_domes(&self) {}

    /// Adapter registered under `name`.
    pub fn get(&self, name: &str) -> Option<&TypedDevice> {
        self.devices.get(name)
    }

    /// Names and adapters, ordered by name.
    pub fn iter(&self) -> impl '_ + Iterator<Item = (&str, &TypedDevice)> {
        self.devices
            .iter()
            .map(|(name, device)| (name.as_str(), device))
    }

    /// Every adapter as a general [`Device`].
    pub fn devices(&self) -> impl '_ + Iterator<Item = Arc<dyn Device>> {
        self.devices.values().map(TypedDevice::as_device)
    }

    /// Number of registered adapters.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no adapter is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Telescope registered under `name`.
    #[cfg(feature = "telescope")]
    pub fn telescope(&self, name: &str) -> Option<Arc<AlpacaTelescope>> {
        match self.devices.get(name)? {
            TypedDevice::Telescope(device) => Some(Arc::clone(device)),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// All telescopes.
    #[cfg(feature = "telescope")]
    pub fn telescopes(&self) -> impl '_ + Iterator<Item = Arc<AlpacaTelescope>> {
        self.devices.values().filter_map(|device| match device {
            TypedDevice::Telescope(device) => Some(Arc::clone(device)),
            #[allow(unreachable_patterns)]
            _ => None,
        })
    }

    /// Focuser registered under `name`.
    #[cfg(feature = "focuser")]
    pub fn focuser(&self, name: &str) -> Option<Arc<AlpacaFocuser>> {
        match self.devices.get(name)? {
            TypedDevice::Focuser(device) => Some(Arc::clone(device)),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Dome registered under `name`.
    #[cfg(feature = "dome")]
    pub fn dome(&self, name: &str) -> Option<Arc<AlpacaDome>> {
        match self.devices.get(name)? {
            TypedDevice::Dome(device) => Some(Arc::clone(device)),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// All domes.
    #[cfg(feature = "dome")]
    pub fn domes(&self) -> impl '_ + Iterator<Item = Arc<AlpacaDome>> {
        self.devices.values().filter_map(|device| match device {
            TypedDevice::Dome(device) => Some(Arc::clone(device)),
            #[allow(unreachable_patterns)]
            _ => None,
        })
    }

    /// Opens every adapter concurrently.
    pub async fn open_all(&self) -> crate::Result<()> {
        let _ = futures::future::try_join_all(
            self.devices()
                .map(|device| async move { device.open().await }),
        )
        .await?;
        Ok(())
    }

    /// Spawns the background loops of every adapter plus the follow loops of domes.
    ///
    /// Everything stops once `shutdown` is cancelled.
    pub fn start(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        #[cfg_attr(not(all(feature = "telescope", feature = "dome")), allow(unused_mut))]
        let mut tasks: Vec<_> = self
            .devices()
            .flat_map(|device| device.spawn_background(shutdown.clone()))
            .collect();

        #[cfg(all(feature = "telescope", feature = "dome"))]
        for dome in self.domes() {
            let Some(leader) = dome.follow().and_then(|name| self.telescope(name)) else {
                continue;
            };
            tasks.push(dome.spawn_follow(leader, shutdown.clone()));
        }

        tasks
    }
}
