use super::DeviceCore;
use crate::api::{
    Device, DeviceEvent, DeviceKind, FitsHeader, FitsHeaderBefore, Movable, OffsetsRaDec,
    PointingAltAz, PointingRaDec, SyncTarget, check_range, flip_azimuth,
};
use crate::config::{ConfigError, ConnectionConfig, TelescopeOptions};
use crate::motion::{MotionGuard, MotionStatus, sleep_or_abort};
use crate::params::params;
use crate::{Error, Result};
use serde_json::json;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Position the telescope moves to on `init`.
const INIT_ALTAZ: (f64, f64) = (30.0, 180.0);
const PARK_TIMEOUT: Duration = Duration::from_secs(60);
const SYNC_SLEW_TIMEOUT: Duration = Duration::from_secs(120);

/// Telescope mount behind an Alpaca server.
#[derive(Debug)]
pub struct AlpacaTelescope {
    core: DeviceCore,
    settle_time: Duration,
    poll_interval: Duration,
    status_interval: Duration,
    azimuth_from_south: bool,
    wait_for_dome: Option<String>,
    weather: Option<String>,
    dome: OnceLock<Arc<dyn Device>>,
    /// RA/Dec offsets in degrees.
    offsets: Mutex<(f64, f64)>,
}

impl AlpacaTelescope {
    /// Creates the adapter; no request is made until [`Device::open`].
    pub fn new(
        name: &str,
        connection: &ConnectionConfig,
        options: &TelescopeOptions,
    ) -> Result<Self, ConfigError> {
        let timings = options.timings(name)?;

        Ok(Self {
            core: DeviceCore::new(name, DeviceKind::Telescope, connection)?,
            settle_time: timings.settle_time,
            poll_interval: timings.poll_interval,
            status_interval: timings.status_interval,
            azimuth_from_south: options.azimuth_from_south,
            wait_for_dome: options.wait_for_dome.clone(),
            weather: options.weather.clone(),
            dome: OnceLock::new(),
            offsets: Mutex::new((0.0, 0.0)),
        })
    }

    /// Name of the dome this telescope waits for after slewing.
    pub fn wait_for_dome(&self) -> Option<&str> {
        self.wait_for_dome.as_deref()
    }

    /// Name of the weather module gating this telescope, relayed to the host.
    pub fn weather(&self) -> Option<&str> {
        self.weather.as_deref()
    }

    /// Links the dome to wait for after each slew.
    pub fn attach_dome(&self, dome: Arc<dyn Device>) {
        if self.dome.set(dome).is_err() {
            tracing::warn!(device = self.core.name(), "A dome is already attached, ignoring");
        }
    }

    /// Dome linked by [`Self::attach_dome`].
    pub fn linked_dome(&self) -> Option<&Arc<dyn Device>> {
        self.dome.get()
    }

    fn offsets(&self) -> (f64, f64) {
        *self.offsets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_offsets(&self, offsets: (f64, f64)) {
        *self.offsets.lock().unwrap_or_else(PoisonError::into_inner) = offsets;
    }

    /// Derives the motion status from the mount's flags.
    async fn fetch_status(&self) -> MotionStatus {
        let client = self.core.client();

        let status = async {
            Ok::<_, Error>(if client.get::<bool>("AtPark").await? {
                MotionStatus::Parked
            } else if client.get::<bool>("Slewing").await? {
                MotionStatus::Slewing
            } else if client.get::<bool>("Tracking").await? {
                MotionStatus::Tracking
            } else {
                MotionStatus::Idle
            })
        }
        .await;

        status.unwrap_or_else(|err| {
            tracing::debug!(device = self.core.name(), %err, "Could not fetch telescope status");
            MotionStatus::Unknown
        })
    }

    async fn wait_for_slew(&self, guard: &MotionGuard<'_>) -> Result<()> {
        while self.core.client().get::<bool>("Slewing").await? {
            guard.sleep(self.poll_interval).await?;
        }
        Ok(())
    }

    async fn settle(&self, guard: &MotionGuard<'_>) -> Result<()> {
        guard.sleep(self.settle_time).await?;

        if let Some(dome) = self.dome.get() {
            tracing::info!(device = self.core.name(), dome = dome.name(), "Waiting for dome...");
            tokio::select! {
                () = guard.token().cancelled() => return Err(Error::Aborted),
                _ = wait_until_not_slewing(dome.subscribe_motion_status()) => {}
            }
        }

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, guard), fields(device = self.core.name()))]
    async fn slew_radec(&self, ra: f64, dec: f64, guard: &MotionGuard<'_>) -> Result<()> {
        let client = self.core.client();

        client.put("Tracking", params! { Tracking: true }).await?;
        client
            .put(
                "SlewToCoordinatesAsync",
                params! { RightAscension: ra / 15.0, Declination: dec },
            )
            .await?;
        self.wait_for_slew(guard).await?;
        client.put("Tracking", params! { Tracking: true }).await?;
        self.settle(guard).await
    }

    #[tracing::instrument(level = "debug", skip(self, guard), fields(device = self.core.name()))]
    async fn slew_altaz(&self, alt: f64, az: f64, guard: &MotionGuard<'_>) -> Result<()> {
        let client = self.core.client();

        self.set_offsets((0.0, 0.0));
        client.put("Tracking", params! { Tracking: false }).await?;
        client
            .put(
                "SlewToAltAzAsync",
                params! { Azimuth: self.convert_azimuth(az), Altitude: alt },
            )
            .await?;
        self.wait_for_slew(guard).await?;
        client.put("Tracking", params! { Tracking: false }).await?;
        self.settle(guard).await
    }

    /// Converts between Alpaca and North-based azimuth, in both directions.
    fn convert_azimuth(&self, az: f64) -> f64 {
        if self.azimuth_from_south { flip_azimuth(az) } else { az }
    }
}

async fn wait_until_not_slewing(mut status: watch::Receiver<MotionStatus>) -> bool {
    status
        .wait_for(|status| *status != MotionStatus::Slewing)
        .await
        .is_ok()
}

fn check_radec(ra: f64, dec: f64) -> Result<()> {
    let _ = check_range("Right ascension", ra, 0.0..=360.0)?;
    let _ = check_range("Declination", dec, -90.0..=90.0)?;
    Ok(())
}

#[async_trait::async_trait]
impl Device for AlpacaTelescope {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Telescope
    }

    fn is_connected(&self) -> bool {
        self.core.client().is_connected()
    }

    fn motion_status(&self) -> MotionStatus {
        self.core.status()
    }

    fn subscribe_motion_status(&self) -> watch::Receiver<MotionStatus> {
        self.core.motion().subscribe()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.core.subscribe_events()
    }

    async fn check_alive(&self) -> bool {
        self.core.client().check_connected().await
    }

    async fn open(&self) -> Result<()> {
        self.core.open().await;

        let status = self.fetch_status().await;
        if status == MotionStatus::Unknown {
            tracing::error!(device = self.core.name(), "Could not fetch initial status from telescope");
        }
        self.core.set_status(status);
        Ok(())
    }

    async fn init(&self) -> Result<()> {
        if self.core.status() == MotionStatus::Initializing {
            return Ok(());
        }

        let guard = self.core.lock().acquire().await;
        self.core.ensure_connected()?;

        tracing::info!(device = self.core.name(), "Initializing telescope...");
        self.core.set_status(MotionStatus::Initializing);

        let (alt, az) = INIT_ALTAZ;
        self.slew_altaz(alt, az, &guard)
            .await
            .map_err(|err| self.core.fail(err))?;

        self.core.set_status(MotionStatus::Idle);
        tracing::info!(device = self.core.name(), "Telescope initialized");
        Ok(())
    }

    async fn park(&self) -> Result<()> {
        if self.core.status() == MotionStatus::Parking {
            return Ok(());
        }

        let _guard = self.core.lock().acquire().await;
        self.core.ensure_connected()?;

        tracing::info!(device = self.core.name(), "Parking telescope...");
        self.core.set_status(MotionStatus::Parking);

        self.core
            .client()
            .put_with_timeout("Park", params! {}, PARK_TIMEOUT)
            .await
            .map_err(|err| self.core.fail(err))?;

        self.core.set_status(MotionStatus::Parked);
        tracing::info!(device = self.core.name(), "Telescope parked");
        Ok(())
    }

    async fn stop_motion(&self) -> Result<()> {
        self.core.lock().abort_current();

        let client = self.core.client();
        let result = async {
            client.put("AbortSlew", params! {}).await?;
            client.put("Tracking", params! { Tracking: false }).await
        }
        .await;

        match result {
            Ok(()) => {
                self.core.set_status(MotionStatus::Idle);
                Ok(())
            }
            Err(err) => Err(self.core.fail(err)),
        }
    }

    fn spawn_background(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let liveness = self.core.spawn_liveness(shutdown.clone());

        let status = tokio::spawn(async move {
            loop {
                if self.core.status() == MotionStatus::Unknown {
                    let status = self.fetch_status().await;
                    self.core.set_status(status);
                }
                if sleep_or_abort(&shutdown, self.status_interval).await.is_err() {
                    break;
                }
            }
        });

        vec![liveness, status]
    }
}

#[async_trait::async_trait]
impl Movable for AlpacaTelescope {
    async fn slew_to_coordinates(&self, ra: f64, dec: f64) -> Result<()> {
        check_radec(ra, dec)?;

        let _guard = self.core.lock().acquire().await;
        self.core.ensure_connected()?;

        tracing::info!(device = self.core.name(), ra, dec, "Slewing telescope...");
        self.core.set_status(MotionStatus::Slewing);
        self.set_offsets((0.0, 0.0));

        self.core
            .client()
            .put_with_timeout(
                "SlewToCoordinates",
                params! { RightAscension: ra / 15.0, Declination: dec },
                SYNC_SLEW_TIMEOUT,
            )
            .await
            .map_err(|err| self.core.fail(err))?;

        self.core.set_status(MotionStatus::Tracking);
        Ok(())
    }

    async fn abort_slew(&self) -> Result<()> {
        self.core.client().put("AbortSlew", params! {}).await
    }

    async fn is_slewing(&self) -> Result<bool> {
        self.core.client().get("Slewing").await
    }
}

#[async_trait::async_trait]
impl PointingRaDec for AlpacaTelescope {
    async fn move_radec(&self, ra: f64, dec: f64) -> Result<()> {
        check_radec(ra, dec)?;

        let guard = self.core.lock().acquire().await;
        self.core.ensure_connected()?;

        tracing::info!(device = self.core.name(), ra, dec, "Moving telescope to RA/Dec...");
        self.core.set_status(MotionStatus::Slewing);
        self.set_offsets((0.0, 0.0));

        self.slew_radec(ra, dec, &guard)
            .await
            .map_err(|err| self.core.fail(err))?;

        self.core.set_status(MotionStatus::Tracking);
        tracing::info!(device = self.core.name(), "Reached destination");
        Ok(())
    }

    async fn get_radec(&self) -> Result<(f64, f64)> {
        let client = self.core.client();
        let ra_hours = client.get::<f64>("RightAscension").await?;
        let dec = client.get::<f64>("Declination").await?;

        let (offset_ra, offset_dec) = self.offsets();
        let ra_off = offset_ra / dec.to_radians().cos();

        Ok(((ra_hours * 15.0 - ra_off).rem_euclid(360.0), dec - offset_dec))
    }
}

#[async_trait::async_trait]
impl PointingAltAz for AlpacaTelescope {
    async fn move_altaz(&self, alt: f64, az: f64) -> Result<()> {
        let _ = check_range("Altitude", alt, 0.0..=90.0)?;
        let _ = check_range("Azimuth", az, 0.0..=360.0)?;

        let guard = self.core.lock().acquire().await;
        self.core.ensure_connected()?;

        tracing::info!(device = self.core.name(), alt, az, "Moving telescope to Alt/Az...");
        self.core.set_status(MotionStatus::Slewing);

        self.slew_altaz(alt, az, &guard)
            .await
            .map_err(|err| self.core.fail(err))?;

        self.core.set_status(MotionStatus::Positioned);
        tracing::info!(device = self.core.name(), "Reached destination");
        Ok(())
    }

    async fn get_altaz(&self) -> Result<(f64, f64)> {
        let client = self.core.client();
        let alt = client.get::<f64>("Altitude").await?;
        let az = client.get::<f64>("Azimuth").await?;
        Ok((alt, self.convert_azimuth(az)))
    }
}

#[async_trait::async_trait]
impl OffsetsRaDec for AlpacaTelescope {
    async fn set_offsets_radec(&self, dra: f64, ddec: f64) -> Result<()> {
        let _ = check_range("RA offset", dra, -180.0..=180.0)?;
        let _ = check_range("Dec offset", ddec, -90.0..=90.0)?;

        let guard = self.core.lock().acquire().await;
        self.core.ensure_connected()?;

        tracing::info!(
            device = self.core.name(),
            "Setting telescope offsets to dRA={:.2}\", dDec={:.2}\"...",
            dra * 3600.0,
            ddec * 3600.0,
        );
        self.core.set_status(MotionStatus::Slewing);
        self.core.send_event(DeviceEvent::OffsetsRaDec { ra: dra, dec: ddec });

        let result = async {
            // current coordinates still carry the old offsets
            let (ra, dec) = self.get_radec().await?;
            let dec = check_range("Declination", dec + ddec, -90.0..=90.0)?;
            let ra = (ra + dra / (dec - ddec).to_radians().cos()).rem_euclid(360.0);
            self.set_offsets((dra, ddec));
            self.slew_radec(ra, dec, &guard).await
        }
        .await;
        result.map_err(|err| self.core.fail(err))?;

        self.core.set_status(MotionStatus::Tracking);
        tracing::info!(device = self.core.name(), "Reached destination");
        Ok(())
    }

    async fn get_offsets_radec(&self) -> Result<(f64, f64)> {
        Ok(self.offsets())
    }
}

#[async_trait::async_trait]
impl SyncTarget for AlpacaTelescope {
    async fn sync_target(&self) -> Result<()> {
        let (ra, dec) = self.get_radec().await?;

        self.core
            .client()
            .put(
                "SyncToCoordinates",
                params! { RightAscension: ra / 15.0, Declination: dec },
            )
            .await
    }
}

#[async_trait::async_trait]
impl FitsHeaderBefore for AlpacaTelescope {
    async fn fits_header_before(&self) -> FitsHeader {
        let (ra_off, dec_off) = self.offsets();

        FitsHeader::from([
            ("RAOFF".to_owned(), (json!(ra_off), "RA offset [deg]".to_owned())),
            ("DECOFF".to_owned(), (json!(dec_off), "Dec offset [deg]".to_owned())),
        ])
    }
}
