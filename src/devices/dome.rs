use super::DeviceCore;
use crate::api::{
    Device, DeviceEvent, DeviceKind, PointingAltAz, ShutterState, Shutterable, azimuth_distance,
    check_range, flip_azimuth,
};
use crate::config::{ConfigError, ConnectionConfig, DomeOptions};
use crate::motion::{MotionGuard, MotionLock, MotionStatus, sleep_or_abort};
use crate::params::params;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How many polls pass between two progress messages while rotating.
const LOG_EVERY: u32 = 10;

#[derive(Debug, Default)]
struct DomeState {
    altitude: f64,
    /// Last measured azimuth, North-based.
    azimuth: f64,
    /// Last requested azimuth, North-based.
    target: Option<f64>,
}

/// Dome with a rotating shutter behind an Alpaca server.
///
/// Rotation and shutter have separate motion locks, so the dome can rotate while the shutter opens.
#[derive(Debug)]
pub struct AlpacaDome {
    core: DeviceCore,
    shutter_lock: MotionLock,
    tolerance: f64,
    park_az: f64,
    follow: Option<String>,
    follow_interval: Duration,
    poll_interval: Duration,
    status_interval: Duration,
    azimuth_from_south: bool,
    following: AtomicBool,
    state: Mutex<DomeState>,
}

impl AlpacaDome {
    /// Creates the adapter; no request is made until [`Device::open`].
    pub fn new(
        name: &str,
        connection: &ConnectionConfig,
        options: &DomeOptions,
    ) -> Result<Self, ConfigError> {
        let timings = options.check(name)?;

        Ok(Self {
            core: DeviceCore::new(name, DeviceKind::Dome, connection)?,
            shutter_lock: MotionLock::default(),
            tolerance: options.tolerance,
            park_az: options.park_az,
            follow: options.follow.clone(),
            follow_interval: timings.follow_interval,
            poll_interval: timings.poll_interval,
            status_interval: timings.status_interval,
            azimuth_from_south: options.azimuth_from_south,
            following: AtomicBool::new(false),
            state: Mutex::new(DomeState::default()),
        })
    }

    /// Name of the telescope this dome follows.
    pub fn follow(&self) -> Option<&str> {
        self.follow.as_deref()
    }

    /// Whether a follow loop is currently running.
    pub fn is_following(&self) -> bool {
        self.following.load(Ordering::Relaxed)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DomeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Converts between Alpaca and North-based azimuth, in both directions.
    fn convert_azimuth(&self, az: f64) -> f64 {
        if self.azimuth_from_south { flip_azimuth(az) } else { az }
    }

    /// Reads the azimuth from the server and caches it.
    async fn refresh_azimuth(&self) -> Result<f64> {
        let az = self.core.client().get::<f64>("Azimuth").await?;
        let az = self.convert_azimuth(az);
        self.state().azimuth = az;
        Ok(az)
    }

    #[tracing::instrument(level = "debug", skip(self, guard), fields(device = self.core.name()))]
    async fn wait_for_shutter(&self, target: ShutterState, guard: &MotionGuard<'_>) -> Result<()> {
        loop {
            let state = self.shutter_state().await?;
            guard.check_aborted()?;
            match state {
                state if state == target => return Ok(()),
                ShutterState::Error => return Err(Error::ShutterFault),
                _ => guard.sleep(self.poll_interval).await?,
            }
        }
    }

    /// Finishes a shutter motion, marking the dome as failed on a fault.
    fn shutter_failed(&self, action: &str, err: Error) -> Error {
        if matches!(err, Error::ShutterFault) {
            tracing::error!(device = self.core.name(), "Could not {action} dome");
            self.core.set_status(MotionStatus::Error);
            err
        } else {
            self.core.fail(err)
        }
    }

    #[tracing::instrument(level = "debug", skip(self, guard), fields(device = self.core.name()))]
    async fn rotate(&self, az: f64, guard: &MotionGuard<'_>) -> Result<()> {
        self.core
            .client()
            .put("SlewToAzimuth", params! { Azimuth: self.convert_azimuth(az) })
            .await?;

        let mut polls = 0_u32;
        loop {
            let current = self.refresh_azimuth().await?;
            guard.check_aborted()?;

            let left = azimuth_distance(az, current);
            if left <= self.tolerance {
                break;
            }

            if polls % LOG_EVERY == 0 {
                tracing::info!(
                    device = self.core.name(),
                    "Moving dome from current az={current:.2}° to {az:.2}° ({left:.2}° left)..."
                );
            }
            polls += 1;

            guard.sleep(self.poll_interval).await?;
        }

        tracing::info!(device = self.core.name(), "Moved to az={az:.2}");
        Ok(())
    }

    /// Keeps the dome aligned with `leader` until `shutdown` fires.
    pub fn spawn_follow(
        self: Arc<Self>,
        leader: Arc<dyn PointingAltAz>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(device = self.core.name(), leader = leader.name(), "Following");
            self.following.store(true, Ordering::Relaxed);

            loop {
                if self.is_ready() {
                    match leader.get_altaz().await {
                        Ok((alt, az)) => {
                            let current = self.state().azimuth;
                            if azimuth_distance(az, current) > self.tolerance {
                                if let Err(err) = self.move_altaz(alt, az).await {
                                    tracing::warn!(device = self.core.name(), %err, "Could not follow");
                                }
                            }
                        }
                        Err(err) => {
                            tracing::debug!(
                                device = self.core.name(),
                                leader = leader.name(),
                                %err,
                                "Could not fetch position to follow"
                            );
                        }
                    }
                }

                if sleep_or_abort(&shutdown, self.follow_interval).await.is_err() {
                    break;
                }
            }

            self.following.store(false, Ordering::Relaxed);
        })
    }
}

#[async_trait::async_trait]
impl Device for AlpacaDome {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Dome
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

        if let Err(err) = self.refresh_azimuth().await {
            tracing::warn!(device = self.core.name(), %err, "Could not fetch initial azimuth");
        }
        self.core.set_status(MotionStatus::Idle);
        Ok(())
    }

    async fn init(&self) -> Result<()> {
        self.open_shutter().await
    }

    async fn park(&self) -> Result<()> {
        self.close_shutter().await
    }

    async fn stop_motion(&self) -> Result<()> {
        self.core.lock().abort_current();
        self.shutter_lock.abort_current();
        self.state().target = None;

        match self.core.status() {
            MotionStatus::Slewing | MotionStatus::Tracking => {
                self.core.set_status(MotionStatus::Idle);
            }
            MotionStatus::Initializing | MotionStatus::Parking => {
                self.core.set_status(MotionStatus::Unknown);
            }
            _ => {}
        }
        Ok(())
    }

    fn spawn_background(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let liveness = self.core.spawn_liveness(shutdown.clone());

        let azimuth = tokio::spawn(async move {
            loop {
                if let Err(err) = self.refresh_azimuth().await {
                    tracing::debug!(device = self.core.name(), %err, "Could not refresh azimuth");
                }
                if sleep_or_abort(&shutdown, self.status_interval).await.is_err() {
                    break;
                }
            }
        });

        vec![liveness, azimuth]
    }
}

#[async_trait::async_trait]
impl Shutterable for AlpacaDome {
    async fn open_shutter(&self) -> Result<()> {
        if self.core.status() == MotionStatus::Initializing {
            return Ok(());
        }

        let guard = self.shutter_lock.acquire().await;
        self.core.ensure_connected()?;

        tracing::info!(device = self.core.name(), "Opening dome...");
        self.core.set_status(MotionStatus::Initializing);

        let result = async {
            self.core.client().put("OpenShutter", params! {}).await?;
            self.wait_for_shutter(ShutterState::Open, &guard).await
        }
        .await;
        result.map_err(|err| self.shutter_failed("open", err))?;

        tracing::info!(device = self.core.name(), "Dome opened");
        self.core.set_status(MotionStatus::Positioned);
        self.core.send_event(DeviceEvent::RoofOpened);
        Ok(())
    }

    async fn close_shutter(&self) -> Result<()> {
        if self.core.status() == MotionStatus::Parking {
            return Ok(());
        }

        let guard = self.shutter_lock.acquire().await;
        self.core.ensure_connected()?;

        tracing::info!(device = self.core.name(), "Closing dome...");
        self.core.set_status(MotionStatus::Parking);
        self.core.send_event(DeviceEvent::RoofClosing);
        // stop following moves and forget the last target
        self.core.lock().abort_current();
        self.state().target = None;

        let result = async {
            let client = self.core.client();
            client.put("CloseShutter", params! {}).await?;
            client
                .put(
                    "SlewToAzimuth",
                    params! { Azimuth: self.convert_azimuth(self.park_az) },
                )
                .await?;
            self.wait_for_shutter(ShutterState::Closed, &guard).await
        }
        .await;
        result.map_err(|err| self.shutter_failed("close", err))?;

        tracing::info!(device = self.core.name(), "Dome closed");
        self.core.set_status(MotionStatus::Parked);
        Ok(())
    }

    async fn shutter_state(&self) -> Result<ShutterState> {
        self.core.client().get("ShutterStatus").await
    }
}

#[async_trait::async_trait]
impl PointingAltAz for AlpacaDome {
    async fn move_altaz(&self, alt: f64, az: f64) -> Result<()> {
        let _ = check_range("Altitude", alt, -90.0..=90.0)?;
        let az = check_range("Azimuth", az, 0.0..=360.0)?;

        if !self.is_ready() {
            tracing::debug!(device = self.core.name(), "Dome not ready, ignoring move");
            return Ok(());
        }

        let large_move = {
            let mut state = self.state();
            if state.target == Some(az) {
                return Ok(());
            }
            state.target = Some(az);
            azimuth_distance(az, state.azimuth) > 2.0 * self.tolerance
        };

        let tracking = self.is_following() && !large_move;

        let guard = self.core.lock().acquire().await;
        self.state().altitude = alt;
        self.core.set_status(if tracking {
            MotionStatus::Tracking
        } else {
            MotionStatus::Slewing
        });

        if let Err(err) = self.rotate(az, &guard).await {
            let mut state = self.state();
            // a newer move may already have replaced the target
            if state.target == Some(az) {
                state.target = None;
            }
            drop(state);
            return Err(self.core.fail(err));
        }

        self.core.set_status(if self.is_following() {
            MotionStatus::Tracking
        } else {
            MotionStatus::Positioned
        });
        Ok(())
    }

    async fn get_altaz(&self) -> Result<(f64, f64)> {
        let state = self.state();
        Ok((state.altitude, state.azimuth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockAlpaca;
    use serde_json::json;

    fn fast_options() -> DomeOptions {
        DomeOptions {
            poll_interval: 0.01,
            status_interval: 0.02,
            follow_interval: 0.05,
            ..DomeOptions::default()
        }
    }

    async fn dome(mock: &MockAlpaca) -> eyre::Result<AlpacaDome> {
        mock.set_value("azimuth", json!(0.0));
        mock.set_value("shutterstatus", json!(1));

        let dome = AlpacaDome::new("dome", &mock.connection(0), &fast_options())?;
        dome.open().await?;
        Ok(dome)
    }

    #[tokio::test]
    async fn open_reads_azimuth_from_south() -> eyre::Result<()> {
        let mock = MockAlpaca::start().await?;
        let dome = dome(&mock).await?;

        assert_eq!(dome.motion_status(), MotionStatus::Idle);
        let (_, az) = dome.get_altaz().await?;
        assert!((az - 180.0).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn open_shutter_polls_until_open() -> eyre::Result<()> {
        let mock = MockAlpaca::start().await?;
        let dome = Arc::new(dome(&mock).await?);
        mock.pin_value("shutterstatus", json!(i32::from(ShutterState::Opening)));

        let mut events = dome.subscribe_events();

        let opening = {
            let dome = Arc::clone(&dome);
            tokio::spawn(async move { dome.init().await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!opening.is_finished());
        assert_eq!(dome.motion_status(), MotionStatus::Initializing);
        assert!(mock.requests_to("shutterstatus").len() > 1);

        mock.unpin_value("shutterstatus");
        tokio::time::timeout(Duration::from_secs(2), opening).await???;

        assert_eq!(mock.requests_to("openshutter").len(), 1);
        assert_eq!(dome.motion_status(), MotionStatus::Positioned);
        assert!(dome.is_ready());
        assert_eq!(events.try_recv()?, DeviceEvent::RoofOpened);
        Ok(())
    }

    #[tokio::test]
    async fn close_shutter_parks_south() -> eyre::Result<()> {
        let mock = MockAlpaca::start().await?;
        let dome = dome(&mock).await?;
        dome.open_shutter().await?;
        let mut events = dome.subscribe_events();

        dome.park().await?;
        assert_eq!(events.try_recv()?, DeviceEvent::RoofClosing);

        let slews = mock.requests_to("slewtoazimuth");
        assert_eq!(slews.len(), 1);
        // park_az 180 in Alpaca's South-based azimuth
        assert_eq!(slews[0].params.get("Azimuth").map(String::as_str), Some("0"));
        assert_eq!(dome.shutter_state().await?, ShutterState::Closed);
        assert_eq!(dome.motion_status(), MotionStatus::Parked);
        assert!(!dome.is_ready());
        Ok(())
    }

    #[tokio::test]
    async fn shutter_error_is_a_fault() -> eyre::Result<()> {
        let mock = MockAlpaca::start().await?;
        let dome = dome(&mock).await?;
        mock.pin_value("shutterstatus", json!(i32::from(ShutterState::Error)));

        let err = dome.open_shutter().await.expect_err("shutter fault");
        assert!(matches!(err, Error::ShutterFault), "{err:?}");
        assert_eq!(dome.motion_status(), MotionStatus::Error);

        let err = dome.close_shutter().await.expect_err("shutter fault");
        assert!(matches!(err, Error::ShutterFault), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn move_altaz_waits_for_tolerance() -> eyre::Result<()> {
        let mock = MockAlpaca::start().await?;
        let dome = Arc::new(dome(&mock).await?);
        dome.open_shutter().await?;
        mock.pin_value("azimuth", json!(0.0));

        let moving = {
            let dome = Arc::clone(&dome);
            tokio::spawn(async move { dome.move_altaz(40.0, 90.0).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!moving.is_finished());
        assert_eq!(dome.motion_status(), MotionStatus::Slewing);
        let slews = mock.requests_to("slewtoazimuth");
        assert_eq!(slews[0].params.get("Azimuth").map(String::as_str), Some("270"));

        // 272° South-based is 92° North-based, inside the 3° tolerance
        mock.pin_value("azimuth", json!(272.0));
        tokio::time::timeout(Duration::from_secs(2), moving).await???;

        assert_eq!(dome.motion_status(), MotionStatus::Positioned);
        let (alt, az) = dome.get_altaz().await?;
        assert!((alt - 40.0).abs() < 1e-9);
        assert!((az - 92.0).abs() < 1e-9);

        // same target again is a no-op
        let before = mock.request_count();
        dome.move_altaz(40.0, 90.0).await?;
        assert_eq!(mock.request_count(), before);
        Ok(())
    }

    #[tokio::test]
    async fn superseded_move_keeps_newer_target() -> eyre::Result<()> {
        let mock = MockAlpaca::start().await?;
        let dome = Arc::new(dome(&mock).await?);
        dome.open_shutter().await?;
        mock.pin_value("azimuth", json!(0.0));

        let first = {
            let dome = Arc::clone(&dome);
            tokio::spawn(async move { dome.move_altaz(40.0, 90.0).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = {
            let dome = Arc::clone(&dome);
            tokio::spawn(async move { dome.move_altaz(40.0, 120.0).await })
        };
        let result = tokio::time::timeout(Duration::from_secs(2), first).await??;
        assert!(matches!(result, Err(Error::Aborted)), "{result:?}");
        tokio::time::sleep(Duration::from_millis(50)).await;

        // repeating the running move is still skipped
        let slews = mock.requests_to("slewtoazimuth").len();
        dome.move_altaz(40.0, 120.0).await?;
        assert_eq!(mock.requests_to("slewtoazimuth").len(), slews);

        // 300° South-based is 120° North-based
        mock.pin_value("azimuth", json!(300.0));
        tokio::time::timeout(Duration::from_secs(2), second).await???;
        assert_eq!(dome.motion_status(), MotionStatus::Positioned);
        Ok(())
    }

    #[tokio::test]
    async fn move_altaz_ignored_when_not_ready() -> eyre::Result<()> {
        let mock = MockAlpaca::start().await?;
        let dome = dome(&mock).await?;
        dome.park().await?;
        let before = mock.request_count();

        dome.move_altaz(40.0, 90.0).await?;

        assert_eq!(mock.request_count(), before);
        assert_eq!(dome.motion_status(), MotionStatus::Parked);
        Ok(())
    }

    #[tokio::test]
    async fn stop_motion_only_aborts_local_wait() -> eyre::Result<()> {
        let mock = MockAlpaca::start().await?;
        let dome = Arc::new(dome(&mock).await?);
        dome.open_shutter().await?;
        mock.pin_value("azimuth", json!(0.0));

        let moving = {
            let dome = Arc::clone(&dome);
            tokio::spawn(async move { dome.move_altaz(40.0, 90.0).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let before = mock.request_count();

        dome.stop_motion().await?;

        let result = tokio::time::timeout(Duration::from_secs(2), moving).await??;
        assert!(matches!(result, Err(Error::Aborted)), "{result:?}");
        assert_eq!(dome.motion_status(), MotionStatus::Idle);
        assert!(
            mock.requests()[before..]
                .iter()
                .all(|request| request.method == "GET")
        );
        Ok(())
    }

    #[derive(Debug)]
    struct FixedLeader {
        status: watch::Sender<MotionStatus>,
        events: broadcast::Sender<DeviceEvent>,
    }

    #[async_trait::async_trait]
    impl Device for FixedLeader {
        fn name(&self) -> &str {
            "leader"
        }
        fn kind(&self) -> DeviceKind {
            DeviceKind::Telescope
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn motion_status(&self) -> MotionStatus {
            MotionStatus::Tracking
        }
        fn subscribe_motion_status(&self) -> watch::Receiver<MotionStatus> {
            self.status.subscribe()
        }
        fn subscribe_events(&self) -> broadcast::Receiver<DeviceEvent> {
            self.events.subscribe()
        }
        async fn check_alive(&self) -> bool {
            true
        }
        async fn open(&self) -> Result<()> {
            Ok(())
        }
        async fn init(&self) -> Result<()> {
            Ok(())
        }
        async fn park(&self) -> Result<()> {
            Ok(())
        }
        async fn stop_motion(&self) -> Result<()> {
            Ok(())
        }
        fn spawn_background(self: Arc<Self>, _: CancellationToken) -> Vec<JoinHandle<()>> {
            Vec::new()
        }
    }

    #[async_trait::async_trait]
    impl PointingAltAz for FixedLeader {
        async fn move_altaz(&self, _alt: f64, _az: f64) -> Result<()> {
            Ok(())
        }
        async fn get_altaz(&self) -> Result<(f64, f64)> {
            Ok((50.0, 120.0))
        }
    }

    #[tokio::test]
    async fn follows_leader() -> eyre::Result<()> {
        let mock = MockAlpaca::start().await?;
        let dome = Arc::new(dome(&mock).await?);
        dome.open_shutter().await?;

        let leader = Arc::new(FixedLeader {
            status: watch::Sender::new(MotionStatus::Tracking),
            events: broadcast::Sender::new(1),
        });

        let shutdown = CancellationToken::new();
        let task = Arc::clone(&dome).spawn_follow(leader, shutdown.clone());

        let mut status = dome.subscribe_motion_status();
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|status| *status == MotionStatus::Tracking),
        )
        .await??;

        assert!(dome.is_following());
        let slews = mock.requests_to("slewtoazimuth");
        // 120° North-based is 300° South-based
        assert_eq!(slews[0].params.get("Azimuth").map(String::as_str), Some("300"));

        shutdown.cancel();
        task.await?;
        assert!(!dome.is_following());
        Ok(())
    }
}
