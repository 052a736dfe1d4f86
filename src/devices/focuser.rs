use super::DeviceCore;
use crate::api::{
    Device, DeviceEvent, DeviceKind, FitsHeader, FitsHeaderBefore, Focusable, check_range,
};
use crate::config::{ConfigError, ConnectionConfig, FocuserOptions};
use crate::motion::{MotionGuard, MotionStatus};
use crate::params::params;
use crate::{Error, Result};
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Converts a focus in millimetres into focuser steps of `step_size` microns.
pub(crate) fn mm_to_steps(mm: f64, step_size: f64) -> f64 {
    mm * 1000.0 / step_size
}

/// Converts focuser steps of `step_size` microns into millimetres.
pub(crate) fn steps_to_mm(steps: f64, step_size: f64) -> f64 {
    steps * step_size / 1000.0
}

/// Absolute focuser behind an Alpaca server.
#[derive(Debug)]
pub struct AlpacaFocuser {
    core: DeviceCore,
    poll_interval: Duration,
    position_tolerance: u32,
    /// Focus offset in millimetres.
    offset: Mutex<f64>,
}

impl AlpacaFocuser {
    /// Creates the adapter; no request is made until [`Device::open`].
    pub fn new(
        name: &str,
        connection: &ConnectionConfig,
        options: &FocuserOptions,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            core: DeviceCore::new(name, DeviceKind::Focuser, connection)?,
            poll_interval: options.poll_interval(name)?,
            position_tolerance: options.position_tolerance,
            offset: Mutex::new(0.0),
        })
    }

    fn offset(&self) -> f64 {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_offset(&self, offset: f64) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) = offset;
    }

    async fn step_size(&self) -> Result<f64> {
        let step_size = self.core.client().get::<f64>("StepSize").await?;
        if step_size > 0.0 {
            Ok(step_size)
        } else {
            Err(Error::invalid_value(format_args!(
                "focuser reports a step size of {step_size}"
            )))
        }
    }

    /// Focus including the offset, in millimetres.
    async fn raw_focus(&self) -> Result<f64> {
        let client = self.core.client();
        let position = client.get::<i32>("Position").await?;
        let step_size = self.step_size().await?;
        Ok(steps_to_mm(position.into(), step_size))
    }

    /// Moves to `focus` (offset already applied).
    async fn move_to(&self, focus: f64) -> Result<()> {
        let focus = check_range("Focus", focus, 0.0..=f64::MAX)?;

        let guard = self.core.lock().acquire().await;
        self.core.ensure_connected()?;

        tracing::info!(device = self.core.name(), "Moving focus to {focus:.2}mm...");
        self.core.set_status(MotionStatus::Slewing);

        let reached = self
            .move_and_wait(focus, &guard)
            .await
            .map_err(|err| self.core.fail(err))?;

        tracing::info!(device = self.core.name(), "Reached new focus of {reached:.2}mm");
        self.core.set_status(MotionStatus::Positioned);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, guard), fields(device = self.core.name()))]
    async fn move_and_wait(&self, focus: f64, guard: &MotionGuard<'_>) -> Result<f64> {
        let client = self.core.client();
        let step_size = self.step_size().await?;

        let target = mm_to_steps(focus, step_size).round();
        if !(0.0..=f64::from(i32::MAX)).contains(&target) {
            return Err(Error::invalid_value(format_args!(
                "focus of {focus}mm is outside of the focuser range"
            )));
        }
        #[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
        let target = target as i32;

        client.put("Move", params! { Position: target }).await?;

        loop {
            let position = client.get::<i32>("Position").await?;
            guard.check_aborted()?;
            if position.abs_diff(target) <= self.position_tolerance {
                return Ok(steps_to_mm(position.into(), step_size));
            }
            guard.sleep(self.poll_interval).await?;
        }
    }
}

#[async_trait::async_trait]
impl Device for AlpacaFocuser {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Focuser
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
        self.core.set_status(MotionStatus::Idle);
        Ok(())
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn park(&self) -> Result<()> {
        Ok(())
    }

    async fn stop_motion(&self) -> Result<()> {
        self.core.lock().abort_current();
        self.core.client().put("Halt", params! {}).await?;
        self.core.set_status(MotionStatus::Idle);
        Ok(())
    }

    fn spawn_background(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![self.core.spawn_liveness(shutdown)]
    }
}

#[async_trait::async_trait]
impl Focusable for AlpacaFocuser {
    async fn set_focus(&self, focus: f64) -> Result<()> {
        self.move_to(focus + self.offset()).await
    }

    async fn get_focus(&self) -> Result<f64> {
        Ok(self.raw_focus().await? - self.offset())
    }

    async fn set_focus_offset(&self, offset: f64) -> Result<()> {
        let offset = check_range("Focus offset", offset, f64::MIN..=f64::MAX)?;

        let focus = self.get_focus().await?;
        self.set_offset(offset);
        self.move_to(focus + offset).await
    }

    async fn get_focus_offset(&self) -> Result<f64> {
        Ok(self.offset())
    }
}

#[async_trait::async_trait]
impl FitsHeaderBefore for AlpacaFocuser {
    async fn fits_header_before(&self) -> FitsHeader {
        match self.raw_focus().await {
            Ok(focus) => FitsHeader::from([(
                "TEL-FOCU".to_owned(),
                (json!(focus), "Focus of telescope [mm]".to_owned()),
            )]),
            Err(err) => {
                tracing::warn!(device = self.core.name(), %err, "Could not determine focus position");
                FitsHeader::new()
            }
        }
    }
}
