//! Command-line control of the devices listed in a configuration file.
//!
//! ```bash
//! alpaca-ctl --config observatory.toml status
//! alpaca-ctl --config observatory.toml slew telescope 83.63 22.01
//! alpaca-ctl --config observatory.toml watch
//! ```

use clap::{Parser, Subcommand};
use eyre::{OptionExt, bail};
use futures::stream::SelectAll;
use futures::{Stream, StreamExt};
use obs_alpaca::api::{
    Device, FitsHeaderBefore, Focusable, PointingAltAz, PointingRaDec, Shutterable,
};
use obs_alpaca::{MotionStatus, ObservatoryConfig, Registry, TypedDevice};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(version, about = "Control Alpaca telescopes, focusers and domes")]
struct Args {
    /// Path to the TOML configuration.
    #[arg(short, long, default_value = "observatory.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print connection, motion status and position of every device.
    Status,
    /// Move a telescope to RA/Dec in degrees and start tracking.
    Slew { device: String, ra: f64, dec: f64 },
    /// Move a telescope or dome to Alt/Az in degrees.
    Altaz { device: String, alt: f64, az: f64 },
    /// Move a focuser to the given focus in millimetres.
    Focus { device: String, mm: f64 },
    /// Open the shutter of a dome.
    Open { device: String },
    /// Close the shutter of a dome.
    Close { device: String },
    /// Park a device.
    Park { device: String },
    /// Stop the motion of a device.
    Stop { device: String },
    /// Run all background loops and print motion status changes until Ctrl+C.
    Watch,
}

fn lookup<'registry>(
    registry: &'registry Registry,
    name: &str,
) -> eyre::Result<&'registry TypedDevice> {
    registry
        .get(name)
        .ok_or_else(|| eyre::eyre!("no device named {name:?} in configuration"))
}

async fn print_status(name: &str, device: &TypedDevice) {
    let general = device.as_device();
    println!(
        "{name} ({}): connected={}, status={}",
        device.kind(),
        general.is_connected(),
        general.motion_status()
    );

    let details = match *device {
        TypedDevice::Telescope(ref telescope) => telescope
            .get_radec()
            .await
            .map(|(ra, dec)| format!("RA={ra:.4}° Dec={dec:.4}°")),
        TypedDevice::Focuser(ref focuser) => {
            let header = focuser.fits_header_before().await;
            focuser
                .get_focus()
                .await
                .map(|focus| format!("focus={focus:.3}mm header={header:?}"))
        }
        TypedDevice::Dome(ref dome) => match dome.shutter_state().await {
            Ok(shutter) => dome
                .get_altaz()
                .await
                .map(|(_, az)| format!("shutter={shutter:?} az={az:.2}°")),
            Err(err) => Err(err),
        },
    };

    match details {
        Ok(details) => println!("  {details}"),
        Err(err) => println!("  unavailable: {err}"),
    }
}

async fn watch(registry: &Registry) -> eyre::Result<()> {
    let shutdown = CancellationToken::new();
    let tasks = registry.start(&shutdown);

    let mut changes = registry
        .devices()
        .map(|device| {
            let name = device.name().to_owned();
            status_changes(device).map(move |status| (name.clone(), status))
        })
        .collect::<SelectAll<_>>();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some((name, status)) = changes.next() => println!("{name}: {status}"),
        }
    }

    shutdown.cancel();
    for task in tasks {
        task.await?;
    }
    Ok(())
}

/// Stream of motion status changes of one device.
fn status_changes(device: Arc<dyn Device>) -> impl Stream<Item = MotionStatus> + Unpin {
    let receiver = device.subscribe_motion_status();
    Box::pin(futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.changed().await.ok()?;
        let status = *receiver.borrow_and_update();
        Some((status, receiver))
    }))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = ObservatoryConfig::load(&args.config)?;
    let registry = Registry::from_config(&config)?;
    registry.open_all().await?;

    match args.command {
        Command::Status => {
            for (name, device) in registry.iter() {
                print_status(name, device).await;
            }
        }
        Command::Slew { device, ra, dec } => {
            let telescope = registry
                .telescope(&device)
                .ok_or_eyre("slew needs a telescope")?;
            telescope.move_radec(ra, dec).await?;
        }
        Command::Altaz { device, alt, az } => match *lookup(&registry, &device)? {
            TypedDevice::Telescope(ref telescope) => telescope.move_altaz(alt, az).await?,
            TypedDevice::Dome(ref dome) => dome.move_altaz(alt, az).await?,
            TypedDevice::Focuser(_) => bail!("{device} cannot move to Alt/Az"),
        },
        Command::Focus { device, mm } => {
            let focuser = registry
                .focuser(&device)
                .ok_or_eyre("focus needs a focuser")?;
            focuser.set_focus(mm).await?;
        }
        Command::Open { device } => {
            let dome = registry.dome(&device).ok_or_eyre("open needs a dome")?;
            dome.open_shutter().await?;
        }
        Command::Close { device } => {
            let dome = registry.dome(&device).ok_or_eyre("close needs a dome")?;
            dome.close_shutter().await?;
        }
        Command::Park { device } => lookup(&registry, &device)?.as_device().park().await?,
        Command::Stop { device } => {
            lookup(&registry, &device)?
                .as_device()
                .stop_motion()
                .await?;
        }
        Command::Watch => watch(&registry).await?,
    }

    Ok(())
}
