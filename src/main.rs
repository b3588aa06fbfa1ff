//! droidwalk - Black-box UI exploration of Android applications
//!
//! This is the binary entry point. All logic lives in the workspace crates.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use droidwalk_app::config::ExplorationMode;
use droidwalk_app::{
    find_apks, load_settings, read_tested, resolve_bundles, select_leader, summarize,
    ArtifactStore, Orchestrator, SessionController, Settings, ToolAvailability,
};
use droidwalk_core::prelude::*;
use droidwalk_core::{logging, DeviceInfo, DeviceRole};
use droidwalk_device::{list_serials, Aapt, AdbDevice, DeviceControl, UiAutomator};

/// droidwalk - Black-box UI exploration of Android applications
#[derive(Parser, Debug)]
#[command(name = "droidwalk")]
#[command(about = "Explore Android apps on one or many devices", long_about = None)]
struct Args {
    /// An .apk file or a directory searched recursively for .apk files
    #[arg(value_name = "PATH")]
    path: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    // Settings come from .droidwalk/config.toml in the working directory
    let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let settings = load_settings(&base);
    settings.validate()?;

    logging::init(&settings.output.log_dir, settings.output.verbose)?;

    run(args.path, settings).await?;
    Ok(())
}

async fn run(path: PathBuf, settings: Settings) -> Result<()> {
    let tools = ToolAvailability::check(
        &settings.tools.adb,
        &settings.tools.aapt,
        &settings.tools.dot,
    );
    let (adb, aapt) = tools.require()?;
    if let Some(message) = tools.dot_unavailable_message() {
        warn!("{}", message);
    }

    let serials = list_serials(&adb).await?;
    if serials.is_empty() {
        return Err(Error::NoDevices);
    }

    let leader = match settings.run.mode {
        ExplorationMode::LeaderFollower => {
            Some(select_leader(settings.run.leader.as_deref(), &serials).await?)
        }
        ExplorationMode::Independent => None,
    };

    let mut devices = Vec::with_capacity(serials.len());
    for (i, serial) in serials.iter().enumerate() {
        let adb_device = AdbDevice::new(serial.clone(), adb.clone());
        let os_version = adb_device.os_version().await.unwrap_or_else(|e| {
            warn!("Cannot read OS version of {}: {}", serial, e);
            String::from("unknown")
        });
        let role = match leader {
            Some(l) if l == i => DeviceRole::Leader,
            Some(_) => DeviceRole::Follower,
            None => DeviceRole::Independent,
        };
        devices.push((adb_device, DeviceInfo::new(serial.clone(), os_version).with_role(role)));
    }

    let mut banner = settings.summary_lines();
    banner.push(format!(" - Devices ({}):", devices.len()));
    banner.extend(devices.iter().map(|(_, info)| format!("   {}", info.display_line())));
    logging::banner(&banner);

    let apks = find_apks(&path)?;
    let skip = if settings.run.skip_tested {
        read_tested(&settings.tested_pkgs_path())?
    } else {
        Default::default()
    };
    let apps = resolve_bundles(apks, &Aapt::new(aapt), &skip).await;
    if apps.is_empty() {
        return Err(Error::NoApplications { path });
    }

    let store = ArtifactStore::create(
        &settings.output.log_dir,
        settings.tested_pkgs_path(),
        tools.dot.clone(),
        settings.tools.render_diagrams,
    )?;

    let settings = Arc::new(settings);
    let sessions = devices
        .into_iter()
        .map(|(device, info)| {
            let snapshot = UiAutomator::new(info.serial.clone(), adb.clone());
            SessionController::new(device, snapshot, Arc::clone(&settings)).with_role(info.role)
        })
        .collect();

    let records = Orchestrator::new(sessions, settings, Arc::new(store))
        .run(apps)
        .await?;

    summarize(&records).log();
    Ok(())
}
