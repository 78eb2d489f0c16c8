//! keyseize daemon
//!
//! Seizes keyboards and feeds their keys through the simple remapping
//! engine to a virtual keyboard.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use keyseize_config::{Config, LogLevel};
use keyseize_daemon::engine::{HostCapsLock, SimpleRemapEngine, VirtualKeyRepeat};
use keyseize_daemon::injector::create_shared_virtual_keyboard;
use keyseize_daemon::ipc::IpcServer;
use keyseize_daemon::platform::{self, EvdevDevice, HotplugOptions};
use keyseize_daemon::{Clients, DeviceGrabberHandle, GrabberOptions, KeyCode, SimpleModifications};

#[derive(Parser, Debug)]
#[command(name = "keyseized")]
#[command(about = "Device-capture daemon for host-level keyboard remapping")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/keyseize/config.kdl")]
    config: String,

    /// Override the configured log level
    #[arg(short, long)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();
    let config = keyseize_config::parse_config(&config_path).with_context(|| {
        format!("Failed to load configuration from {}", config_path.display())
    })?;

    let level = args.log_level.unwrap_or(config.global.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter())),
        )
        .init();

    tracing::info!("Loaded configuration from {}", config_path.display());

    let simple_modifications = load_simple_modifications(&config)?;
    tracing::info!(
        "Loaded {} simple modification(s)",
        simple_modifications.len()
    );

    let keyboard = create_shared_virtual_keyboard(&config.global.virtual_device_name)
        .context("Failed to create virtual keyboard. Is /dev/uinput accessible?")?;

    let caps_lock = HostCapsLock::new();
    let clients = Clients {
        engine: Box::new(SimpleRemapEngine::new(
            simple_modifications.clone(),
            caps_lock.clone(),
            keyboard.clone(),
        )),
        hid_system: Box::new(caps_lock),
        console_user: Box::new(VirtualKeyRepeat::new(keyboard)),
    };

    let (handle, grabber_task) = DeviceGrabberHandle::<EvdevDevice>::spawn(
        clients,
        GrabberOptions::from_config(&config.global),
        simple_modifications,
    );

    let server = IpcServer::new()?;
    tokio::spawn(server.serve(handle.clone()));

    let hotplug = platform::watch_devices(
        handle.clone(),
        HotplugOptions {
            classes: config.devices.classes.clone(),
            synthetic_manufacturer: config.global.synthetic_manufacturer.clone(),
        },
    );
    tokio::pin!(hotplug);

    handle.grab_devices();
    tracing::info!("keyseize daemon started");

    tokio::select! {
        result = &mut hotplug => {
            match result {
                Ok(()) => tracing::warn!("Hot-plug monitoring stopped"),
                Err(e) => {
                    tracing::error!("{}", e);
                    handle.mark_unavailable();
                }
            }
            tokio::signal::ctrl_c().await?;
        }
        result = tokio::signal::ctrl_c() => {
            result?;
        }
    }

    tracing::info!("Shutting down...");

    handle.ungrab_devices();
    handle.shutdown();
    grabber_task.await.context("Device grabber task failed")?;

    Ok(())
}

fn load_simple_modifications(config: &Config) -> Result<SimpleModifications> {
    let table = SimpleModifications::new();
    for modification in &config.simple_modifications {
        let from: KeyCode = modification
            .from
            .parse()
            .map_err(anyhow::Error::msg)?;
        let to: KeyCode = modification.to.parse().map_err(anyhow::Error::msg)?;
        table.set(from, to);
    }
    Ok(table)
}
