//! keyseize CLI
//!
//! Validates configuration, lists input devices and drives the running
//! daemon through its control socket.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;

use keyseize_config::{Config, DeviceClass};
use keyseize_daemon::ipc::{default_socket_path, IpcRequest, IpcResponse};
use keyseize_daemon::platform::matches_class;

#[derive(Parser, Debug)]
#[command(name = "keyseize")]
#[command(about = "Control tool for the keyseize daemon")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/keyseize/config.kdl")]
    config: String,

    /// Control socket path (defaults to $XDG_RUNTIME_DIR/keyseize.sock)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// List input devices and whether they would be captured
    Devices,

    /// Show daemon status
    Status,

    /// Ask the daemon to seize devices
    Grab,

    /// Ask the daemon to release devices
    Ungrab,

    /// Map one key to another
    Remap {
        /// Source key name (e.g. caps_lock)
        from: String,
        /// Replacement key name (e.g. escape)
        to: String,
    },

    /// Remove every simple modification
    ClearRemaps,

    /// Set the caps lock LED on every captured device
    CapsLockLed {
        #[arg(value_enum)]
        state: LedArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LedArg {
    On,
    Off,
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();
    let socket_path = cli.socket.unwrap_or_else(default_socket_path);

    match cli.command {
        Commands::Validate => cmd_validate(&config_path),
        Commands::Devices => cmd_devices(&config_path),
        Commands::Status => cmd_status(&socket_path),
        Commands::Grab => cmd_simple(&socket_path, IpcRequest::Grab),
        Commands::Ungrab => cmd_simple(&socket_path, IpcRequest::Ungrab),
        Commands::Remap { from, to } => {
            cmd_simple(&socket_path, IpcRequest::AddSimpleModification { from, to })
        }
        Commands::ClearRemaps => cmd_simple(&socket_path, IpcRequest::ClearSimpleModifications),
        Commands::CapsLockLed { state } => cmd_simple(
            &socket_path,
            IpcRequest::SetCapsLockLed {
                on: matches!(state, LedArg::On),
            },
        ),
    }
}

fn load_config(config_path: &Path) -> miette::Result<Config> {
    keyseize_config::parse_config(config_path).map_err(miette::Report::new)
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = load_config(config_path)?;
    println!("Configuration is valid!");
    println!("  Log level: {}", config.global.log_level.as_filter());
    println!(
        "  Grab retry interval: {}ms",
        config.global.grab_retry_interval_ms
    );
    println!("  Device classes:");
    for class in &config.devices.classes {
        let (page, usage) = class.usage_pair();
        println!("    - {:?} ({:#04x}, {:#04x})", class, page, usage);
    }
    println!(
        "  Simple modifications: {}",
        config.simple_modifications.len()
    );
    for modification in &config.simple_modifications {
        println!("    - {} -> {}", modification.from, modification.to);
    }
    Ok(())
}

fn cmd_devices(config_path: &Path) -> miette::Result<()> {
    let config = load_config(config_path)?;
    println!("Available input devices (* = captured):\n");

    let mut paths: Vec<PathBuf> = std::fs::read_dir("/dev/input")
        .into_diagnostic()?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("event"))
        })
        .collect();
    paths.sort();

    for path in paths {
        let Ok(device) = evdev::Device::open(&path) else {
            continue;
        };

        let name = device.name().unwrap_or("Unknown");
        let id = device.input_id();
        let classes: Vec<DeviceClass> = [
            DeviceClass::Keyboard,
            DeviceClass::Keypad,
            DeviceClass::ConsumerControl,
        ]
        .into_iter()
        .filter(|class| matches_class(&device, *class))
        .collect();
        let captured = classes
            .iter()
            .any(|class| config.devices.classes.contains(class));

        println!("{} {}", if captured { "*" } else { " " }, name);
        println!("    Path: {}", path.display());
        println!("    ID: {:04x}:{:04x}", id.vendor(), id.product());
        if !classes.is_empty() {
            println!("    Classes: {:?}", classes);
        }
        println!();
    }

    Ok(())
}

fn cmd_status(socket_path: &Path) -> miette::Result<()> {
    match send_request(socket_path, &IpcRequest::Status)? {
        IpcResponse::Status {
            grabbed,
            available,
            retry_count,
            simple_modifications,
            devices,
        } => {
            if !available {
                println!("Device notifications unavailable; grabbing is disabled");
            }
            println!("Grabbed: {}", if grabbed { "yes" } else { "no" });
            if !grabbed && retry_count > 0 {
                println!("Grab attempts waiting: {}", retry_count);
            }

            println!("\nDevices:");
            if devices.is_empty() {
                println!("  (none)");
            }
            for device in devices {
                println!(
                    "  {} [{:?}{}]",
                    device.info.product.as_deref().unwrap_or("Unknown"),
                    device.mode,
                    if device.exempt { ", exempt" } else { "" },
                );
                println!("    {}", device.info);
            }

            println!("\nSimple modifications:");
            if simple_modifications.is_empty() {
                println!("  (none)");
            }
            for entry in simple_modifications {
                println!("  {} -> {}", entry.from, entry.to);
            }
            Ok(())
        }
        IpcResponse::Error { message } => Err(miette::miette!("{}", message)),
        other => Err(miette::miette!("Unexpected response: {:?}", other)),
    }
}

fn cmd_simple(socket_path: &Path, request: IpcRequest) -> miette::Result<()> {
    match send_request(socket_path, &request)? {
        IpcResponse::Success { message } => {
            println!("{}", message.as_deref().unwrap_or("ok"));
            Ok(())
        }
        IpcResponse::Error { message } => Err(miette::miette!("{}", message)),
        other => Err(miette::miette!("Unexpected response: {:?}", other)),
    }
}

fn send_request(socket_path: &Path, request: &IpcRequest) -> miette::Result<IpcResponse> {
    let mut stream = UnixStream::connect(socket_path).map_err(|e| {
        miette::miette!(
            "Failed to connect to {}: {}. Is keyseized running?",
            socket_path.display(),
            e
        )
    })?;

    let request_json = serde_json::to_string(request).into_diagnostic()?;
    tracing::debug!("Sending request: {}", request_json);
    stream.write_all(request_json.as_bytes()).into_diagnostic()?;
    stream.write_all(b"\n").into_diagnostic()?;
    stream.flush().into_diagnostic()?;

    let mut line = String::new();
    BufReader::new(stream)
        .read_line(&mut line)
        .into_diagnostic()?;
    tracing::debug!("Received response: {}", line.trim());

    serde_json::from_str(line.trim()).into_diagnostic()
}
