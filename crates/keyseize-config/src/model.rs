//! Configuration data model

/// Root configuration structure
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: GlobalConfig,
    pub devices: DeviceMatchConfig,
    /// Simple 1:1 key modifications, in file order (later entries win)
    pub simple_modifications: Vec<SimpleModification>,
}

/// Global settings
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub log_level: LogLevel,
    /// Period of the grab readiness check
    pub grab_retry_interval_ms: u64,
    /// Manufacturer string that marks the daemon's own virtual device
    pub synthetic_manufacturer: String,
    /// Name given to the virtual output keyboard
    pub virtual_device_name: String,
}

pub const DEFAULT_GRAB_RETRY_INTERVAL_MS: u64 = 100;
pub const DEFAULT_SYNTHETIC_MANUFACTURER: &str = "keyseize";

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            grab_retry_interval_ms: DEFAULT_GRAB_RETRY_INTERVAL_MS,
            synthetic_manufacturer: DEFAULT_SYNTHETIC_MANUFACTURER.to_string(),
            virtual_device_name: DEFAULT_SYNTHETIC_MANUFACTURER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// HID device classes the daemon watches for, as (usage page, usage)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// Generic Desktop / Keyboard
    Keyboard,
    /// Generic Desktop / Keypad
    Keypad,
    /// Consumer / Consumer Control
    ConsumerControl,
}

impl DeviceClass {
    pub fn usage_pair(&self) -> (u32, u32) {
        match self {
            Self::Keyboard => (0x01, 0x06),
            Self::Keypad => (0x01, 0x07),
            Self::ConsumerControl => (0x0C, 0x01),
        }
    }
}

impl std::str::FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyboard" => Ok(Self::Keyboard),
            "keypad" => Ok(Self::Keypad),
            "consumer-control" | "consumer_control" => Ok(Self::ConsumerControl),
            _ => Err(format!("Unknown device class: {}", s)),
        }
    }
}

/// Which devices are matched for capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMatchConfig {
    pub classes: Vec<DeviceClass>,
}

impl Default for DeviceMatchConfig {
    fn default() -> Self {
        Self {
            classes: vec![DeviceClass::Keyboard],
        }
    }
}

/// A single from -> to key modification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleModification {
    pub from: String,
    pub to: String,
}
