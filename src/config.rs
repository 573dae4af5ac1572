use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_MEASUREMENT: &str = "nv_export";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MEM_PATH: &str = "/dev/mem";
pub const DEFAULT_PCI_ROOT: &str = "/sys/bus/pci/devices";
const DEFAULT_EMULATED_DEVICES: u32 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var} (expected one of: {expected})")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Whether the register-derived memory temperature is collected, and
/// whether failing to set it up stops the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterTelemetry {
    #[default]
    Required,
    Optional,
    Off,
}

impl FromStr for RegisterTelemetry {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" | "on" => Ok(Self::Required),
            "optional" => Ok(Self::Optional),
            "off" | "disabled" => Ok(Self::Off),
            _ => Err(()),
        }
    }
}

/// What to do with a device whose PCI id has no hardware metadata entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownDevicePolicy {
    #[default]
    Fail,
    Skip,
}

impl FromStr for UnknownDevicePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" | "strict" => Ok(Self::Fail),
            "skip" | "degrade" => Ok(Self::Skip),
            _ => Err(()),
        }
    }
}

/// How a telemetry-reported PCI location is paired with a scanned entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PciMatch {
    /// bus == bus, device == dev, telemetry domain == scanned function.
    #[default]
    Compat,
    /// Full domain:bus:device.function comparison.
    Strict,
}

impl FromStr for PciMatch {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compat" => Ok(Self::Compat),
            "strict" => Ok(Self::Strict),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Nvml,
    Emulator { devices: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub register_telemetry: RegisterTelemetry,
    pub unknown_device: UnknownDevicePolicy,
    pub pci_match: PciMatch,
    pub mem_path: PathBuf,
    pub pci_root: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            register_telemetry: RegisterTelemetry::default(),
            unknown_device: UnknownDevicePolicy::default(),
            pci_match: PciMatch::default(),
            mem_path: PathBuf::from(DEFAULT_MEM_PATH),
            pci_root: PathBuf::from(DEFAULT_PCI_ROOT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub interval: Duration,
    pub measurement: String,
    pub backend: Backend,
    pub registry: RegistryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            measurement: DEFAULT_MEASUREMENT.to_string(),
            backend: Backend::Nvml,
            registry: RegistryConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();

        if let Some(raw) = lookup("NVEXPORT_INTERVAL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => cfg.interval = Duration::from_millis(ms),
                _ => warn!("ignoring NVEXPORT_INTERVAL_MS={raw:?}, using {:?}", DEFAULT_INTERVAL),
            }
        }
        if let Some(m) = lookup("NVEXPORT_MEASUREMENT").filter(|m| !m.trim().is_empty()) {
            cfg.measurement = m.trim().to_string();
        }

        cfg.backend = match lookup("NVEXPORT_BACKEND") {
            None => Backend::Nvml,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "nvml" => Backend::Nvml,
                "emulator" | "fake" | "dummy" => Backend::Emulator {
                    devices: lookup("NVEXPORT_EMULATED_DEVICES")
                        .and_then(|s| s.trim().parse::<u32>().ok())
                        .unwrap_or(DEFAULT_EMULATED_DEVICES),
                },
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "NVEXPORT_BACKEND",
                        value: raw,
                        expected: "nvml, emulator",
                    })
                }
            },
        };

        cfg.registry.register_telemetry = parse_var(
            &lookup,
            "NVEXPORT_REGISTER_TELEMETRY",
            "required, optional, off",
        )?
        .unwrap_or_default();
        cfg.registry.unknown_device =
            parse_var(&lookup, "NVEXPORT_UNKNOWN_DEVICE", "fail, skip")?.unwrap_or_default();
        cfg.registry.pci_match =
            parse_var(&lookup, "NVEXPORT_PCI_MATCH", "compat, strict")?.unwrap_or_default();
        if let Some(path) = lookup("NVEXPORT_MEM_PATH") {
            cfg.registry.mem_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("NVEXPORT_PCI_ROOT") {
            cfg.registry.pci_root = PathBuf::from(path);
        }

        if matches!(cfg.backend, Backend::Emulator { .. })
            && cfg.registry.register_telemetry != RegisterTelemetry::Off
        {
            warn!("emulator backend has no physical devices; register telemetry disabled");
            cfg.registry.register_telemetry = RegisterTelemetry::Off;
        }

        Ok(cfg)
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str, expected: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw.parse::<T>().map(Some).map_err(|_| ConfigError::Invalid {
            var,
            value: raw,
            expected,
        }),
    }
}
