use crate::config::ConfigError;
use crate::field::ErrorCode;
#[cfg(feature = "dram")]
use crate::register::RegisterError;
use thiserror::Error;

/// Conditions that stop the exporter before the first record is written.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to initialize the telemetry library: {0}")]
    TelemetryInit(String),

    #[error("failed to get device count: {0}")]
    DeviceCount(ErrorCode),

    #[error("failed to get handle for device {index}: {code}")]
    DeviceHandle { index: u32, code: ErrorCode },

    #[error("failed to get PCI info for device {index}: {code}")]
    DevicePci { index: u32, code: ErrorCode },

    #[cfg(feature = "dram")]
    #[error("PCI scan failed: {0}")]
    PciScan(String),

    #[cfg(feature = "dram")]
    #[error("cannot access physical memory: {0}")]
    PhysicalMemory(#[source] RegisterError),

    #[cfg(feature = "dram")]
    #[error("no hardware metadata for device {index} at {bus_id} ({reason})")]
    UnknownHardware {
        index: u32,
        bus_id: String,
        reason: String,
    },

    #[cfg(feature = "dram")]
    #[error("memory mapping failed for device {index} at {bus_id}: {source}")]
    Mapping {
        index: u32,
        bus_id: String,
        #[source]
        source: RegisterError,
    },
}

impl StartupError {
    /// Operator hint printed after the diagnostic, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            StartupError::TelemetryInit(_) => Some("Is the NVIDIA driver installed and loaded?"),
            #[cfg(feature = "dram")]
            StartupError::PhysicalMemory(RegisterError::PermissionDenied { .. }) => {
                Some("Physical memory access requires root.")
            }
            #[cfg(feature = "dram")]
            StartupError::UnknownHardware { .. } => Some(
                "Add an entry to the hardware table, set NVEXPORT_UNKNOWN_DEVICE=skip, \
                 or build without the `dram` feature.",
            ),
            #[cfg(feature = "dram")]
            StartupError::Mapping { .. } => Some("Did you boot with iomem=relaxed? Are you root?"),
            _ => None,
        }
    }
}
