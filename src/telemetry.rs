//! Seam between the exporter and the vendor management library.
//!
//! Every query is independently fallible and reports the vendor
//! [`ErrorCode`] on failure. The exporter never assumes that one failed
//! query says anything about the next.

use crate::field::ErrorCode;
use serde::Serialize;

/// PCI location as reported by the telemetry API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PciInfo {
    pub domain: u32,
    pub bus: u32,
    pub device: u32,
    /// Combined id word: device id in the upper 16 bits, vendor id in the lower.
    pub pci_device_id: u32,
    pub bus_id: String,
}

impl PciInfo {
    pub fn device_id(&self) -> u16 {
        (self.pci_device_id >> 16) as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Utilization {
    pub gpu: u32,
    pub memory: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeCapability {
    pub major: i32,
    pub minor: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockDomain {
    Graphics,
    Sm,
    Memory,
    Video,
}

/// Clock event (throttle) reason bits, as defined by the vendor API.
pub mod clock_event {
    pub const SW_POWER_CAP: u64 = 0x0000_0000_0000_0004;
    pub const HW_SLOWDOWN: u64 = 0x0000_0000_0000_0008;
    pub const SYNC_BOOST: u64 = 0x0000_0000_0000_0010;
    pub const SW_THERMAL_SLOWDOWN: u64 = 0x0000_0000_0000_0020;
    pub const HW_THERMAL_SLOWDOWN: u64 = 0x0000_0000_0000_0040;
    pub const HW_POWER_BRAKE_SLOWDOWN: u64 = 0x0000_0000_0000_0080;
}

/// Per-device queries.
pub trait TelemetryDevice {
    fn name(&self) -> Result<String, ErrorCode>;
    fn pci_info(&self) -> Result<PciInfo, ErrorCode>;
    fn uuid(&self) -> Result<String, ErrorCode>;
    fn current_pcie_link_gen(&self) -> Result<u32, ErrorCode>;
    fn max_pcie_link_gen(&self) -> Result<u32, ErrorCode>;
    fn current_pcie_link_width(&self) -> Result<u32, ErrorCode>;
    fn max_pcie_link_width(&self) -> Result<u32, ErrorCode>;
    fn persistence_mode(&self) -> Result<bool, ErrorCode>;
    fn fan_speed(&self) -> Result<u32, ErrorCode>;
    fn performance_state(&self) -> Result<u32, ErrorCode>;
    fn clock_event_reasons(&self) -> Result<u64, ErrorCode>;
    fn memory_info(&self) -> Result<MemoryInfo, ErrorCode>;
    fn compute_capability(&self) -> Result<ComputeCapability, ErrorCode>;
    fn utilization(&self) -> Result<Utilization, ErrorCode>;
    fn temperature_gpu(&self) -> Result<u32, ErrorCode>;
    fn power_usage(&self) -> Result<u32, ErrorCode>;
    fn power_limit(&self) -> Result<u32, ErrorCode>;
    fn clock(&self, domain: ClockDomain) -> Result<u32, ErrorCode>;
}

/// Device enumeration. Handles may borrow the library context.
pub trait TelemetryApi {
    type Device<'a>: TelemetryDevice
    where
        Self: 'a;

    fn device_count(&self) -> Result<u32, ErrorCode>;
    fn device_by_index(&self, index: u32) -> Result<Self::Device<'_>, ErrorCode>;
}

impl<T: TelemetryDevice + ?Sized> TelemetryDevice for &T {
    fn name(&self) -> Result<String, ErrorCode> {
        (**self).name()
    }
    fn pci_info(&self) -> Result<PciInfo, ErrorCode> {
        (**self).pci_info()
    }
    fn uuid(&self) -> Result<String, ErrorCode> {
        (**self).uuid()
    }
    fn current_pcie_link_gen(&self) -> Result<u32, ErrorCode> {
        (**self).current_pcie_link_gen()
    }
    fn max_pcie_link_gen(&self) -> Result<u32, ErrorCode> {
        (**self).max_pcie_link_gen()
    }
    fn current_pcie_link_width(&self) -> Result<u32, ErrorCode> {
        (**self).current_pcie_link_width()
    }
    fn max_pcie_link_width(&self) -> Result<u32, ErrorCode> {
        (**self).max_pcie_link_width()
    }
    fn persistence_mode(&self) -> Result<bool, ErrorCode> {
        (**self).persistence_mode()
    }
    fn fan_speed(&self) -> Result<u32, ErrorCode> {
        (**self).fan_speed()
    }
    fn performance_state(&self) -> Result<u32, ErrorCode> {
        (**self).performance_state()
    }
    fn clock_event_reasons(&self) -> Result<u64, ErrorCode> {
        (**self).clock_event_reasons()
    }
    fn memory_info(&self) -> Result<MemoryInfo, ErrorCode> {
        (**self).memory_info()
    }
    fn compute_capability(&self) -> Result<ComputeCapability, ErrorCode> {
        (**self).compute_capability()
    }
    fn utilization(&self) -> Result<Utilization, ErrorCode> {
        (**self).utilization()
    }
    fn temperature_gpu(&self) -> Result<u32, ErrorCode> {
        (**self).temperature_gpu()
    }
    fn power_usage(&self) -> Result<u32, ErrorCode> {
        (**self).power_usage()
    }
    fn power_limit(&self) -> Result<u32, ErrorCode> {
        (**self).power_limit()
    }
    fn clock(&self, domain: ClockDomain) -> Result<u32, ErrorCode> {
        (**self).clock(domain)
    }
}
