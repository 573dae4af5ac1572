//! NVML backend built on `nvml-wrapper`. The library is loaded at runtime,
//! so this compiles on hosts without the driver.

use crate::field::ErrorCode;
use crate::telemetry::{
    ClockDomain, ComputeCapability, MemoryInfo, PciInfo, TelemetryApi, TelemetryDevice,
    Utilization,
};
use nvml_wrapper::enum_wrappers::device::{Clock, PerformanceState, TemperatureSensor};
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::{Device, Nvml};

impl From<NvmlError> for ErrorCode {
    fn from(err: NvmlError) -> Self {
        match err {
            NvmlError::Uninitialized => ErrorCode::Uninitialized,
            NvmlError::InvalidArg => ErrorCode::InvalidArgument,
            NvmlError::NotSupported => ErrorCode::NotSupported,
            NvmlError::NoPermission => ErrorCode::NoPermission,
            NvmlError::NotFound => ErrorCode::NotFound,
            NvmlError::InsufficientSize(_) => ErrorCode::InsufficientSize,
            NvmlError::InsufficientPower => ErrorCode::InsufficientPower,
            NvmlError::DriverNotLoaded => ErrorCode::DriverNotLoaded,
            NvmlError::Timeout => ErrorCode::Timeout,
            NvmlError::GpuLost => ErrorCode::GpuIsLost,
            NvmlError::NoData => ErrorCode::NoData,
            _ => ErrorCode::Unknown,
        }
    }
}

fn pstate_number(state: PerformanceState) -> u32 {
    match state {
        PerformanceState::Zero => 0,
        PerformanceState::One => 1,
        PerformanceState::Two => 2,
        PerformanceState::Three => 3,
        PerformanceState::Four => 4,
        PerformanceState::Five => 5,
        PerformanceState::Six => 6,
        PerformanceState::Seven => 7,
        PerformanceState::Eight => 8,
        PerformanceState::Nine => 9,
        PerformanceState::Ten => 10,
        PerformanceState::Eleven => 11,
        PerformanceState::Twelve => 12,
        PerformanceState::Thirteen => 13,
        PerformanceState::Fourteen => 14,
        PerformanceState::Fifteen => 15,
        PerformanceState::Unknown => 32,
    }
}

impl TelemetryApi for Nvml {
    type Device<'a> = Device<'a>;

    fn device_count(&self) -> Result<u32, ErrorCode> {
        Ok(Nvml::device_count(self)?)
    }

    fn device_by_index(&self, index: u32) -> Result<Device<'_>, ErrorCode> {
        Ok(Nvml::device_by_index(self, index)?)
    }
}

impl TelemetryDevice for Device<'_> {
    fn name(&self) -> Result<String, ErrorCode> {
        Ok(Device::name(self)?)
    }

    fn pci_info(&self) -> Result<PciInfo, ErrorCode> {
        let info = Device::pci_info(self)?;
        Ok(PciInfo {
            domain: info.domain,
            bus: info.bus,
            device: info.device,
            pci_device_id: info.pci_device_id,
            bus_id: info.bus_id,
        })
    }

    fn uuid(&self) -> Result<String, ErrorCode> {
        Ok(Device::uuid(self)?)
    }

    fn current_pcie_link_gen(&self) -> Result<u32, ErrorCode> {
        Ok(Device::current_pcie_link_gen(self)?)
    }

    fn max_pcie_link_gen(&self) -> Result<u32, ErrorCode> {
        Ok(Device::max_pcie_link_gen(self)?)
    }

    fn current_pcie_link_width(&self) -> Result<u32, ErrorCode> {
        Ok(Device::current_pcie_link_width(self)?)
    }

    fn max_pcie_link_width(&self) -> Result<u32, ErrorCode> {
        Ok(Device::max_pcie_link_width(self)?)
    }

    fn persistence_mode(&self) -> Result<bool, ErrorCode> {
        Ok(Device::is_in_persistent_mode(self)?)
    }

    fn fan_speed(&self) -> Result<u32, ErrorCode> {
        Ok(Device::fan_speed(self, 0)?)
    }

    fn performance_state(&self) -> Result<u32, ErrorCode> {
        Ok(pstate_number(Device::performance_state(self)?))
    }

    fn clock_event_reasons(&self) -> Result<u64, ErrorCode> {
        Ok(Device::current_throttle_reasons(self)?.bits())
    }

    fn memory_info(&self) -> Result<MemoryInfo, ErrorCode> {
        let mem = Device::memory_info(self)?;
        Ok(MemoryInfo {
            total: mem.total,
            used: mem.used,
        })
    }

    fn compute_capability(&self) -> Result<ComputeCapability, ErrorCode> {
        let cap = Device::cuda_compute_capability(self)?;
        Ok(ComputeCapability {
            major: cap.major,
            minor: cap.minor,
        })
    }

    fn utilization(&self) -> Result<Utilization, ErrorCode> {
        let util = Device::utilization_rates(self)?;
        Ok(Utilization {
            gpu: util.gpu,
            memory: util.memory,
        })
    }

    fn temperature_gpu(&self) -> Result<u32, ErrorCode> {
        Ok(Device::temperature(self, TemperatureSensor::Gpu)?)
    }

    fn power_usage(&self) -> Result<u32, ErrorCode> {
        Ok(Device::power_usage(self)?)
    }

    fn power_limit(&self) -> Result<u32, ErrorCode> {
        Ok(Device::power_management_limit(self)?)
    }

    fn clock(&self, domain: ClockDomain) -> Result<u32, ErrorCode> {
        let clock = match domain {
            ClockDomain::Graphics => Clock::Graphics,
            ClockDomain::Sm => Clock::SM,
            ClockDomain::Memory => Clock::Memory,
            ClockDomain::Video => Clock::Video,
        };
        Ok(Device::clock_info(self, clock)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nvml_errors_map_to_vendor_codes() {
        assert_eq!(ErrorCode::from(NvmlError::NotSupported), ErrorCode::NotSupported);
        assert_eq!(ErrorCode::from(NvmlError::GpuLost), ErrorCode::GpuIsLost);
        assert_eq!(ErrorCode::from(NvmlError::InsufficientSize(None)), ErrorCode::InsufficientSize);
        assert_eq!(ErrorCode::from(NvmlError::Unknown), ErrorCode::Unknown);
    }

    #[test]
    fn pstates_are_numbered() {
        assert_eq!(pstate_number(PerformanceState::Zero), 0);
        assert_eq!(pstate_number(PerformanceState::Eight), 8);
    }
}
