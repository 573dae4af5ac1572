//! In-process telemetry backend for hosts without a GPU.
//!
//! Deterministic by default so tests can assert exact records; `with_jitter`
//! adds random variation for a live demo run.

use crate::field::ErrorCode;
use crate::telemetry::{
    clock_event, ClockDomain, ComputeCapability, MemoryInfo, PciInfo, TelemetryApi,
    TelemetryDevice, Utilization,
};
use rand::Rng;
use std::collections::HashMap;

/// Identifies one vendor query, used to force failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    Name,
    PciInfo,
    Uuid,
    CurrentPcieLinkGen,
    MaxPcieLinkGen,
    CurrentPcieLinkWidth,
    MaxPcieLinkWidth,
    PersistenceMode,
    FanSpeed,
    PerformanceState,
    ClockEventReasons,
    MemoryInfo,
    ComputeCapability,
    Utilization,
    TemperatureGpu,
    PowerUsage,
    PowerLimit,
    Clock(ClockDomain),
}

#[derive(Debug, Clone)]
pub struct EmulatedDevice {
    pub name: String,
    pub uuid: String,
    pub pci: PciInfo,
    pub link_gen: (u32, u32),
    pub link_width: (u32, u32),
    pub persistence_mode: bool,
    pub fan_speed: u32,
    pub pstate: u32,
    pub clock_event_reasons: u64,
    pub memory: MemoryInfo,
    pub compute_capability: ComputeCapability,
    pub utilization: Utilization,
    pub temperature_gpu: u32,
    pub power_usage: u32,
    pub power_limit: u32,
    pub clocks: [u32; 4],
    failures: HashMap<Query, ErrorCode>,
    jitter: bool,
}

impl EmulatedDevice {
    /// An RTX 4090 on bus `bus`, idle, with software power capping active.
    pub fn rtx4090(bus: u32) -> Self {
        Self {
            name: "NVIDIA GeForce RTX 4090".to_string(),
            uuid: format!("GPU-{:08x}-4090-4090-4090-{:012x}", bus, bus),
            pci: PciInfo {
                domain: 0,
                bus,
                device: 0,
                pci_device_id: 0x2684_10de,
                bus_id: format!("00000000:{:02X}:00.0", bus),
            },
            link_gen: (4, 4),
            link_width: (16, 16),
            persistence_mode: true,
            fan_speed: 30,
            pstate: 8,
            clock_event_reasons: clock_event::SW_POWER_CAP,
            memory: MemoryInfo {
                total: 25_757_220_864,
                used: 1_073_741_824,
            },
            compute_capability: ComputeCapability { major: 8, minor: 9 },
            utilization: Utilization { gpu: 3, memory: 1 },
            temperature_gpu: 41,
            power_usage: 21_500,
            power_limit: 450_000,
            clocks: [210, 210, 405, 1185],
            failures: HashMap::new(),
            jitter: false,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_pci_device_id(mut self, device_id: u16) -> Self {
        self.pci.pci_device_id = ((device_id as u32) << 16) | 0x10de;
        self
    }

    /// Make `query` fail with `code` on every call.
    pub fn fail(mut self, query: Query, code: ErrorCode) -> Self {
        self.failures.insert(query, code);
        self
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    fn answer<T>(&self, query: Query, value: impl FnOnce() -> T) -> Result<T, ErrorCode> {
        match self.failures.get(&query) {
            Some(code) => Err(*code),
            None => Ok(value()),
        }
    }

    fn vary(&self, base: u32, spread: u32) -> u32 {
        if !self.jitter || spread == 0 {
            return base;
        }
        let mut rng = rand::thread_rng();
        base.saturating_add(rng.gen_range(0..=spread))
    }
}

impl TelemetryDevice for EmulatedDevice {
    fn name(&self) -> Result<String, ErrorCode> {
        self.answer(Query::Name, || self.name.clone())
    }

    fn pci_info(&self) -> Result<PciInfo, ErrorCode> {
        self.answer(Query::PciInfo, || self.pci.clone())
    }

    fn uuid(&self) -> Result<String, ErrorCode> {
        self.answer(Query::Uuid, || self.uuid.clone())
    }

    fn current_pcie_link_gen(&self) -> Result<u32, ErrorCode> {
        self.answer(Query::CurrentPcieLinkGen, || self.link_gen.0)
    }

    fn max_pcie_link_gen(&self) -> Result<u32, ErrorCode> {
        self.answer(Query::MaxPcieLinkGen, || self.link_gen.1)
    }

    fn current_pcie_link_width(&self) -> Result<u32, ErrorCode> {
        self.answer(Query::CurrentPcieLinkWidth, || self.link_width.0)
    }

    fn max_pcie_link_width(&self) -> Result<u32, ErrorCode> {
        self.answer(Query::MaxPcieLinkWidth, || self.link_width.1)
    }

    fn persistence_mode(&self) -> Result<bool, ErrorCode> {
        self.answer(Query::PersistenceMode, || self.persistence_mode)
    }

    fn fan_speed(&self) -> Result<u32, ErrorCode> {
        self.answer(Query::FanSpeed, || self.vary(self.fan_speed, 10))
    }

    fn performance_state(&self) -> Result<u32, ErrorCode> {
        self.answer(Query::PerformanceState, || self.pstate)
    }

    fn clock_event_reasons(&self) -> Result<u64, ErrorCode> {
        self.answer(Query::ClockEventReasons, || self.clock_event_reasons)
    }

    fn memory_info(&self) -> Result<MemoryInfo, ErrorCode> {
        self.answer(Query::MemoryInfo, || self.memory)
    }

    fn compute_capability(&self) -> Result<ComputeCapability, ErrorCode> {
        self.answer(Query::ComputeCapability, || self.compute_capability)
    }

    fn utilization(&self) -> Result<Utilization, ErrorCode> {
        self.answer(Query::Utilization, || Utilization {
            gpu: self.vary(self.utilization.gpu, 90).min(100),
            memory: self.vary(self.utilization.memory, 60).min(100),
        })
    }

    fn temperature_gpu(&self) -> Result<u32, ErrorCode> {
        self.answer(Query::TemperatureGpu, || self.vary(self.temperature_gpu, 30))
    }

    fn power_usage(&self) -> Result<u32, ErrorCode> {
        self.answer(Query::PowerUsage, || self.vary(self.power_usage, 300_000))
    }

    fn power_limit(&self) -> Result<u32, ErrorCode> {
        self.answer(Query::PowerLimit, || self.power_limit)
    }

    fn clock(&self, domain: ClockDomain) -> Result<u32, ErrorCode> {
        let slot = match domain {
            ClockDomain::Graphics => 0,
            ClockDomain::Sm => 1,
            ClockDomain::Memory => 2,
            ClockDomain::Video => 3,
        };
        self.answer(Query::Clock(domain), || self.clocks[slot])
    }
}

/// A fixed set of emulated devices, optionally with enumeration failures.
#[derive(Debug, Clone, Default)]
pub struct EmulatedTelemetry {
    devices: Vec<EmulatedDevice>,
    count_error: Option<ErrorCode>,
    handle_errors: HashMap<u32, ErrorCode>,
}

impl EmulatedTelemetry {
    pub fn new(devices: Vec<EmulatedDevice>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }

    /// `count` RTX 4090s on consecutive buses starting at 0x01.
    pub fn rtx4090s(count: u32, jitter: bool) -> Self {
        let devices = (0..count)
            .map(|i| {
                let dev = EmulatedDevice::rtx4090(i + 1);
                if jitter {
                    dev.with_jitter()
                } else {
                    dev
                }
            })
            .collect();
        Self::new(devices)
    }

    pub fn fail_device_count(mut self, code: ErrorCode) -> Self {
        self.count_error = Some(code);
        self
    }

    pub fn fail_handle(mut self, index: u32, code: ErrorCode) -> Self {
        self.handle_errors.insert(index, code);
        self
    }
}

impl TelemetryApi for EmulatedTelemetry {
    type Device<'a> = &'a EmulatedDevice;

    fn device_count(&self) -> Result<u32, ErrorCode> {
        match self.count_error {
            Some(code) => Err(code),
            None => Ok(self.devices.len() as u32),
        }
    }

    fn device_by_index(&self, index: u32) -> Result<&EmulatedDevice, ErrorCode> {
        if let Some(code) = self.handle_errors.get(&index) {
            return Err(*code);
        }
        self.devices
            .get(index as usize)
            .ok_or(ErrorCode::InvalidArgument)
    }
}
