//! The set of devices the exporter samples, built once before the first tick.
//!
//! With the `dram` feature each telemetry device is also paired with its
//! PCI bus entry, its hardware metadata and, when possible, a mapping of
//! the page holding its memory temperature register.

use crate::config::RegistryConfig;
use crate::error::StartupError;
use crate::telemetry::{PciInfo, TelemetryApi, TelemetryDevice};
use serde::Serialize;
use tracing::info;

#[cfg(feature = "dram")]
use crate::config::{PciMatch, RegisterTelemetry, UnknownDevicePolicy};
#[cfg(feature = "dram")]
use crate::hardware::{self, HardwareMetadata, NVIDIA_VENDOR_ID};
#[cfg(feature = "dram")]
use crate::pci::{self, PciEntry, PciScanner, SysfsScanner};
#[cfg(feature = "dram")]
use crate::register::{self, MemoryMapping, PhysicalMemory, RegisterSource};
#[cfg(feature = "dram")]
use tracing::warn;

/// Physical layout resolved for one device.
#[cfg(feature = "dram")]
#[derive(Debug)]
pub struct HardwareBinding {
    pub pci_bus: u8,
    pub pci_device: u8,
    pub pci_function: u8,
    pub bar0_base: u32,
    pub physical_register_address: Option<u32>,
    pub metadata: &'static HardwareMetadata,
    pub mapping: Option<MemoryMapping>,
}

#[derive(Debug)]
pub struct ManagedDevice<D> {
    pub index: u32,
    pub handle: D,
    pub pci: PciInfo,
    #[cfg(feature = "dram")]
    pub hardware: Option<HardwareBinding>,
}

impl<D> ManagedDevice<D> {
    /// The live register mapping, if this device has one.
    #[cfg(feature = "dram")]
    pub fn register(&self) -> Option<&MemoryMapping> {
        self.hardware.as_ref().and_then(|hw| hw.mapping.as_ref())
    }
}

#[derive(Debug)]
pub struct DeviceRegistry<D> {
    devices: Vec<ManagedDevice<D>>,
    #[cfg(feature = "dram")]
    memory: Option<PhysicalMemory>,
}

/// Acquires a handle and PCI location for every device the API reports.
/// Any failure here is fatal.
pub fn enumerate<'a, A: TelemetryApi>(
    api: &'a A,
) -> Result<Vec<ManagedDevice<A::Device<'a>>>, StartupError> {
    let count = api.device_count().map_err(StartupError::DeviceCount)?;
    let mut devices = Vec::with_capacity(count as usize);
    for index in 0..count {
        let handle = api
            .device_by_index(index)
            .map_err(|code| StartupError::DeviceHandle { index, code })?;
        let pci = handle
            .pci_info()
            .map_err(|code| StartupError::DevicePci { index, code })?;
        devices.push(ManagedDevice {
            index,
            handle,
            pci,
            #[cfg(feature = "dram")]
            hardware: None,
        });
    }
    Ok(devices)
}

impl<D: TelemetryDevice> DeviceRegistry<D> {
    /// Builds the registry from the live system.
    pub fn discover<'a, A>(api: &'a A, config: &RegistryConfig) -> Result<Self, StartupError>
    where
        A: TelemetryApi<Device<'a> = D>,
    {
        #[cfg(feature = "dram")]
        {
            let scanner = SysfsScanner::new(&config.pci_root);
            Self::discover_with(api, config, &scanner)
        }
        #[cfg(not(feature = "dram"))]
        {
            let _ = config;
            let devices = enumerate(api)?;
            info!("managing {} device(s)", devices.len());
            Ok(Self { devices })
        }
    }

    /// Like [`discover`](Self::discover) with an explicit PCI scanner.
    #[cfg(feature = "dram")]
    pub fn discover_with<'a, A, S>(
        api: &'a A,
        config: &RegistryConfig,
        scanner: &S,
    ) -> Result<Self, StartupError>
    where
        A: TelemetryApi<Device<'a> = D>,
        S: PciScanner + ?Sized,
    {
        let mut registry = Self {
            devices: enumerate(api)?,
            memory: None,
        };
        info!("managing {} device(s)", registry.devices.len());

        let required = match config.register_telemetry {
            RegisterTelemetry::Off => {
                info!("register telemetry disabled");
                return Ok(registry);
            }
            RegisterTelemetry::Required => true,
            RegisterTelemetry::Optional => false,
        };

        let entries = match scanner.scan() {
            Ok(entries) => entries,
            Err(err) if required => return Err(StartupError::PciScan(format!("{err:#}"))),
            Err(err) => {
                warn!("PCI scan failed, register telemetry disabled: {err:#}");
                return Ok(registry);
            }
        };
        let memory = match PhysicalMemory::open(&config.mem_path) {
            Ok(memory) => memory,
            Err(err) if required => return Err(StartupError::PhysicalMemory(err)),
            Err(err) => {
                warn!("register telemetry disabled: {err}");
                return Ok(registry);
            }
        };

        for device in registry.devices.iter_mut() {
            let (entry, metadata) = match resolve(&device.pci, &entries, config.pci_match) {
                Ok(found) => found,
                Err(reason) => match config.unknown_device {
                    UnknownDevicePolicy::Fail => {
                        return Err(StartupError::UnknownHardware {
                            index: device.index,
                            bus_id: device.pci.bus_id.clone(),
                            reason,
                        })
                    }
                    UnknownDevicePolicy::Skip => {
                        warn!(
                            "device {} at {}: {reason}; memory temperature disabled",
                            device.index, device.pci.bus_id
                        );
                        continue;
                    }
                },
            };

            // Computed once; None when BAR0 + offset leaves the 32-bit window.
            let (physical_register_address, mapped) =
                match register::register_address(entry.bar0, metadata.register_offset) {
                    Ok(address) => (Some(address), memory.map(address)),
                    Err(err) => (None, Err(err)),
                };
            let mapping = match mapped {
                Ok(mapping) => Some(mapping),
                Err(source) if required => {
                    return Err(StartupError::Mapping {
                        index: device.index,
                        bus_id: device.pci.bus_id.clone(),
                        source,
                    })
                }
                Err(source) => {
                    warn!(
                        "device {} at {}: {source}; memory temperature disabled",
                        device.index, device.pci.bus_id
                    );
                    None
                }
            };

            info!(
                "device {} at {} is {} ({}, {}), register {}",
                device.index,
                entry.slot(),
                metadata.marketing_name,
                metadata.architecture,
                metadata.memory_technology,
                physical_register_address
                    .map(|address| format!("{address:#x}"))
                    .unwrap_or_else(|| "out of range".to_string())
            );
            device.hardware = Some(HardwareBinding {
                pci_bus: entry.bus,
                pci_device: entry.dev,
                pci_function: entry.func,
                bar0_base: entry.bar0 as u32,
                physical_register_address,
                metadata,
                mapping,
            });
        }

        registry.memory = Some(memory);
        Ok(registry)
    }
}

impl<D> DeviceRegistry<D> {
    pub fn devices(&self) -> &[ManagedDevice<D>] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Unmaps every register page and closes the memory device. Returns the
    /// number of mappings released; later calls release nothing.
    pub fn release(&mut self) -> usize {
        #[cfg(feature = "dram")]
        {
            let mut released = 0;
            for device in self.devices.iter_mut() {
                if let Some(mapping) = device.hardware.as_mut().and_then(|hw| hw.mapping.take()) {
                    drop(mapping);
                    released += 1;
                }
            }
            if self.memory.take().is_some() {
                info!("released {released} register mapping(s)");
            }
            released
        }
        #[cfg(not(feature = "dram"))]
        {
            0
        }
    }
}

impl<D> Drop for DeviceRegistry<D> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(feature = "dram")]
fn resolve<'e>(
    pci: &PciInfo,
    entries: &'e [PciEntry],
    rule: PciMatch,
) -> Result<(&'e PciEntry, &'static HardwareMetadata), String> {
    let entry = entries
        .iter()
        .filter(|e| e.vendor_id == NVIDIA_VENDOR_ID)
        .find(|e| pci_matches(pci, e, rule))
        .ok_or_else(|| "no matching PCI bus entry".to_string())?;
    let metadata = hardware::lookup(entry.device_id)
        .ok_or_else(|| format!("PCI device id {:#06x} is not in the hardware table", entry.device_id))?;
    Ok((entry, metadata))
}

/// Pairs a telemetry-reported location with a scanned bus entry.
///
/// `Compat` compares the reported domain against the entry's function, which
/// on single-segment hosts (domain 0) only matches function 0. `Strict`
/// compares the full address, taking the function from the bus id string;
/// a bus id that does not parse matches nothing.
#[cfg(feature = "dram")]
pub fn pci_matches(pci: &PciInfo, entry: &PciEntry, rule: PciMatch) -> bool {
    let same_slot = pci.bus == entry.bus as u32 && pci.device == entry.dev as u32;
    match rule {
        PciMatch::Compat => same_slot && pci.domain == entry.func as u32,
        PciMatch::Strict => match pci::parse_slot(&pci.bus_id) {
            Some((_, _, _, func)) => {
                same_slot && pci.domain == entry.domain as u32 && func == entry.func
            }
            None => false,
        },
    }
}

/// Serializable description of one managed device.
#[derive(Debug, Clone, Serialize)]
pub struct InventoryEntry {
    pub index: u32,
    pub bus_id: String,
    pub pci_device_id: String,
    pub name: Option<String>,
    pub uuid: Option<String>,
    #[cfg(feature = "dram")]
    pub hardware: Option<HardwareSummary>,
}

#[cfg(feature = "dram")]
#[derive(Debug, Clone, Serialize)]
pub struct HardwareSummary {
    pub slot: String,
    pub bar0_base: String,
    pub physical_register_address: Option<String>,
    pub metadata: HardwareMetadata,
    pub mapped: bool,
    pub temperature_memory: Option<u32>,
}

impl<D: TelemetryDevice> DeviceRegistry<D> {
    pub fn inventory(&self) -> Vec<InventoryEntry> {
        self.devices
            .iter()
            .map(|device| InventoryEntry {
                index: device.index,
                bus_id: device.pci.bus_id.clone(),
                pci_device_id: format!("{:#06x}", device.pci.device_id()),
                name: device.handle.name().ok(),
                uuid: device.handle.uuid().ok(),
                #[cfg(feature = "dram")]
                hardware: device.hardware.as_ref().map(|hw| HardwareSummary {
                    slot: format!("{:02x}:{:02x}.{:x}", hw.pci_bus, hw.pci_device, hw.pci_function),
                    bar0_base: format!("{:#010x}", hw.bar0_base),
                    physical_register_address: hw
                        .physical_register_address
                        .map(|address| format!("{address:#010x}")),
                    metadata: hw.metadata.clone(),
                    mapped: hw.mapping.is_some(),
                    temperature_memory: hw.mapping.as_ref().map(|m| m.temperature()),
                }),
            })
            .collect()
    }
}

#[cfg(all(test, feature = "dram"))]
mod tests {
    use super::*;

    fn nv_pci(domain: u32, bus: u32, device: u32, bus_id: &str) -> PciInfo {
        PciInfo {
            domain,
            bus,
            device,
            pci_device_id: 0x2684_10de,
            bus_id: bus_id.to_string(),
        }
    }

    fn entry(domain: u16, bus: u8, dev: u8, func: u8) -> PciEntry {
        PciEntry {
            domain,
            bus,
            dev,
            func,
            vendor_id: NVIDIA_VENDOR_ID,
            device_id: 0x2684,
            class: 0x030000,
            bar0: 0xfb00_0000,
        }
    }

    #[test]
    fn compat_pairs_domain_with_function() {
        let pci = nv_pci(0, 1, 0, "00000000:01:00.0");
        assert!(pci_matches(&pci, &entry(0, 1, 0, 0), PciMatch::Compat));
        // The audio function on the same slot never pairs.
        assert!(!pci_matches(&pci, &entry(0, 1, 0, 1), PciMatch::Compat));
        // Domain is not compared as a domain.
        assert!(pci_matches(&pci, &entry(3, 1, 0, 0), PciMatch::Compat));
    }

    #[test]
    fn strict_compares_full_address() {
        let pci = nv_pci(1, 0x41, 0, "00000001:41:00.0");
        assert!(pci_matches(&pci, &entry(1, 0x41, 0, 0), PciMatch::Strict));
        assert!(!pci_matches(&pci, &entry(0, 0x41, 0, 0), PciMatch::Strict));
        // Compat would look for function 1 here.
        assert!(!pci_matches(&pci, &entry(1, 0x41, 0, 0), PciMatch::Compat));
    }

    #[test]
    fn strict_never_guesses_function_from_bad_bus_id() {
        for bus_id in ["", "garbage", "0000:41:00"] {
            let pci = nv_pci(0, 0x41, 0, bus_id);
            assert!(!pci_matches(&pci, &entry(0, 0x41, 0, 0), PciMatch::Strict), "{bus_id:?}");
        }
    }

    #[test]
    fn resolve_reports_unknown_ids() {
        let pci = nv_pci(0, 1, 0, "00000000:01:00.0");
        let mut unknown = entry(0, 1, 0, 0);
        unknown.device_id = 0x1db6;
        let err = resolve(&pci, &[unknown], PciMatch::Compat).unwrap_err();
        assert!(err.contains("0x1db6"));

        let err = resolve(&pci, &[], PciMatch::Compat).unwrap_err();
        assert!(err.contains("no matching"));
    }

    #[test]
    fn resolve_ignores_other_vendors() {
        let pci = nv_pci(0, 1, 0, "00000000:01:00.0");
        let mut other = entry(0, 1, 0, 0);
        other.vendor_id = 0x8086;
        assert!(resolve(&pci, &[other], PciMatch::Compat).is_err());
    }
}
