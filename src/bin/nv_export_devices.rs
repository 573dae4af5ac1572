//! Prints the devices `nv_export` would sample, with their PCI and hardware
//! bindings, as JSON.

use anyhow::Context;
use nvexport::config::{Backend, Config};
use nvexport::emulator::EmulatedTelemetry;
use nvexport::logging;
use nvexport::registry::DeviceRegistry;
use nvexport::telemetry::TelemetryApi;
use nvml_wrapper::Nvml;

fn main() -> anyhow::Result<()> {
    logging::init();
    let config = Config::from_env()?;

    let json = match config.backend {
        Backend::Nvml => {
            let nvml = Nvml::init().context("initializing NVML")?;
            inventory_json(&nvml, &config)?
        }
        Backend::Emulator { devices } => {
            inventory_json(&EmulatedTelemetry::rtx4090s(devices, false), &config)?
        }
    };
    println!("{json}");
    Ok(())
}

fn inventory_json<A: TelemetryApi>(api: &A, config: &Config) -> anyhow::Result<String> {
    let registry: DeviceRegistry<A::Device<'_>> =
        DeviceRegistry::discover(api, &config.registry).context("building device registry")?;
    Ok(serde_json::to_string_pretty(&registry.inventory())?)
}
