use anyhow::Context;
use nvexport::config::{Backend, Config};
use nvexport::emulator::EmulatedTelemetry;
use nvexport::error::StartupError;
use nvexport::exporter::{self, Exporter};
use nvexport::logging;
use nvexport::registry::DeviceRegistry;
use nvexport::telemetry::TelemetryApi;
use nvml_wrapper::Nvml;
use std::io::{self, BufWriter};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

fn main() -> ExitCode {
    logging::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Every device handle, mapping and descriptor is already dropped here.
            eprintln!("nv_export: {err:#}");
            if let Some(hint) = err.downcast_ref::<StartupError>().and_then(StartupError::hint) {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(StartupError::from)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    exporter::register_shutdown_signals(&shutdown).context("registering signal handlers")?;

    match config.backend {
        Backend::Nvml => {
            let nvml = Nvml::init().map_err(|err| StartupError::TelemetryInit(err.to_string()))?;
            export(&nvml, &config, &shutdown)
        }
        Backend::Emulator { devices } => {
            info!("using the emulated backend with {devices} device(s)");
            let api = EmulatedTelemetry::rtx4090s(devices, true);
            export(&api, &config, &shutdown)
        }
    }
}

fn export<A: TelemetryApi>(api: &A, config: &Config, shutdown: &AtomicBool) -> anyhow::Result<()> {
    let registry: DeviceRegistry<A::Device<'_>> =
        DeviceRegistry::discover(api, &config.registry)?;

    let stdout = io::stdout();
    let mut exporter = Exporter::new(
        registry,
        BufWriter::new(stdout.lock()),
        config.measurement.as_str(),
    );
    exporter
        .run(config.interval, shutdown)
        .context("writing records to stdout")?;

    let (mut registry, _) = exporter.into_parts();
    registry.release();
    Ok(())
}
