use nvexport::config::{RegisterTelemetry, RegistryConfig};
use nvexport::emulator::{EmulatedDevice, EmulatedTelemetry, Query};
use nvexport::exporter::Exporter;
use nvexport::field::ErrorCode;
use nvexport::line_protocol::render;
use nvexport::registry::DeviceRegistry;
use nvexport::snapshot::capture;

const TS: i64 = 1_700_000_000_000_000_000;

const RTX4090_FIELDS: &str = "dev_id=9860,pcie_link_gen_current=4,pcie_link_gen_max=4,\
pcie_link_width_current=16,pcie_link_width_max=16,persistence_mode=1,fan_speed=30,pstate=8,\
clock_throttle_reason_sw_power_cap=true,clock_throttle_reason_hw_slowdown=false,\
clock_throttle_reason_hw_thermal_slowdown=false,clock_throttle_reason_hw_power_brake_slowdown=false,\
clock_throttle_reason_sw_thermal_slowdown=false,clock_throttle_reason_sync_boost=false,\
memory_total=25757220864u,memory_used=1073741824u,compute_cap=\"8.9\",\
utilization_gpu=3,utilization_memory=1,temperature_gpu=41,power_draw=21500,power_limit=450000,\
clocks_gr=210,clocks_sm=210,clocks_mem=405,clocks_video=1185";

const RTX4090_TAGS: &str = r"index=0,name=NVIDIA\ GeForce\ RTX\ 4090,bus_id=00000000:01:00.0,uuid=GPU-00000001-4090-4090-4090-000000000001";

fn no_registers() -> RegistryConfig {
    RegistryConfig {
        register_telemetry: RegisterTelemetry::Off,
        ..RegistryConfig::default()
    }
}

#[test]
fn renders_full_rtx4090_record() {
    let snap = capture(&EmulatedDevice::rtx4090(1), 0, TS);
    assert_eq!(
        render("nv_export", &snap),
        format!("nv_export,{RTX4090_TAGS} {RTX4090_FIELDS} {TS}\n")
    );
}

#[test]
fn unsupported_fan_moves_to_errors() {
    let dev = EmulatedDevice::rtx4090(1).fail(Query::FanSpeed, ErrorCode::NotSupported);
    let line = render("nv_export", &capture(&dev, 0, TS));
    assert!(!line.contains("fan_speed=30"));
    assert!(line.contains(",pstate=8,"));
    assert!(line.ends_with(&format!(
        ",clocks_video=1185,errors=\"fan_speed (NVML_ERROR_NOT_SUPPORTED)\" {TS}\n"
    )));
}

#[test]
fn awkward_names_are_escaped_in_tags() {
    let dev = EmulatedDevice::rtx4090(1).with_name("Lab GPU, rack=3");
    let line = render("nv export", &capture(&dev, 0, TS));
    assert!(line.starts_with(r"nv\ export,index=0,name=Lab\ GPU\,\ rack\=3,bus_id="));
}

#[test]
fn lost_uuid_drops_tag_and_reports_it() {
    let dev = EmulatedDevice::rtx4090(1).fail(Query::Uuid, ErrorCode::GpuIsLost);
    let line = render("nv_export", &capture(&dev, 0, TS));
    assert!(line.starts_with(r"nv_export,index=0,name=NVIDIA\ GeForce\ RTX\ 4090,bus_id=00000000:01:00.0 dev_id="));
    assert!(line.contains("errors=\"uuid (NVML_ERROR_GPU_IS_LOST)\""));
}

#[test]
fn exporter_writes_one_line_per_device_per_tick() {
    let api = EmulatedTelemetry::rtx4090s(2, false);
    let registry: DeviceRegistry<&EmulatedDevice> =
        DeviceRegistry::discover(&api, &no_registers()).unwrap();
    let mut exporter = Exporter::new(registry, Vec::new(), "nv_export");
    exporter.tick_at(TS).unwrap();
    exporter.tick_at(TS + 1_000_000_000).unwrap();
    assert_eq!(exporter.ticks(), 2);

    let (_, out) = exporter.into_parts();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("nv_export,index=0,"));
    assert!(lines[1].starts_with("nv_export,index=1,"));
    assert!(lines[1].contains("bus_id=00000000:02:00.0"));
    // Devices in one tick share the tick's timestamp.
    assert!(lines[0].ends_with(&format!(" {TS}")));
    assert!(lines[1].ends_with(&format!(" {TS}")));
    assert!(lines[3].ends_with(&format!(" {}", TS + 1_000_000_000)));
}

#[test]
fn timestamps_never_decrease_across_ticks() {
    let api = EmulatedTelemetry::rtx4090s(1, false);
    let registry: DeviceRegistry<&EmulatedDevice> =
        DeviceRegistry::discover(&api, &no_registers()).unwrap();
    let mut exporter = Exporter::new(registry, Vec::new(), "nv_export");
    exporter.tick_at(TS).unwrap();
    exporter.tick_at(TS - 5).unwrap();

    let (_, out) = exporter.into_parts();
    let text = String::from_utf8(out).unwrap();
    for line in text.lines() {
        assert!(line.ends_with(&format!(" {TS}")), "{line}");
    }
}
