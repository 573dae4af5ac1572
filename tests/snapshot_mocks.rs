use nvexport::emulator::{EmulatedDevice, Query};
use nvexport::field::{ErrorCode, Field, Value};
use nvexport::line_protocol::render;
use nvexport::snapshot::{capture, SCHEMA};
use nvexport::telemetry::ClockDomain;

const TS: i64 = 1_700_000_000_000_000_000;

fn field_names(line: &str) -> Vec<String> {
    // Tags and fields are separated by the first unescaped space.
    let bytes = line.as_bytes();
    let mut split = None;
    for i in 0..bytes.len() {
        if bytes[i] == b' ' && (i == 0 || bytes[i - 1] != b'\\') {
            split = Some(i);
            break;
        }
    }
    let rest = &line[split.unwrap() + 1..];
    let fields = &rest[..rest.rfind(' ').unwrap()];
    let mut names = Vec::new();
    let mut in_quotes = false;
    let mut current = String::new();
    let mut chars = fields.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                names.push(current.split('=').next().unwrap().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    names.push(current.split('=').next().unwrap().to_string());
    names
}

#[test]
fn one_forced_failure_leaves_every_other_field() {
    let dev = EmulatedDevice::rtx4090(1).fail(Query::FanSpeed, ErrorCode::NotSupported);
    let snap = capture(&dev, 0, TS);
    assert_eq!(snap.metrics.len(), SCHEMA.len());

    let names = field_names(&render("nv_export", &snap));
    assert_eq!(names.len(), SCHEMA.len());
    assert_eq!(names.iter().filter(|n| *n == "fan_speed").count(), 0);
    assert_eq!(names.last().map(String::as_str), Some("errors"));
    let expected: Vec<&str> = SCHEMA.iter().copied().filter(|n| *n != "fan_speed").collect();
    assert_eq!(&names[..names.len() - 1], expected.as_slice());
}

#[test]
fn every_query_failing_still_yields_a_record() {
    let mut dev = EmulatedDevice::rtx4090(1);
    for query in [
        Query::Name,
        Query::PciInfo,
        Query::Uuid,
        Query::CurrentPcieLinkGen,
        Query::MaxPcieLinkGen,
        Query::CurrentPcieLinkWidth,
        Query::MaxPcieLinkWidth,
        Query::PersistenceMode,
        Query::FanSpeed,
        Query::PerformanceState,
        Query::ClockEventReasons,
        Query::MemoryInfo,
        Query::ComputeCapability,
        Query::Utilization,
        Query::TemperatureGpu,
        Query::PowerUsage,
        Query::PowerLimit,
        Query::Clock(ClockDomain::Graphics),
        Query::Clock(ClockDomain::Sm),
        Query::Clock(ClockDomain::Memory),
        Query::Clock(ClockDomain::Video),
    ] {
        dev = dev.fail(query, ErrorCode::GpuIsLost);
    }
    let snap = capture(&dev, 3, TS);
    assert_eq!(snap.failures().len(), SCHEMA.len() + 3);

    let line = render("nv_export", &snap);
    assert!(line.starts_with("nv_export,index=3 errors=\"name (NVML_ERROR_GPU_IS_LOST),"));
    assert!(line.ends_with(&format!("clocks_video (NVML_ERROR_GPU_IS_LOST)\" {TS}\n")));
}

#[test]
fn failures_are_reported_every_tick_without_retry() {
    let dev = EmulatedDevice::rtx4090(1).fail(Query::PowerLimit, ErrorCode::NoPermission);
    for tick in 0..3 {
        let snap = capture(&dev, 0, TS + tick);
        assert_eq!(
            snap.metric("power_limit"),
            Some(&Field::Failure(ErrorCode::NoPermission))
        );
        assert_eq!(snap.metric("power_draw"), Some(&Field::Value(Value::U32(21_500))));
    }
}

#[cfg(feature = "dram")]
mod register {
    use super::*;
    use nvexport::register::RegisterSource;

    struct FixedRegister(u32);

    impl RegisterSource for FixedRegister {
        fn read_raw(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn only_the_mapped_device_reports_memory_temperature() {
        let mapped_dev = EmulatedDevice::rtx4090(1);
        let plain_dev = EmulatedDevice::rtx4090(1);

        let mut mapped = capture(&mapped_dev, 0, TS);
        mapped.push_register(&FixedRegister(0x0000_0FF0));
        let plain = capture(&plain_dev, 0, TS);

        let mapped_line = render("nv_export", &mapped);
        let plain_line = render("nv_export", &plain);
        assert!(mapped_line.contains(",clocks_video=1185,temperature_memory=127 "));
        assert!(!plain_line.contains("temperature_memory"));
        // Otherwise identical.
        assert_eq!(
            mapped_line.replace(",temperature_memory=127", ""),
            plain_line
        );
    }
}
