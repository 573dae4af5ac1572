//! Per-tick capture of one device into an ordered list of metric fields.

use crate::field::{ErrorCode, Field, Value};
use crate::telemetry::{clock_event, ClockDomain, TelemetryDevice};

#[cfg(feature = "dram")]
use crate::register::RegisterSource;

/// Identity tags. Each one is queried like any other field.
#[derive(Debug, Clone, PartialEq)]
pub struct Tags {
    pub name: Field<String>,
    pub bus_id: Field<String>,
    pub uuid: Field<String>,
}

/// Everything sampled from one device in one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp_ns: i64,
    pub device_index: u32,
    pub tags: Tags,
    pub metrics: Vec<(&'static str, Field<Value>)>,
}

impl Snapshot {
    pub fn new(timestamp_ns: i64, device_index: u32, tags: Tags) -> Self {
        Self {
            timestamp_ns,
            device_index,
            tags,
            metrics: Vec::with_capacity(32),
        }
    }

    pub fn push<T: Into<Value>>(&mut self, name: &'static str, field: Field<T>) {
        self.metrics.push((name, field.map(Into::into)));
    }

    /// Pushes one field per `(name, value)` pair, all sourced from the
    /// same query. A failed query fails every field it feeds.
    fn push_shared<T, const N: usize>(
        &mut self,
        names: [&'static str; N],
        result: Result<T, ErrorCode>,
        split: impl FnOnce(T) -> [Value; N],
    ) {
        match result {
            Ok(value) => {
                for (name, v) in names.into_iter().zip(split(value)) {
                    self.metrics.push((name, Field::Value(v)));
                }
            }
            Err(code) => {
                for name in names {
                    self.metrics.push((name, Field::Failure(code)));
                }
            }
        }
    }

    pub fn metric(&self, name: &str) -> Option<&Field<Value>> {
        self.metrics.iter().find(|(n, _)| *n == name).map(|(_, f)| f)
    }

    /// Failed tags followed by failed metrics, in schema order.
    pub fn failures(&self) -> Vec<(&'static str, ErrorCode)> {
        let tags = [
            ("name", &self.tags.name),
            ("bus_id", &self.tags.bus_id),
            ("uuid", &self.tags.uuid),
        ];
        tags.into_iter()
            .filter_map(|(name, f)| f.failure().map(|code| (name, code)))
            .chain(
                self.metrics
                    .iter()
                    .filter_map(|(name, f)| f.failure().map(|code| (*name, code))),
            )
            .collect()
    }

    /// Appends the register-derived memory temperature.
    #[cfg(feature = "dram")]
    pub fn push_register<R: RegisterSource + ?Sized>(&mut self, register: &R) {
        self.push("temperature_memory", Field::Value(register.temperature()));
    }
}

/// Queries every telemetry metric for `device`. Each query is captured
/// independently; none can stop the others.
pub fn capture<D: TelemetryDevice + ?Sized>(
    device: &D,
    device_index: u32,
    timestamp_ns: i64,
) -> Snapshot {
    let pci = device.pci_info();
    let tags = Tags {
        name: Field::from_result(device.name()),
        bus_id: Field::from_result(pci.as_ref().map(|p| p.bus_id.clone()).map_err(|c| *c)),
        uuid: Field::from_result(device.uuid()),
    };
    let mut snap = Snapshot::new(timestamp_ns, device_index, tags);

    snap.push("dev_id", Field::from_result(pci.map(|p| p.device_id())));
    snap.push("pcie_link_gen_current", Field::from_result(device.current_pcie_link_gen()));
    snap.push("pcie_link_gen_max", Field::from_result(device.max_pcie_link_gen()));
    snap.push("pcie_link_width_current", Field::from_result(device.current_pcie_link_width()));
    snap.push("pcie_link_width_max", Field::from_result(device.max_pcie_link_width()));
    snap.push(
        "persistence_mode",
        Field::from_result(device.persistence_mode()).map(u32::from),
    );
    snap.push("fan_speed", Field::from_result(device.fan_speed()));
    snap.push("pstate", Field::from_result(device.performance_state()));

    snap.push_shared(THROTTLE_FIELDS, device.clock_event_reasons(), |reasons| {
        THROTTLE_MASKS.map(|mask| Value::Bool(reasons & mask != 0))
    });
    snap.push_shared(
        ["memory_total", "memory_used"],
        device.memory_info(),
        |m| [Value::U64(m.total), Value::U64(m.used)],
    );
    snap.push(
        "compute_cap",
        Field::from_result(device.compute_capability()).map(|c| format!("{}.{}", c.major, c.minor)),
    );
    snap.push_shared(
        ["utilization_gpu", "utilization_memory"],
        device.utilization(),
        |u| [Value::F64(u.gpu as f64), Value::F64(u.memory as f64)],
    );
    snap.push("temperature_gpu", Field::from_result(device.temperature_gpu()));
    snap.push("power_draw", Field::from_result(device.power_usage()));
    snap.push("power_limit", Field::from_result(device.power_limit()));
    snap.push("clocks_gr", Field::from_result(device.clock(ClockDomain::Graphics)));
    snap.push("clocks_sm", Field::from_result(device.clock(ClockDomain::Sm)));
    snap.push("clocks_mem", Field::from_result(device.clock(ClockDomain::Memory)));
    snap.push("clocks_video", Field::from_result(device.clock(ClockDomain::Video)));

    snap
}

const THROTTLE_MASKS: [u64; 6] = [
    clock_event::SW_POWER_CAP,
    clock_event::HW_SLOWDOWN,
    clock_event::HW_THERMAL_SLOWDOWN,
    clock_event::HW_POWER_BRAKE_SLOWDOWN,
    clock_event::SW_THERMAL_SLOWDOWN,
    clock_event::SYNC_BOOST,
];

const THROTTLE_FIELDS: [&str; 6] = [
    "clock_throttle_reason_sw_power_cap",
    "clock_throttle_reason_hw_slowdown",
    "clock_throttle_reason_hw_thermal_slowdown",
    "clock_throttle_reason_hw_power_brake_slowdown",
    "clock_throttle_reason_sw_thermal_slowdown",
    "clock_throttle_reason_sync_boost",
];

/// Metric names in the order `capture` emits them.
pub const SCHEMA: [&str; 26] = [
    "dev_id",
    "pcie_link_gen_current",
    "pcie_link_gen_max",
    "pcie_link_width_current",
    "pcie_link_width_max",
    "persistence_mode",
    "fan_speed",
    "pstate",
    THROTTLE_FIELDS[0],
    THROTTLE_FIELDS[1],
    THROTTLE_FIELDS[2],
    THROTTLE_FIELDS[3],
    THROTTLE_FIELDS[4],
    THROTTLE_FIELDS[5],
    "memory_total",
    "memory_used",
    "compute_cap",
    "utilization_gpu",
    "utilization_memory",
    "temperature_gpu",
    "power_draw",
    "power_limit",
    "clocks_gr",
    "clocks_sm",
    "clocks_mem",
    "clocks_video",
];
