//! The polling loop: one timestamp per tick, every device in order, one
//! flush per tick.

use crate::line_protocol;
use crate::registry::DeviceRegistry;
use crate::snapshot;
use crate::telemetry::TelemetryDevice;
use chrono::Utc;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest single sleep while waiting for the next deadline, so a shutdown
/// request is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Exit status used when a second signal arrives before the loop has stopped.
pub const FORCED_EXIT_STATUS: i32 = 1;

/// SIGINT and SIGTERM set `shutdown`. A second signal while the flag is
/// already set exits the process at once, so a query stuck inside the
/// driver cannot make the exporter unkillable.
pub fn register_shutdown_signals(shutdown: &Arc<AtomicBool>) -> io::Result<()> {
    for signal in [SIGINT, SIGTERM] {
        // Order matters: the exit check must run before the flag is set.
        signal_hook::flag::register_conditional_shutdown(
            signal,
            FORCED_EXIT_STATUS,
            Arc::clone(shutdown),
        )?;
        signal_hook::flag::register(signal, Arc::clone(shutdown))?;
    }
    Ok(())
}

/// Wall-clock nanoseconds, clamped so successive readings never go back.
#[derive(Debug, Default)]
pub struct TickClock {
    last: i64,
}

impl TickClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&mut self) -> i64 {
        let wall = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        self.observe(wall)
    }

    /// Folds an externally sampled time into the clock.
    pub fn observe(&mut self, wall_ns: i64) -> i64 {
        self.last = self.last.max(wall_ns);
        self.last
    }
}

pub struct Exporter<D, W: Write> {
    registry: DeviceRegistry<D>,
    out: W,
    measurement: String,
    clock: TickClock,
    ticks: u64,
}

impl<D: TelemetryDevice, W: Write> Exporter<D, W> {
    pub fn new(registry: DeviceRegistry<D>, out: W, measurement: impl Into<String>) -> Self {
        Self {
            registry,
            out,
            measurement: measurement.into(),
            clock: TickClock::new(),
            ticks: 0,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Samples every device once at the current time.
    pub fn tick(&mut self) -> io::Result<()> {
        let timestamp = self.clock.now();
        self.tick_at(timestamp)
    }

    /// Samples every device once, stamping all records with `timestamp_ns`
    /// (clamped to never precede an earlier tick).
    pub fn tick_at(&mut self, timestamp_ns: i64) -> io::Result<()> {
        let timestamp_ns = self.clock.observe(timestamp_ns);
        for device in self.registry.devices() {
            #[allow(unused_mut)]
            let mut snap = snapshot::capture(&device.handle, device.index, timestamp_ns);
            #[cfg(feature = "dram")]
            if let Some(register) = device.register() {
                snap.push_register(register);
            }
            line_protocol::write_record(&mut self.out, &self.measurement, &snap)?;
        }
        self.out.flush()?;
        self.ticks += 1;
        debug!("tick {} wrote {} record(s)", self.ticks, self.registry.len());
        Ok(())
    }

    /// Ticks every `interval` until `shutdown` is set. A tick that overruns
    /// the interval is followed immediately by the next one.
    pub fn run(&mut self, interval: Duration, shutdown: &AtomicBool) -> io::Result<()> {
        info!(
            "sampling {} device(s) every {:?} as `{}`",
            self.registry.len(),
            interval,
            self.measurement
        );
        while !shutdown.load(Ordering::Relaxed) {
            let started = Instant::now();
            self.tick()?;
            let elapsed = started.elapsed();
            if elapsed > interval {
                warn!("tick took {elapsed:?}, longer than the {interval:?} interval");
                continue;
            }
            let deadline = started + interval;
            while !shutdown.load(Ordering::Relaxed) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep((deadline - now).min(SLEEP_SLICE));
            }
        }
        info!("shutdown requested after {} tick(s)", self.ticks);
        Ok(())
    }

    /// Gives back the registry so the caller controls when it is released.
    pub fn into_parts(self) -> (DeviceRegistry<D>, W) {
        (self.registry, self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_never_goes_backwards() {
        let mut clock = TickClock::new();
        assert_eq!(clock.observe(100), 100);
        assert_eq!(clock.observe(50), 100);
        assert_eq!(clock.observe(150), 150);
        assert!(clock.now() >= 150);
    }
}
