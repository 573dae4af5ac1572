//! PCI bus enumeration through sysfs.

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One function on the PCI bus with its identification, class and BAR0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PciEntry {
    pub domain: u16,
    pub bus: u8,
    pub dev: u8,
    pub func: u8,
    pub vendor_id: u16,
    pub device_id: u16,
    pub class: u32,
    pub bar0: u64,
}

impl PciEntry {
    pub fn slot(&self) -> String {
        format!("{:04x}:{:02x}:{:02x}.{:x}", self.domain, self.bus, self.dev, self.func)
    }
}

pub trait PciScanner {
    fn scan(&self) -> Result<Vec<PciEntry>>;
}

/// Reads `/sys/bus/pci/devices` (or a copy of its layout under `root`).
#[derive(Debug, Clone)]
pub struct SysfsScanner {
    root: PathBuf,
}

static SLOT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9a-fA-F]{4,8}):([0-9a-fA-F]{2}):([0-9a-fA-F]{2})\.([0-7])$").unwrap()
});

impl SysfsScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_entry(&self, path: &Path, slot: &str) -> Result<PciEntry> {
        let (domain, bus, dev, func) =
            parse_slot(slot).ok_or_else(|| anyhow!("malformed PCI slot name {slot}"))?;
        let vendor_id = read_hex(&path.join("vendor"))? as u16;
        let device_id = read_hex(&path.join("device"))? as u16;
        let class = read_hex(&path.join("class"))? as u32;
        let bar0 = read_bar0(&path.join("resource"))?;
        Ok(PciEntry {
            domain,
            bus,
            dev,
            func,
            vendor_id,
            device_id,
            class,
            bar0,
        })
    }
}

impl PciScanner for SysfsScanner {
    fn scan(&self) -> Result<Vec<PciEntry>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("cannot enumerate PCI devices in {}", self.root.display()))?;
        let mut found = Vec::new();
        for entry in entries.flatten() {
            let slot = entry.file_name().to_string_lossy().to_string();
            match self.read_entry(&entry.path(), &slot) {
                Ok(pci) => found.push(pci),
                Err(err) => debug!("skipping PCI entry {slot}: {err:#}"),
            }
        }
        found.sort_by_key(|e| (e.domain, e.bus, e.dev, e.func));
        Ok(found)
    }
}

/// Splits `DDDD:BB:DD.F` into its numeric parts.
pub fn parse_slot(slot: &str) -> Option<(u16, u8, u8, u8)> {
    let caps = SLOT_RE.captures(slot.trim())?;
    let domain = u32::from_str_radix(&caps[1], 16).ok()? as u16;
    let bus = u8::from_str_radix(&caps[2], 16).ok()?;
    let dev = u8::from_str_radix(&caps[3], 16).ok()?;
    let func = u8::from_str_radix(&caps[4], 16).ok()?;
    Some((domain, bus, dev, func))
}

fn parse_hex(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16).ok()
}

fn read_hex(path: &Path) -> Result<u64> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_hex(&raw).ok_or_else(|| anyhow!("{} is not a hex value: {:?}", path.display(), raw.trim()))
}

// First line of `resource` is BAR0: "start end flags".
fn read_bar0(path: &Path) -> Result<u64> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let first = raw
        .lines()
        .next()
        .ok_or_else(|| anyhow!("{} is empty", path.display()))?;
    let start = first
        .split_whitespace()
        .next()
        .ok_or_else(|| anyhow!("{} has no BAR0 start", path.display()))?;
    parse_hex(start).ok_or_else(|| anyhow!("bad BAR0 start {start:?} in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_device(root: &Path, slot: &str, vendor: &str, device: &str, bar0: &str) {
        let dir = root.join(slot);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vendor"), format!("{vendor}\n")).unwrap();
        fs::write(dir.join("device"), format!("{device}\n")).unwrap();
        fs::write(dir.join("class"), "0x030000\n").unwrap();
        fs::write(
            dir.join("resource"),
            format!("{bar0} 0x00000000fbffffff 0x0000000000040200\n0x0000000000000000 0x0000000000000000 0x0000000000000000\n"),
        )
        .unwrap();
    }

    #[test]
    fn parses_slot_names() {
        assert_eq!(parse_slot("0000:01:00.0"), Some((0, 1, 0, 0)));
        assert_eq!(parse_slot("0001:af:1f.7"), Some((1, 0xaf, 0x1f, 7)));
        assert_eq!(parse_slot("01:00.0"), None);
        assert_eq!(parse_slot("0000:01:00.8"), None);
    }

    #[test]
    fn scans_fake_sysfs_tree() {
        let tmp = tempfile::tempdir().unwrap();
        write_device(tmp.path(), "0000:02:00.0", "0x10de", "0x2684", "0x00000000fb000000");
        write_device(tmp.path(), "0000:00:1f.3", "0x8086", "0x7a50", "0x0000000060000000");
        fs::create_dir_all(tmp.path().join("not-a-slot")).unwrap();

        let found = SysfsScanner::new(tmp.path()).scan().unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].slot(), "0000:00:1f.3");
        let gpu = &found[1];
        assert_eq!((gpu.bus, gpu.dev, gpu.func), (2, 0, 0));
        assert_eq!(gpu.vendor_id, 0x10de);
        assert_eq!(gpu.device_id, 0x2684);
        assert_eq!(gpu.class, 0x030000);
        assert_eq!(gpu.bar0, 0xfb00_0000);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = SysfsScanner::new(tmp.path().join("absent"));
        assert!(scanner.scan().is_err());
    }
}
