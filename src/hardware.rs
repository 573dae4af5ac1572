use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

pub const NVIDIA_VENDOR_ID: u16 = 0x10de;

/// Offset from BAR0 of the GDDR temperature register on most boards.
const GDDR_TEMP_OFFSET: u32 = 0x0000_E2A8;
/// GA104 boards expose the register at a different offset.
const GA104_GDDR_TEMP_OFFSET: u32 = 0x0000_EE50;

/// Physical layout of one accelerator model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareMetadata {
    pub register_offset: u32,
    pub memory_technology: &'static str,
    pub architecture: &'static str,
    pub marketing_name: &'static str,
}

const fn entry(
    register_offset: u32,
    memory_technology: &'static str,
    architecture: &'static str,
    marketing_name: &'static str,
) -> HardwareMetadata {
    HardwareMetadata {
        register_offset,
        memory_technology,
        architecture,
        marketing_name,
    }
}

// Keyed by PCI device id. Supporting a new board is one more insert.
static HARDWARE_TABLE: Lazy<HashMap<u16, HardwareMetadata>> = Lazy::new(|| {
    let mut m = HashMap::new();
    // Ada
    m.insert(0x2684, entry(GDDR_TEMP_OFFSET, "GDDR6X", "AD102", "RTX 4090"));
    m.insert(0x2702, entry(GDDR_TEMP_OFFSET, "GDDR6X", "AD103", "RTX 4080 Super"));
    m.insert(0x2704, entry(GDDR_TEMP_OFFSET, "GDDR6X", "AD103", "RTX 4080"));
    m.insert(0x2705, entry(GDDR_TEMP_OFFSET, "GDDR6X", "AD103", "RTX 4070 Ti Super"));
    m.insert(0x2782, entry(GDDR_TEMP_OFFSET, "GDDR6X", "AD104", "RTX 4070 Ti"));
    m.insert(0x2783, entry(GDDR_TEMP_OFFSET, "GDDR6X", "AD104", "RTX 4070 Super"));
    m.insert(0x2786, entry(GDDR_TEMP_OFFSET, "GDDR6X", "AD104", "RTX 4070"));
    m.insert(0x2860, entry(GDDR_TEMP_OFFSET, "GDDR6", "AD106", "RTX 4070 Max-Q / Mobile"));
    m.insert(0x26B1, entry(GDDR_TEMP_OFFSET, "GDDR6", "AD102", "RTX A6000 (Ada)"));
    m.insert(0x27B8, entry(GDDR_TEMP_OFFSET, "GDDR6", "AD104", "L4"));
    m.insert(0x26B9, entry(GDDR_TEMP_OFFSET, "GDDR6", "AD102", "L40S"));
    m.insert(0x26B5, entry(GDDR_TEMP_OFFSET, "GDDR6", "AD102", "L40"));
    // Ampere
    m.insert(0x2203, entry(GDDR_TEMP_OFFSET, "GDDR6X", "GA102", "RTX 3090 Ti"));
    m.insert(0x2204, entry(GDDR_TEMP_OFFSET, "GDDR6X", "GA102", "RTX 3090"));
    m.insert(0x2208, entry(GDDR_TEMP_OFFSET, "GDDR6X", "GA102", "RTX 3080 Ti"));
    m.insert(0x2206, entry(GDDR_TEMP_OFFSET, "GDDR6X", "GA102", "RTX 3080"));
    m.insert(0x2216, entry(GDDR_TEMP_OFFSET, "GDDR6X", "GA102", "RTX 3080 LHR"));
    m.insert(0x2484, entry(GA104_GDDR_TEMP_OFFSET, "GDDR6", "GA104", "RTX 3070"));
    m.insert(0x2488, entry(GA104_GDDR_TEMP_OFFSET, "GDDR6", "GA104", "RTX 3070 LHR"));
    m.insert(0x2531, entry(GDDR_TEMP_OFFSET, "GDDR6", "GA106", "RTX A2000"));
    m.insert(0x2571, entry(GDDR_TEMP_OFFSET, "GDDR6", "GA106", "RTX A2000"));
    m.insert(0x2232, entry(GDDR_TEMP_OFFSET, "GDDR6", "GA102", "RTX A4500"));
    m.insert(0x2231, entry(GDDR_TEMP_OFFSET, "GDDR6", "GA102", "RTX A5000"));
    m.insert(0x2236, entry(GDDR_TEMP_OFFSET, "GDDR6", "GA102", "A10"));
    m
});

/// Exact-match lookup by PCI device id. Unknown ids return `None`, never a
/// default layout.
pub fn lookup(device_id: u16) -> Option<&'static HardwareMetadata> {
    HARDWARE_TABLE.get(&device_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ids_resolve() {
        let meta = lookup(0x2684).expect("4090 present");
        assert_eq!(meta.marketing_name, "RTX 4090");
        assert_eq!(meta.register_offset, 0xE2A8);

        let ga104 = lookup(0x2484).expect("3070 present");
        assert_eq!(ga104.register_offset, 0xEE50);
        assert_eq!(ga104.architecture, "GA104");
    }

    #[test]
    fn lookup_is_stable_for_every_key() {
        for id in HARDWARE_TABLE.keys() {
            let first = lookup(*id).cloned();
            let second = lookup(*id).cloned();
            assert!(first.is_some());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn unknown_id_is_not_found() {
        assert!(lookup(0x0000).is_none());
        assert!(lookup(0x1DB6).is_none());
        assert!(lookup(NVIDIA_VENDOR_ID).is_none());
    }
}
