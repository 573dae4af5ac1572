//! Direct reads of a device register through a mapped page of physical
//! memory. This is the only module that touches raw pointers.

use memmap2::{Mmap, MmapOptions};
use nix::unistd::{sysconf, SysconfVar};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const TEMPERATURE_MASK: u32 = 0x0000_0fff;
const TEMPERATURE_SCALE: u32 = 0x20;

/// Low 12 bits of the register, in 1/32 degree steps. Higher bits are reserved.
pub fn decode_temperature(raw: u32) -> u32 {
    (raw & TEMPERATURE_MASK) / TEMPERATURE_SCALE
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("permission denied opening {}", .path.display())]
    PermissionDenied { path: PathBuf },
    #[error("cannot open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot determine the system page size")]
    PageSize,
    #[error("register address {bar0:#x} + {offset:#x} does not fit in 32 bits")]
    AddressOverflow { bar0: u64, offset: u32 },
    #[error("register address {address:#x} is not 4-byte aligned")]
    Misaligned { address: u64 },
    #[error("mapping physical page {base:#x} failed: {source}")]
    Map {
        base: u64,
        #[source]
        source: io::Error,
    },
}

/// Computes BAR0 + offset in the 32-bit physical window.
pub fn register_address(bar0: u64, offset: u32) -> Result<u32, RegisterError> {
    (bar0 as u32)
        .checked_add(offset)
        .ok_or(RegisterError::AddressOverflow { bar0, offset })
}

/// Anything that yields the live 32-bit register word.
pub trait RegisterSource {
    fn read_raw(&self) -> u32;

    fn temperature(&self) -> u32 {
        decode_temperature(self.read_raw())
    }
}

/// Read-only handle on the physical memory device.
#[derive(Debug)]
pub struct PhysicalMemory {
    file: File,
    path: PathBuf,
    page_size: u64,
}

impl PhysicalMemory {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegisterError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| match source.kind() {
            io::ErrorKind::PermissionDenied => RegisterError::PermissionDenied { path: path.clone() },
            _ => RegisterError::Open {
                path: path.clone(),
                source,
            },
        })?;
        let page_size = match sysconf(SysconfVar::PAGE_SIZE) {
            Ok(Some(size)) if size > 0 => size as u64,
            _ => return Err(RegisterError::PageSize),
        };
        Ok(Self {
            file,
            path,
            page_size,
        })
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Maps the single page containing `address`.
    pub fn map(&self, address: u32) -> Result<MemoryMapping, RegisterError> {
        let address = address as u64;
        if address % 4 != 0 {
            return Err(RegisterError::Misaligned { address });
        }
        let base = address & !(self.page_size - 1);
        // SAFETY: the mapping is read-only and we only ever perform aligned
        // volatile loads inside it. Nothing else in this process writes to it.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(base)
                .len(self.page_size as usize)
                .map(&self.file)
        }
        .map_err(|source| RegisterError::Map { base, source })?;
        debug!("mapped page {base:#x} of {} for register {address:#x}", self.path.display());
        Ok(MemoryMapping {
            mmap,
            base,
            address,
        })
    }
}

/// One mapped page, owned by exactly one device. Unmapped on drop.
#[derive(Debug)]
pub struct MemoryMapping {
    mmap: Mmap,
    base: u64,
    address: u64,
}

impl MemoryMapping {
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Re-reads the register through the existing mapping.
    pub fn read(&self) -> u32 {
        let offset = (self.address - self.base) as usize;
        debug_assert!(offset + 4 <= self.mmap.len());
        // SAFETY: `map` checked 4-byte alignment and the offset lies within
        // the page, so the pointer is valid and aligned for a u32 load.
        unsafe { (self.mmap.as_ptr().add(offset) as *const u32).read_volatile() }
    }
}

impl RegisterSource for MemoryMapping {
    fn read_raw(&self) -> u32 {
        self.read()
    }
}

impl Drop for MemoryMapping {
    fn drop(&mut self) {
        debug!("unmapping page {:#x}", self.base);
    }
}
