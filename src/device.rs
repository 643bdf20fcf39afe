//! Block-device abstraction the filesystem core is built on, plus an
//! in-memory reference implementation used by tests and by embedders that
//! want to stage an image before flushing it to real hardware.

use crate::error::FsError;
use crate::layout::SECT_SIZE;

/// A sector-addressed storage device.
///
/// The filesystem core never assumes anything about the medium behind
/// this trait beyond "every `write` that returns `Ok` has persisted before
/// it returns" (§5 of the design). Real drivers (ATA/AHCI/virtio-blk/...)
/// live outside this crate and implement this trait.
pub trait BlockDevice {
    /// Total number of addressable sectors.
    fn sectors(&self) -> u32;

    /// Reads sector `si` into `buf`. `si` must be `< self.sectors()`.
    fn read(&self, si: u32, buf: &mut [u8; SECT_SIZE]) -> Result<(), FsError>;

    /// Writes `buf` to sector `si`. `si` must be `< self.sectors()`.
    fn write(&mut self, si: u32, buf: &[u8; SECT_SIZE]) -> Result<(), FsError>;
}

/// A `BlockDevice` backed entirely by process memory.
///
/// Useful for tests, for formatting an image before writing it out in one
/// shot, and for hosts that have not wired up a real disk driver yet.
pub struct MemoryBlockDevice {
    sectors: Vec<[u8; SECT_SIZE]>,
}

impl MemoryBlockDevice {
    /// Creates a device of `sector_count` zeroed sectors.
    pub fn new(sector_count: u32) -> Self {
        Self {
            sectors: alloc_sectors(sector_count),
        }
    }

    fn validate(&self, si: u32) -> Result<(), FsError> {
        if si >= self.sectors.len() as u32 {
            Err(FsError::DeviceIo)
        } else {
            Ok(())
        }
    }
}

fn alloc_sectors(count: u32) -> Vec<[u8; SECT_SIZE]> {
    (0..count).map(|_| [0u8; SECT_SIZE]).collect()
}

impl BlockDevice for MemoryBlockDevice {
    fn sectors(&self) -> u32 {
        self.sectors.len() as u32
    }

    fn read(&self, si: u32, buf: &mut [u8; SECT_SIZE]) -> Result<(), FsError> {
        self.validate(si)?;
        buf.copy_from_slice(&self.sectors[si as usize]);
        Ok(())
    }

    fn write(&mut self, si: u32, buf: &[u8; SECT_SIZE]) -> Result<(), FsError> {
        self.validate(si)?;
        self.sectors[si as usize].copy_from_slice(buf);
        Ok(())
    }
}
