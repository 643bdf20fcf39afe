//! On-disk layout: sector size, magics, and the three persistent record
//! types (`FSHeader`, `FSRoot`, `FileEntry`) that sit at fixed or
//! chain-addressed sector positions.
//!
//! Two sector-index newtypes keep the relative/absolute encoding used by
//! the sector map (see [`crate::map`]) from being silently confused: a
//! `RelSector` is only ever meaningful relative to the start of the data
//! area, while an `AbsSector` addresses the device directly.

use core::fmt;

/// Bytes per sector. Fixed at compile time, matching the original image
/// format (`DTFS-v1.0` was only ever produced with 512-byte sectors).
pub const SECT_SIZE: usize = 512;

/// Sentinel meaning "end of chain" / "no sector here", stored both as a
/// map-entry relative index and wherever an absolute sector is optional.
pub const SCT_END: u32 = u32::MAX;

/// Sector holding the [`FSHeader`].
pub const HEADER_SCT_IDX: u32 = 0;
/// Sector holding the [`FSRoot`].
pub const ROOT_SCT_IDX: u32 = 1;
/// Sectors 0 and 1 are fixed, so the map area starts at sector 2.
pub const FIXED_SCT_SIZE: u32 = 2;

/// 32-bit map entries per map sector.
pub const MAP_ITEM_CNT: u32 = (SECT_SIZE / 4) as u32;
/// One map sector describes `MAP_ITEM_CNT` data sectors and also occupies
/// a data-sector-shaped slot itself, hence `+ 1`.
pub const MAP_SECTOR_RATIO: u32 = MAP_ITEM_CNT + 1;

pub const FS_MAGIC: &[u8] = b"DTFS-v1.0";
pub const ROOT_MAGIC: &[u8] = b"ROOT";

/// Size in bytes of an on-disk [`FileEntry`] record.
pub const FE_BYTES: u32 = 64;
/// How many `FileEntry` records fit in one root-directory sector.
pub const FE_ITEM_CNT: u32 = (SECT_SIZE as u32) / FE_BYTES;

/// Maximum length of a file name, excluding the NUL terminator.
pub const MAX_NAME_LEN: usize = 31;

/// An absolute sector index, directly addressable on the block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AbsSector(pub u32);

impl AbsSector {
    pub const END: AbsSector = AbsSector(SCT_END);

    pub fn is_end(self) -> bool {
        self.0 == SCT_END
    }
}

impl fmt::Display for AbsSector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_end() {
            write!(f, "<end>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A sector index relative to the start of the data area (`2 + mapSize`),
/// as stored inside map entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelSector(pub u32);

impl RelSector {
    pub const END: RelSector = RelSector(SCT_END);

    pub fn is_end(self) -> bool {
        self.0 == SCT_END
    }

    /// Translates to an absolute sector index given the map's size.
    pub fn to_abs(self, map_size: u32) -> AbsSector {
        if self.is_end() {
            AbsSector::END
        } else {
            AbsSector(self.0 + FIXED_SCT_SIZE + map_size)
        }
    }
}

impl AbsSector {
    /// Translates to a map-relative sector index given the map's size.
    pub fn to_rel(self, map_size: u32) -> RelSector {
        if self.is_end() {
            RelSector::END
        } else {
            RelSector(self.0 - FIXED_SCT_SIZE - map_size)
        }
    }
}

/// Sector 0: filesystem-wide parameters.
#[derive(Debug, Clone, Copy)]
pub struct FsHeader {
    pub sct_num: u32,
    pub map_size: u32,
    pub free_num: u32,
    pub free_begin: AbsSector,
}

impl FsHeader {
    /// Derives `mapSize` for a device of `sct_num` total sectors, per
    /// `M = ceil((N - 2) / 129)`.
    pub fn map_size_for(sct_num: u32) -> u32 {
        let data_candidate = sct_num - FIXED_SCT_SIZE;
        data_candidate.div_ceil(MAP_SECTOR_RATIO)
    }

    pub fn encode(&self, buf: &mut [u8; SECT_SIZE]) {
        buf.fill(0);
        buf[0..FS_MAGIC.len()].copy_from_slice(FS_MAGIC);
        write_u32(buf, 32, self.sct_num);
        write_u32(buf, 36, self.map_size);
        write_u32(buf, 40, self.free_num);
        write_u32(buf, 44, self.free_begin.0);
    }

    pub fn decode(buf: &[u8; SECT_SIZE]) -> Self {
        FsHeader {
            sct_num: read_u32(buf, 32),
            map_size: read_u32(buf, 36),
            free_num: read_u32(buf, 40),
            free_begin: AbsSector(read_u32(buf, 44)),
        }
    }

    pub fn magic_matches(buf: &[u8; SECT_SIZE]) -> bool {
        &buf[0..FS_MAGIC.len()] == FS_MAGIC
    }
}

/// Sector 1: the root directory's chain head and size.
#[derive(Debug, Clone, Copy)]
pub struct FsRoot {
    pub sct_begin: AbsSector,
    pub sct_num: u32,
    pub last_bytes: u32,
}

impl FsRoot {
    pub fn empty() -> Self {
        FsRoot {
            sct_begin: AbsSector::END,
            sct_num: 0,
            last_bytes: SECT_SIZE as u32,
        }
    }

    pub fn encode(&self, buf: &mut [u8; SECT_SIZE]) {
        buf.fill(0);
        buf[0..ROOT_MAGIC.len()].copy_from_slice(ROOT_MAGIC);
        write_u32(buf, 32, self.sct_begin.0);
        write_u32(buf, 36, self.sct_num);
        write_u32(buf, 40, self.last_bytes);
    }

    pub fn decode(buf: &[u8; SECT_SIZE]) -> Self {
        FsRoot {
            sct_begin: AbsSector(read_u32(buf, 32)),
            sct_num: read_u32(buf, 36),
            last_bytes: read_u32(buf, 40),
        }
    }

    pub fn magic_matches(buf: &[u8; SECT_SIZE]) -> bool {
        &buf[0..ROOT_MAGIC.len()] == ROOT_MAGIC
    }
}

/// One directory entry: on-disk metadata for a single file.
#[derive(Debug, Clone, Copy)]
pub struct FileEntry {
    pub name: [u8; 32],
    pub sct_begin: AbsSector,
    pub sct_num: u32,
    pub last_bytes: u32,
    pub kind: u32,
    pub in_sct_idx: AbsSector,
    pub in_sct_off: u32,
}

impl FileEntry {
    pub fn new(name: &str, in_sct_idx: AbsSector, in_sct_off: u32) -> Self {
        let mut name_buf = [0u8; 32];
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_NAME_LEN);
        name_buf[..len].copy_from_slice(&bytes[..len]);

        FileEntry {
            name: name_buf,
            sct_begin: AbsSector::END,
            sct_num: 0,
            last_bytes: SECT_SIZE as u32,
            kind: 0,
            in_sct_idx,
            in_sct_off,
        }
    }

    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn length(&self) -> u32 {
        if self.sct_begin.is_end() {
            0
        } else {
            (self.sct_num - 1) * SECT_SIZE as u32 + self.last_bytes
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), FE_BYTES as usize);
        buf.fill(0);
        buf[0..32].copy_from_slice(&self.name);
        write_u32(buf, 32, self.sct_begin.0);
        write_u32(buf, 36, self.sct_num);
        write_u32(buf, 40, self.last_bytes);
        write_u32(buf, 44, self.kind);
        write_u32(buf, 48, self.in_sct_idx.0);
        write_u32(buf, 52, self.in_sct_off);
        // bytes 56..64 stay reserved/zero.
    }

    pub fn decode(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), FE_BYTES as usize);
        let mut name = [0u8; 32];
        name.copy_from_slice(&buf[0..32]);
        FileEntry {
            name,
            sct_begin: AbsSector(read_u32(buf, 32)),
            sct_num: read_u32(buf, 36),
            last_bytes: read_u32(buf, 40),
            kind: read_u32(buf, 44),
            in_sct_idx: AbsSector(read_u32(buf, 48)),
            in_sct_off: read_u32(buf, 52),
        }
    }

    pub fn is_free_slot(buf: &[u8]) -> bool {
        buf[0] == 0
    }
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_size_matches_spec_ratio() {
        // 2048-sector device: (2048-2)/129 = 15.86.. -> 16
        assert_eq!(FsHeader::map_size_for(2048), 16);
    }

    #[test]
    fn rel_abs_roundtrip() {
        let map_size = 16;
        let abs = AbsSector(200);
        let rel = abs.to_rel(map_size);
        assert_eq!(rel.to_abs(map_size), abs);
    }

    #[test]
    fn end_sentinel_roundtrips() {
        let map_size = 16;
        assert!(RelSector::END.to_abs(map_size).is_end());
        assert!(AbsSector::END.to_rel(map_size).is_end());
    }

    #[test]
    fn file_entry_encode_decode_roundtrip() {
        let fe = FileEntry::new("hello", AbsSector(5), 2);
        let mut buf = [0u8; FE_BYTES as usize];
        fe.encode(&mut buf);
        let decoded = FileEntry::decode(&buf);
        assert_eq!(decoded.name_str(), "hello");
        assert_eq!(decoded.in_sct_idx, AbsSector(5));
        assert_eq!(decoded.in_sct_off, 2);
        assert!(decoded.sct_begin.is_end());
    }
}
