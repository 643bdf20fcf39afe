//! Sector allocator: the free list embedded in the on-disk sector map, and
//! the chain-walking primitives built on top of it.
//!
//! The map is a logical array of `u32` entries, one per data sector, laid
//! out densely across the map sectors that follow the header and root.
//! Every entry is either [`RelSector::END`] or a relative index meaning
//! "the next sector in this chain is `absolute(that index)`". Both file
//! chains and the free list are encoded the same way; only reachability
//! from `freeBegin` vs. from some file's `sctBegin` tells them apart.

use crate::device::BlockDevice;
use crate::error::FsError;
use crate::layout::{
    AbsSector, FsHeader, RelSector, FIXED_SCT_SIZE, HEADER_SCT_IDX, MAP_ITEM_CNT, SECT_SIZE,
};

/// Reads the filesystem header from sector 0.
pub fn read_header(device: &dyn BlockDevice) -> Result<FsHeader, FsError> {
    let mut buf = [0u8; SECT_SIZE];
    device.read(HEADER_SCT_IDX, &mut buf)?;
    Ok(FsHeader::decode(&buf))
}

/// Persists the filesystem header to sector 0.
pub fn write_header(device: &mut dyn BlockDevice, header: &FsHeader) -> Result<(), FsError> {
    let mut buf = [0u8; SECT_SIZE];
    header.encode(&mut buf);
    device.write(HEADER_SCT_IDX, &buf)
}

/// Locates the map sector and in-sector offset describing absolute sector
/// `si`. Fails if `si` is the end sentinel.
fn find_in_map(map_size: u32, si: AbsSector) -> Result<(AbsSector, u32), FsError> {
    if si.is_end() {
        return Err(FsError::BadArgument);
    }
    let rel = si.to_rel(map_size);
    let sct_off = rel.0 / MAP_ITEM_CNT;
    let idx_off = rel.0 % MAP_ITEM_CNT;
    Ok((AbsSector(FIXED_SCT_SIZE + sct_off), idx_off))
}

fn entry_in_buf(buf: &[u8; SECT_SIZE], idx_off: u32) -> RelSector {
    let off = idx_off as usize * 4;
    RelSector(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()))
}

fn set_entry_in_buf(buf: &mut [u8; SECT_SIZE], idx_off: u32, value: RelSector) {
    let off = idx_off as usize * 4;
    buf[off..off + 4].copy_from_slice(&value.0.to_le_bytes());
}

fn read_entry(
    device: &dyn BlockDevice,
    map_sector: AbsSector,
    idx_off: u32,
) -> Result<RelSector, FsError> {
    let mut buf = [0u8; SECT_SIZE];
    device.read(map_sector.0, &mut buf)?;
    Ok(entry_in_buf(&buf, idx_off))
}

fn write_entry(
    device: &mut dyn BlockDevice,
    map_sector: AbsSector,
    idx_off: u32,
    value: RelSector,
) -> Result<(), FsError> {
    let mut buf = [0u8; SECT_SIZE];
    device.read(map_sector.0, &mut buf)?;
    set_entry_in_buf(&mut buf, idx_off, value);
    device.write(map_sector.0, &buf)
}

/// Returns the sector that follows `si` in its chain, or `AbsSector::END`
/// if `si` is itself the end, or terminal.
pub fn next(device: &dyn BlockDevice, map_size: u32, si: AbsSector) -> Result<AbsSector, FsError> {
    if si.is_end() {
        return Ok(AbsSector::END);
    }
    let (map_sector, idx_off) = find_in_map(map_size, si)?;
    let rel = read_entry(device, map_sector, idx_off)?;
    Ok(rel.to_abs(map_size))
}

/// Pops and returns the head of the free list, or `Err(OutOfSectors)` if
/// the device is full. Persists the header before the map sector, matching
/// the original design: a write failure partway leaves the header already
/// advanced and the caller's in-memory copy stale, never rolled back.
pub fn alloc(device: &mut dyn BlockDevice, header: &mut FsHeader) -> Result<AbsSector, FsError> {
    if header.free_begin.is_end() {
        return Err(FsError::OutOfSectors);
    }

    let ret = header.free_begin;
    let (map_sector, idx_off) = find_in_map(header.map_size, ret)?;
    let next_rel = read_entry(device, map_sector, idx_off)?;

    header.free_begin = next_rel.to_abs(header.map_size);
    header.free_num -= 1;

    write_header(device, header)?;
    write_entry(device, map_sector, idx_off, RelSector::END)?;

    Ok(ret)
}

/// Reinserts `si` at the head of the free list.
pub fn free(device: &mut dyn BlockDevice, header: &mut FsHeader, si: AbsSector) -> Result<(), FsError> {
    let (map_sector, idx_off) = find_in_map(header.map_size, si)?;
    let old_free_begin_rel = header.free_begin.to_rel(header.map_size);

    header.free_begin = si;
    header.free_num += 1;

    write_header(device, header)?;
    write_entry(device, map_sector, idx_off, old_free_begin_rel)?;

    Ok(())
}

/// Marks `si` as a chain terminator (`SCT_END`) in the map.
pub fn mark_terminal(device: &mut dyn BlockDevice, map_size: u32, si: AbsSector) -> Result<(), FsError> {
    if si.is_end() {
        return Ok(());
    }
    let (map_sector, idx_off) = find_in_map(map_size, si)?;
    write_entry(device, map_sector, idx_off, RelSector::END)
}

/// Walks from `sct_begin` to the last sector in its chain. Returns
/// `AbsSector::END` for an empty chain.
pub fn find_last(
    device: &dyn BlockDevice,
    map_size: u32,
    sct_begin: AbsSector,
) -> Result<AbsSector, FsError> {
    let mut ret = AbsSector::END;
    let mut cursor = sct_begin;
    while !cursor.is_end() {
        ret = cursor;
        cursor = next(device, map_size, cursor)?;
    }
    Ok(ret)
}

/// Walks from `sct_begin` to find the sector immediately before `si`.
/// Returns `AbsSector::END` if `si` is not reachable from `sct_begin`.
pub fn find_prev(
    device: &dyn BlockDevice,
    map_size: u32,
    sct_begin: AbsSector,
    si: AbsSector,
) -> Result<AbsSector, FsError> {
    let mut ret = AbsSector::END;
    let mut cursor = sct_begin;
    while !cursor.is_end() && cursor != si {
        ret = cursor;
        cursor = next(device, map_size, cursor)?;
    }
    if cursor.is_end() {
        ret = AbsSector::END;
    }
    Ok(ret)
}

/// Walks `idx` links from `sct_begin`, returning `AbsSector::END` if the
/// chain is shorter than `idx`.
pub fn find_index(
    device: &dyn BlockDevice,
    map_size: u32,
    sct_begin: AbsSector,
    idx: u32,
) -> Result<AbsSector, FsError> {
    let mut ret = sct_begin;
    let mut i = 0;
    while i < idx && !ret.is_end() {
        ret = next(device, map_size, ret)?;
        i += 1;
    }
    Ok(ret)
}

/// Appends `si` to the tail of the chain headed by `sct_begin`. No-op if
/// the chain is empty (callers are expected to set `sct_begin = si`
/// themselves in that case, since `add_to_last` only ever links an
/// *existing* tail to a new sector).
pub fn add_to_last(
    device: &mut dyn BlockDevice,
    map_size: u32,
    sct_begin: AbsSector,
    si: AbsSector,
) -> Result<(), FsError> {
    let last = find_last(device, map_size, sct_begin)?;
    if last.is_end() {
        return Ok(());
    }

    let (last_map_sector, last_idx_off) = find_in_map(map_size, last)?;
    let (si_map_sector, si_idx_off) = find_in_map(map_size, si)?;
    let si_rel = si.to_rel(map_size);

    if last_map_sector == si_map_sector {
        let mut buf = [0u8; SECT_SIZE];
        device.read(last_map_sector.0, &mut buf)?;
        set_entry_in_buf(&mut buf, last_idx_off, si_rel);
        set_entry_in_buf(&mut buf, si_idx_off, RelSector::END);
        device.write(last_map_sector.0, &buf)?;
    } else {
        write_entry(device, last_map_sector, last_idx_off, si_rel)?;
        write_entry(device, si_map_sector, si_idx_off, RelSector::END)?;
    }

    Ok(())
}

/// Frees every sector in the chain headed by `sct_begin`, walking it one
/// link at a time before each sector is returned to the free list (mirrors
/// the original design's whole-file free routine).
pub fn free_chain(
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    sct_begin: AbsSector,
) -> Result<(), FsError> {
    let mut cursor = sct_begin;
    while !cursor.is_end() {
        let next_sector = next(device, header.map_size, cursor)?;
        free(device, header, cursor)?;
        cursor = next_sector;
    }
    Ok(())
}
