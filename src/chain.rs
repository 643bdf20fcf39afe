//! Growing and shrinking a sector chain by one sector at a time.
//!
//! Both the root directory and an open file's data are "a chain with a
//! `sctBegin`/`sctNum`/`lastBytes` triple", so these two operations are
//! shared between [`crate::root`] and [`crate::handle`] rather than
//! duplicated.

use crate::device::BlockDevice;
use crate::error::FsError;
use crate::layout::{AbsSector, FsHeader, SECT_SIZE};
use crate::map;

/// Grows the chain by one sector if its last sector is full
/// (`last_bytes == SECT_SIZE`). Returns `true` if a sector was allocated.
///
/// Preserved quirk from the source design: this only ever extends a chain
/// by a single sector per call. A caller writing more than one sector's
/// worth of data must re-invoke this once per sector boundary crossed.
pub fn check_storage(
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    sct_begin: &mut AbsSector,
    sct_num: &mut u32,
    last_bytes: &mut u32,
) -> Result<bool, FsError> {
    if *last_bytes != SECT_SIZE as u32 {
        return Ok(false);
    }

    let si = match map::alloc(device, header) {
        Ok(si) => si,
        Err(e) => {
            log::warn!("dtfs: chain growth failed: no free sectors remain");
            return Err(e);
        }
    };

    if sct_begin.is_end() {
        *sct_begin = si;
    } else {
        map::add_to_last(device, header.map_size, *sct_begin, si)?;
    }

    *sct_num += 1;
    *last_bytes = 0;

    Ok(true)
}

/// Frees the chain's last sector once it has been fully erased
/// (`last_bytes == 0`), marking the new last sector terminal. Collapses
/// the chain to empty if that was its only sector.
fn adjust_storage(
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    sct_begin: &mut AbsSector,
    sct_num: &mut u32,
    last_bytes: &mut u32,
) -> Result<bool, FsError> {
    if *last_bytes != 0 {
        return Ok(false);
    }

    let last = map::find_last(device, header.map_size, *sct_begin)?;
    let prev = map::find_prev(device, header.map_size, *sct_begin, last)?;

    map::free(device, header, last)?;
    map::mark_terminal(device, header.map_size, prev)?;

    *sct_num -= 1;
    *last_bytes = SECT_SIZE as u32;

    if *sct_num == 0 {
        *sct_begin = AbsSector::END;
    }

    Ok(true)
}

/// Erases up to `bytes` bytes from the tail of a chain, freeing sectors as
/// they empty out. Returns the number of bytes actually erased, which may
/// be less than requested if the chain becomes empty first.
pub fn erase_last(
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    sct_begin: &mut AbsSector,
    sct_num: &mut u32,
    last_bytes: &mut u32,
    mut bytes: u32,
) -> Result<u32, FsError> {
    let mut erased = 0;

    while *sct_num > 0 && bytes > 0 {
        if bytes < *last_bytes {
            *last_bytes -= bytes;
            erased += bytes;
            bytes = 0;
        } else {
            bytes -= *last_bytes;
            erased += *last_bytes;
            *last_bytes = 0;
            adjust_storage(device, header, sct_begin, sct_num, last_bytes)?;
        }
    }

    Ok(erased)
}
