//! Per-handle state for open files: a single-sector write-back cache, one
//! chain position (`obj_idx`/`offset`), and the handle table that owns
//! them all.
//!
//! Handles are addressed by `(index, generation)` rather than by raw
//! pointer identity, so a stale [`FileHandle`] from a closed slot can never
//! silently alias whatever reopened that slot afterwards — it is simply
//! rejected as [`FsError::InvalidHandle`].

use crate::chain;
use crate::device::BlockDevice;
use crate::error::FsError;
use crate::layout::{FileEntry, FsHeader, SECT_SIZE};
use crate::map;
use crate::root;

/// An open file. Opaque; only meaningful when passed back to the
/// [`crate::fs::Dtfs`] instance that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle {
    index: u32,
    generation: u32,
}

struct OpenFile {
    fe: FileEntry,
    obj_idx: Option<u32>,
    offset: u32,
    cache: [u8; SECT_SIZE],
    changed: bool,
}

struct Slot {
    generation: u32,
    open: Option<OpenFile>,
}

/// Every file currently open against one `Dtfs` instance.
pub struct OpenTable {
    slots: Vec<Slot>,
}

impl Default for OpenTable {
    fn default() -> Self {
        OpenTable { slots: Vec::new() }
    }
}

impl OpenTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.slots
            .iter()
            .any(|s| s.open.as_ref().is_some_and(|o| o.fe.name_str() == name))
    }

    fn get(&self, handle: FileHandle) -> Result<&OpenFile, FsError> {
        let slot = self
            .slots
            .get(handle.index as usize)
            .ok_or(FsError::InvalidHandle)?;
        if slot.generation != handle.generation {
            return Err(FsError::InvalidHandle);
        }
        slot.open.as_ref().ok_or(FsError::InvalidHandle)
    }

    fn get_mut(&mut self, handle: FileHandle) -> Result<&mut OpenFile, FsError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .ok_or(FsError::InvalidHandle)?;
        if slot.generation != handle.generation {
            return Err(FsError::InvalidHandle);
        }
        slot.open.as_mut().ok_or(FsError::InvalidHandle)
    }

    fn insert(&mut self, of: OpenFile) -> FileHandle {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.open.is_none() {
                slot.open = Some(of);
                return FileHandle {
                    index: i as u32,
                    generation: slot.generation,
                };
            }
        }
        self.slots.push(Slot {
            generation: 0,
            open: Some(of),
        });
        FileHandle {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    fn remove(&mut self, handle: FileHandle) -> Result<(), FsError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .ok_or(FsError::InvalidHandle)?;
        if slot.generation != handle.generation || slot.open.is_none() {
            return Err(FsError::InvalidHandle);
        }
        slot.open = None;
        slot.generation = slot.generation.wrapping_add(1);
        Ok(())
    }
}

fn get_file_len(of: &OpenFile) -> u32 {
    if of.fe.sct_begin.is_end() {
        0
    } else {
        (of.fe.sct_num - 1) * SECT_SIZE as u32 + of.fe.last_bytes
    }
}

fn get_file_pos(of: &OpenFile) -> u32 {
    match of.obj_idx {
        Some(idx) => idx * SECT_SIZE as u32 + of.offset,
        None => 0,
    }
}

fn flush_cache(device: &mut dyn BlockDevice, header: &FsHeader, of: &mut OpenFile) -> Result<(), FsError> {
    if !of.changed {
        return Ok(());
    }
    let idx = of.obj_idx.ok_or(FsError::DeviceIo)?;
    let sct = map::find_index(device, header.map_size, of.fe.sct_begin, idx)?;
    if sct.is_end() {
        return Err(FsError::DeviceIo);
    }
    device.write(sct.0, &of.cache)?;
    of.changed = false;
    Ok(())
}

/// Flushes the cache (if dirty) and unconditionally rewrites the
/// directory's copy of the entry, matching the source design's choice to
/// not track entry-level dirtiness separately.
fn to_flush(device: &mut dyn BlockDevice, header: &FsHeader, of: &mut OpenFile) -> Result<(), FsError> {
    flush_cache(device, header, of)?;
    root::flush_entry(device, &of.fe)
}

fn read_to_cache(
    device: &mut dyn BlockDevice,
    header: &FsHeader,
    of: &mut OpenFile,
    idx: u32,
) -> Result<bool, FsError> {
    if idx >= of.fe.sct_num {
        return Ok(false);
    }
    let sct = map::find_index(device, header.map_size, of.fe.sct_begin, idx)?;
    to_flush(device, header, of)?;
    if sct.is_end() {
        return Ok(false);
    }
    device.read(sct.0, &mut of.cache)?;
    of.obj_idx = Some(idx);
    of.offset = 0;
    of.changed = false;
    Ok(true)
}

/// Grows the file's chain by one sector if its tail is full, then loads
/// sector `idx`. Called on both the read and write paths: reading to the
/// exact end of a file whose length is already a whole number of sectors
/// will, like the source this is grounded on, append one empty sector.
fn prepare_cache(
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    of: &mut OpenFile,
    idx: u32,
) -> Result<bool, FsError> {
    chain::check_storage(
        device,
        header,
        &mut of.fe.sct_begin,
        &mut of.fe.sct_num,
        &mut of.fe.last_bytes,
    )?;
    read_to_cache(device, header, of, idx)
}

fn copy_to_cache(of: &mut OpenFile, buf: &[u8]) -> Option<usize> {
    let obj_idx = of.obj_idx?;
    let n = ((SECT_SIZE as u32 - of.offset) as usize).min(buf.len());
    let start = of.offset as usize;
    of.cache[start..start + n].copy_from_slice(&buf[..n]);
    of.offset += n as u32;
    of.changed = true;

    if obj_idx + 1 == of.fe.sct_num && of.fe.last_bytes < of.offset {
        of.fe.last_bytes = of.offset;
    }

    Some(n)
}

fn copy_from_cache(of: &mut OpenFile, buf: &mut [u8]) -> Option<usize> {
    of.obj_idx?;
    let n = ((SECT_SIZE as u32 - of.offset) as usize).min(buf.len());
    let start = of.offset as usize;
    buf[..n].copy_from_slice(&of.cache[start..start + n]);
    of.offset += n as u32;
    Some(n)
}

fn to_write(
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    of: &mut OpenFile,
    buf: &[u8],
) -> Result<usize, FsError> {
    let mut i = 0;
    while i < buf.len() {
        if of.offset == SECT_SIZE as u32 {
            let next_idx = of.obj_idx.map_or(0, |idx| idx + 1);
            if !prepare_cache(device, header, of, next_idx)? {
                break;
            }
        }
        match copy_to_cache(of, &buf[i..]) {
            Some(n) => i += n,
            None => break,
        }
    }
    Ok(i)
}

fn to_read(
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    of: &mut OpenFile,
    buf: &mut [u8],
) -> Result<usize, FsError> {
    let avail = get_file_len(of).saturating_sub(get_file_pos(of));
    let len = (buf.len() as u32).min(avail) as usize;

    let mut i = 0;
    while i < len {
        if of.offset == SECT_SIZE as u32 {
            let next_idx = of.obj_idx.map_or(0, |idx| idx + 1);
            if !prepare_cache(device, header, of, next_idx)? {
                break;
            }
        }
        match copy_from_cache(of, &mut buf[i..len]) {
            Some(n) => i += n,
            None => break,
        }
    }
    Ok(i)
}

/// Clamps `pos` to the file's length and loads the sector it falls in.
/// An empty file has no sector to load; seeking it to 0 (the only
/// reachable position) just restores the handle to its just-opened state
/// instead of failing, since there's no cache content to read back.
fn to_locate(
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    of: &mut OpenFile,
    pos: u32,
) -> Result<u32, FsError> {
    let len = get_file_len(of);
    let pos = pos.min(len);

    if len == 0 {
        to_flush(device, header, of)?;
        of.obj_idx = None;
        of.offset = SECT_SIZE as u32;
        return Ok(0);
    }

    let idx = pos / SECT_SIZE as u32;
    let offset = pos % SECT_SIZE as u32;
    let sct = map::find_index(device, header.map_size, of.fe.sct_begin, idx)?;

    to_flush(device, header, of)?;

    if sct.is_end() {
        return Err(FsError::DeviceIo);
    }

    device.read(sct.0, &mut of.cache)?;
    of.obj_idx = Some(idx);
    of.offset = offset;
    of.changed = false;

    Ok(pos)
}

/// Opens `name`, failing if it doesn't exist or is already open elsewhere
/// in this table.
pub fn open(
    table: &mut OpenTable,
    device: &dyn BlockDevice,
    header: &FsHeader,
    name: &str,
) -> Result<FileHandle, FsError> {
    if table.is_open(name) {
        return Err(FsError::AlreadyOpen);
    }
    let fe = root::find(device, header, name)?.ok_or(FsError::NotFound)?;

    let of = OpenFile {
        fe,
        obj_idx: None,
        offset: SECT_SIZE as u32,
        cache: [0u8; SECT_SIZE],
        changed: false,
    };

    Ok(table.insert(of))
}

/// Flushes and releases `handle`.
pub fn close(
    table: &mut OpenTable,
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    handle: FileHandle,
) -> Result<(), FsError> {
    {
        let of = table.get_mut(handle)?;
        to_flush(device, header, of)?;
    }
    table.remove(handle)
}

pub fn read(
    table: &mut OpenTable,
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    handle: FileHandle,
    buf: &mut [u8],
) -> Result<usize, FsError> {
    let of = table.get_mut(handle)?;
    to_read(device, header, of, buf)
}

pub fn write(
    table: &mut OpenTable,
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    handle: FileHandle,
    buf: &[u8],
) -> Result<usize, FsError> {
    let of = table.get_mut(handle)?;
    to_write(device, header, of, buf)
}

pub fn seek(
    table: &mut OpenTable,
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    handle: FileHandle,
    pos: u32,
) -> Result<u32, FsError> {
    let of = table.get_mut(handle)?;
    to_locate(device, header, of, pos)
}

pub fn tell(table: &OpenTable, handle: FileHandle) -> Result<u32, FsError> {
    Ok(get_file_pos(table.get(handle)?))
}

pub fn length(table: &OpenTable, handle: FileHandle) -> Result<u32, FsError> {
    Ok(get_file_len(table.get(handle)?))
}

/// Erases up to `bytes` from the end of the file, relocating the cursor to
/// the new end if it was erased out from under it.
pub fn erase(
    table: &mut OpenTable,
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    handle: FileHandle,
    bytes: u32,
) -> Result<u32, FsError> {
    let of = table.get_mut(handle)?;
    let pos = get_file_pos(of);
    let len = get_file_len(of);

    let erased = chain::erase_last(
        device,
        header,
        &mut of.fe.sct_begin,
        &mut of.fe.sct_num,
        &mut of.fe.last_bytes,
        bytes,
    )?;

    // Reposition the cursor if it was erased out from under it, but don't
    // let a failure here fail the erase itself: the original `FErase`
    // calls `ToLocate` for its cursor-fixup side effect only and always
    // returns the erased byte count regardless of what it does.
    let new_len = len - erased;
    if erased > 0 && pos > new_len {
        if let Err(e) = to_locate(device, header, of, new_len) {
            log::warn!("dtfs: erase: post-erase reposition failed: {e}");
        }
    }

    Ok(erased)
}

pub fn flush(
    table: &mut OpenTable,
    device: &mut dyn BlockDevice,
    header: &mut FsHeader,
    handle: FileHandle,
) -> Result<(), FsError> {
    let of = table.get_mut(handle)?;
    to_flush(device, header, of)
}
