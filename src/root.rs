//! The root directory: a chain of sectors holding a packed array of
//! fixed-size [`FileEntry`] records, with byte-wise case-sensitive lookup
//! by name, append-on-create, compact-on-delete, and in-place rename.

use crate::chain;
use crate::device::BlockDevice;
use crate::error::FsError;
use crate::layout::{
    FileEntry, FsHeader, FsRoot, FE_BYTES, FE_ITEM_CNT, MAX_NAME_LEN, ROOT_SCT_IDX, SECT_SIZE,
};
use crate::map;

pub fn read_root(device: &dyn BlockDevice) -> Result<FsRoot, FsError> {
    let mut buf = [0u8; SECT_SIZE];
    device.read(ROOT_SCT_IDX, &mut buf)?;
    Ok(FsRoot::decode(&buf))
}

pub fn write_root(device: &mut dyn BlockDevice, root: &FsRoot) -> Result<(), FsError> {
    let mut buf = [0u8; SECT_SIZE];
    root.encode(&mut buf);
    device.write(ROOT_SCT_IDX, &buf)
}

fn entry_slice(buf: &[u8; SECT_SIZE], slot: u32) -> &[u8] {
    let start = (slot * FE_BYTES) as usize;
    &buf[start..start + FE_BYTES as usize]
}

fn entry_slice_mut(buf: &mut [u8; SECT_SIZE], slot: u32) -> &mut [u8] {
    let start = (slot * FE_BYTES) as usize;
    &mut buf[start..start + FE_BYTES as usize]
}

/// Scans the whole directory for the first entry named `name`
/// (byte-for-byte, case-sensitive). Returns `Ok(None)` rather than
/// `Err(NotFound)` — callers decide what a miss means.
pub fn find(device: &dyn BlockDevice, header: &FsHeader, name: &str) -> Result<Option<FileEntry>, FsError> {
    let root = read_root(device)?;
    if root.sct_num == 0 {
        return Ok(None);
    }

    let mut cursor = root.sct_begin;
    for i in 0..root.sct_num {
        let is_last = i + 1 == root.sct_num;
        let count = if is_last {
            root.last_bytes / FE_BYTES
        } else {
            FE_ITEM_CNT
        };

        let mut buf = [0u8; SECT_SIZE];
        device.read(cursor.0, &mut buf)?;

        for slot in 0..count {
            let raw = entry_slice(&buf, slot);
            if FileEntry::is_free_slot(raw) {
                continue;
            }
            let fe = FileEntry::decode(raw);
            if fe.name_str() == name {
                return Ok(Some(fe));
            }
        }

        cursor = map::next(device, header.map_size, cursor)?;
    }

    Ok(None)
}

/// Appends a fresh, empty `FileEntry` named `name` to the directory.
/// Caller is responsible for checking the name doesn't already exist.
pub fn create(device: &mut dyn BlockDevice, header: &mut FsHeader, name: &str) -> Result<(), FsError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(FsError::BadArgument);
    }

    let mut root = read_root(device)?;

    chain::check_storage(
        device,
        header,
        &mut root.sct_begin,
        &mut root.sct_num,
        &mut root.last_bytes,
    )?;

    let last = map::find_last(device, header.map_size, root.sct_begin)?;
    if last.is_end() {
        // check_storage guarantees at least one sector once it has run.
        return Err(FsError::DeviceIo);
    }

    let slot = root.last_bytes / FE_BYTES;
    let fe = FileEntry::new(name, last, slot);

    let mut buf = [0u8; SECT_SIZE];
    device.read(last.0, &mut buf)?;
    fe.encode(entry_slice_mut(&mut buf, slot));
    device.write(last.0, &buf)?;

    root.last_bytes += FE_BYTES;
    write_root(device, &root)?;

    Ok(())
}

/// Removes the named file's directory entry and frees its data chain,
/// compacting the directory by moving the physically last entry into the
/// freed slot (see invariant 6: the moved entry keeps the freed slot's own
/// `inSctIdx`/`inSctOff`).
pub fn delete(device: &mut dyn BlockDevice, header: &mut FsHeader, name: &str) -> Result<(), FsError> {
    let target = find(device, header, name)?.ok_or(FsError::NotFound)?;
    let mut root = read_root(device)?;

    let last_sector = map::find_last(device, header.map_size, root.sct_begin)?;
    let last_slot = root.last_bytes / FE_BYTES - 1;

    let mut last_buf = [0u8; SECT_SIZE];
    device.read(last_sector.0, &mut last_buf)?;
    let last_entry = FileEntry::decode(entry_slice(&last_buf, last_slot));

    map::free_chain(device, header, target.sct_begin)?;

    let mut moved = last_entry;
    moved.in_sct_idx = target.in_sct_idx;
    moved.in_sct_off = target.in_sct_off;

    let mut target_buf = [0u8; SECT_SIZE];
    device.read(target.in_sct_idx.0, &mut target_buf)?;
    moved.encode(entry_slice_mut(&mut target_buf, target.in_sct_off));
    device.write(target.in_sct_idx.0, &target_buf)?;

    chain::erase_last(
        device,
        header,
        &mut root.sct_begin,
        &mut root.sct_num,
        &mut root.last_bytes,
        FE_BYTES,
    )?;
    write_root(device, &root)?;

    Ok(())
}

/// Renames an existing entry in place. Caller must have already confirmed
/// `old` is not open and `new` does not already exist.
pub fn rename(
    device: &mut dyn BlockDevice,
    header: &FsHeader,
    old: &str,
    new: &str,
) -> Result<(), FsError> {
    if new.is_empty() || new.len() > MAX_NAME_LEN {
        return Err(FsError::BadArgument);
    }
    if find(device, header, new)?.is_some() {
        return Err(FsError::AlreadyExists);
    }

    let target = find(device, header, old)?.ok_or(FsError::NotFound)?;

    let mut renamed = target;
    let mut name_buf = [0u8; 32];
    let bytes = new.as_bytes();
    let len = bytes.len().min(MAX_NAME_LEN);
    name_buf[..len].copy_from_slice(&bytes[..len]);
    renamed.name = name_buf;

    let mut buf = [0u8; SECT_SIZE];
    device.read(target.in_sct_idx.0, &mut buf)?;
    renamed.encode(entry_slice_mut(&mut buf, target.in_sct_off));
    device.write(target.in_sct_idx.0, &buf)?;

    Ok(())
}

/// Overwrites a single entry's persisted copy at its own slot — used by
/// the open-handle manager to flush a dirty `FileEntry` back to disk.
pub fn flush_entry(device: &mut dyn BlockDevice, fe: &FileEntry) -> Result<(), FsError> {
    let mut buf = [0u8; SECT_SIZE];
    device.read(fe.in_sct_idx.0, &mut buf)?;
    fe.encode(entry_slice_mut(&mut buf, fe.in_sct_off));
    device.write(fe.in_sct_idx.0, &buf)
}
