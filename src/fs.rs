//! The top-level facade: ties the allocator, root directory, and
//! open-handle table together behind the public operation table in the
//! crate documentation (format/create/open/read/write/seek/...).

use crate::device::BlockDevice;
use crate::error::FsError;
use crate::handle::{self, FileHandle, OpenTable};
use crate::layout::{
    AbsSector, FsHeader, FsRoot, RelSector, FIXED_SCT_SIZE, HEADER_SCT_IDX, MAP_ITEM_CNT,
    ROOT_SCT_IDX, SECT_SIZE,
};
use crate::map;
use crate::root;

/// A mounted DTFS image: a block device plus the in-memory state needed to
/// talk to it (the cached header and the table of currently open files).
///
/// Multiple `Dtfs` values can coexist in one process, each over its own
/// device, since all open-handle state lives here rather than in a
/// module-level singleton.
pub struct Dtfs<D: BlockDevice> {
    device: D,
    header: FsHeader,
    table: OpenTable,
}

impl<D: BlockDevice> Dtfs<D> {
    /// Formats `device` from scratch and returns it mounted.
    ///
    /// Writes the header, an empty root, and a sector map that pre-links
    /// every data sector into one ascending free chain headed at
    /// `2 + mapSize`, per §4.5.
    pub fn format(mut device: D) -> Result<Self, FsError> {
        let sct_num = device.sectors();
        if sct_num <= FIXED_SCT_SIZE {
            log::warn!("dtfs: format: device of {sct_num} sectors has no room for a header and root");
            return Err(FsError::BadArgument);
        }
        let map_size = FsHeader::map_size_for(sct_num);
        if sct_num <= FIXED_SCT_SIZE + map_size {
            log::warn!("dtfs: format: device of {sct_num} sectors has no room for data sectors");
            return Err(FsError::BadArgument);
        }
        let free_num = sct_num - FIXED_SCT_SIZE - map_size;

        let header = FsHeader {
            sct_num,
            map_size,
            free_num,
            free_begin: AbsSector(FIXED_SCT_SIZE + map_size),
        };

        let mut header_buf = [0u8; SECT_SIZE];
        header.encode(&mut header_buf);
        device.write(HEADER_SCT_IDX, &header_buf)?;

        let root = FsRoot::empty();
        let mut root_buf = [0u8; SECT_SIZE];
        root.encode(&mut root_buf);
        device.write(ROOT_SCT_IDX, &root_buf)?;

        let mut map_buf = [0u8; SECT_SIZE];
        let mut current = 0u32;
        for map_idx in 0..map_size {
            map_buf.fill(0);
            for slot in 0..MAP_ITEM_CNT {
                if current >= free_num {
                    break;
                }
                let value = if current + 1 == free_num {
                    RelSector::END.0
                } else {
                    current + 1
                };
                let off = slot as usize * 4;
                map_buf[off..off + 4].copy_from_slice(&value.to_le_bytes());
                current += 1;
            }
            device.write(FIXED_SCT_SIZE + map_idx, &map_buf)?;
        }

        log::debug!("dtfs: formatted {sct_num}-sector device, map_size={map_size}, free_num={free_num}");

        Ok(Dtfs {
            device,
            header,
            table: OpenTable::new(),
        })
    }

    /// Returns whether `device` already holds a formatted DTFS image,
    /// without mutating it. Does not require mounting.
    pub fn is_formatted(device: &D) -> Result<bool, FsError> {
        let mut header_buf = [0u8; SECT_SIZE];
        device.read(HEADER_SCT_IDX, &mut header_buf)?;
        if !FsHeader::magic_matches(&header_buf) {
            return Ok(false);
        }

        let mut root_buf = [0u8; SECT_SIZE];
        device.read(ROOT_SCT_IDX, &mut root_buf)?;
        if !FsRoot::magic_matches(&root_buf) {
            return Ok(false);
        }

        let header = FsHeader::decode(&header_buf);
        Ok(header.sct_num == device.sectors())
    }

    /// Mounts an already-formatted `device`. Fails with `NotFormatted` if
    /// it isn't.
    pub fn mount(device: D) -> Result<Self, FsError> {
        if !Self::is_formatted(&device)? {
            return Err(FsError::NotFormatted);
        }
        let header = map::read_header(&device)?;
        Ok(Dtfs {
            device,
            header,
            table: OpenTable::new(),
        })
    }

    /// Creates an empty file named `name`. Fails with `AlreadyExists` if a
    /// file with that name is already present.
    pub fn create(&mut self, name: &str) -> Result<(), FsError> {
        if root::find(&self.device, &self.header, name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        root::create(&mut self.device, &mut self.header, name)
    }

    /// Reports whether `name` currently has a directory entry.
    pub fn existed(&self, name: &str) -> Result<bool, FsError> {
        Ok(root::find(&self.device, &self.header, name)?.is_some())
    }

    /// Deletes `name`, freeing its data chain and compacting the directory.
    /// Fails with `AlreadyOpen` if the file is currently open.
    pub fn delete(&mut self, name: &str) -> Result<(), FsError> {
        if self.table.is_open(name) {
            return Err(FsError::AlreadyOpen);
        }
        root::delete(&mut self.device, &mut self.header, name)?;
        log::debug!("dtfs: deleted {name}");
        Ok(())
    }

    /// Renames `old` to `new`. Fails if `old` is open, doesn't exist, or
    /// `new` already exists.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), FsError> {
        if self.table.is_open(old) {
            return Err(FsError::AlreadyOpen);
        }
        root::rename(&mut self.device, &self.header, old, new)
    }

    /// Opens `name` for reading and writing. Fails with `AlreadyOpen` if a
    /// handle for this name is already live, or `NotFound` if it doesn't
    /// exist.
    pub fn open(&mut self, name: &str) -> Result<FileHandle, FsError> {
        handle::open(&mut self.table, &self.device, &self.header, name)
    }

    /// Flushes and releases `fd`.
    pub fn close(&mut self, fd: FileHandle) -> Result<(), FsError> {
        handle::close(&mut self.table, &mut self.device, &mut self.header, fd)
    }

    /// Reads up to `buf.len()` bytes starting at the handle's current
    /// position, clamped to the file's length. Returns the number of bytes
    /// actually copied and advances the position by that amount.
    pub fn read(&mut self, fd: FileHandle, buf: &mut [u8]) -> Result<usize, FsError> {
        handle::read(&mut self.table, &mut self.device, &mut self.header, fd, buf)
    }

    /// Writes `buf` at the handle's current position, growing the file (and
    /// allocating sectors) as needed, and advances the position.
    pub fn write(&mut self, fd: FileHandle, buf: &[u8]) -> Result<usize, FsError> {
        handle::write(&mut self.table, &mut self.device, &mut self.header, fd, buf)
    }

    /// Moves the handle's position to `pos`, clamped to the file's current
    /// length. Returns the position actually seeked to.
    pub fn seek(&mut self, fd: FileHandle, pos: u32) -> Result<u32, FsError> {
        handle::seek(&mut self.table, &mut self.device, &mut self.header, fd, pos)
    }

    /// Returns the handle's current position.
    pub fn tell(&self, fd: FileHandle) -> Result<u32, FsError> {
        handle::tell(&self.table, fd)
    }

    /// Returns the file's current length in bytes.
    pub fn length(&self, fd: FileHandle) -> Result<u32, FsError> {
        handle::length(&self.table, fd)
    }

    /// Erases up to `bytes` bytes from the end of the file, freeing sectors
    /// as they empty out. Returns the number of bytes actually erased.
    pub fn erase(&mut self, fd: FileHandle, bytes: u32) -> Result<u32, FsError> {
        handle::erase(&mut self.table, &mut self.device, &mut self.header, fd, bytes)
    }

    /// Flushes the handle's dirty cache sector and directory entry to disk
    /// without closing it.
    pub fn flush(&mut self, fd: FileHandle) -> Result<(), FsError> {
        handle::flush(&mut self.table, &mut self.device, &mut self.header, fd)
    }

    /// Borrows the underlying device, e.g. to persist an in-memory image.
    pub fn device(&self) -> &D {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryBlockDevice;

    fn formatted(sectors: u32) -> Dtfs<MemoryBlockDevice> {
        Dtfs::format(MemoryBlockDevice::new(sectors)).unwrap()
    }

    #[test]
    fn format_reports_formatted_and_mount_round_trips() {
        let dev = MemoryBlockDevice::new(64);
        assert!(!Dtfs::is_formatted(&dev).unwrap());

        let fs = Dtfs::format(dev).unwrap();
        assert!(Dtfs::is_formatted(fs.device()).unwrap());
    }

    #[test]
    fn mount_unformatted_device_fails() {
        let dev = MemoryBlockDevice::new(64);
        assert_eq!(Dtfs::mount(dev).unwrap_err(), FsError::NotFormatted);
    }

    #[test]
    fn s1_format_create_length() {
        let mut fs = formatted(2048);
        fs.create("hello").unwrap();
        let fd = fs.open("hello").unwrap();
        assert_eq!(fs.length(fd).unwrap(), 0);
        fs.close(fd).unwrap();
    }

    #[test]
    fn create_duplicate_name_fails() {
        let mut fs = formatted(64);
        fs.create("a").unwrap();
        assert_eq!(fs.create("a").unwrap_err(), FsError::AlreadyExists);
    }

    #[test]
    fn s2_small_write_read() {
        let mut fs = formatted(64);
        fs.create("hello").unwrap();
        let fd = fs.open("hello").unwrap();

        assert_eq!(fs.write(fd, b"abc").unwrap(), 3);
        assert_eq!(fs.seek(fd, 0).unwrap(), 0);

        let mut buf = [0u8; 3];
        assert_eq!(fs.read(fd, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");
        assert_eq!(fs.length(fd).unwrap(), 3);

        fs.close(fd).unwrap();
    }

    #[test]
    fn open_same_name_twice_fails() {
        let mut fs = formatted(64);
        fs.create("a").unwrap();
        let fd = fs.open("a").unwrap();
        assert_eq!(fs.open("a").unwrap_err(), FsError::AlreadyOpen);
        fs.close(fd).unwrap();
        assert!(fs.open("a").is_ok());
    }

    #[test]
    fn delete_while_open_fails() {
        let mut fs = formatted(64);
        fs.create("a").unwrap();
        let fd = fs.open("a").unwrap();
        assert_eq!(fs.delete("a").unwrap_err(), FsError::AlreadyOpen);
        fs.close(fd).unwrap();
        assert!(fs.delete("a").is_ok());
    }

    #[test]
    fn s6_rename_conflict_leaves_both_files() {
        let mut fs = formatted(64);
        fs.create("a").unwrap();
        fs.create("b").unwrap();
        assert_eq!(fs.rename("a", "b").unwrap_err(), FsError::AlreadyExists);
        assert!(fs.existed("a").unwrap());
        assert!(fs.existed("b").unwrap());
    }

    #[test]
    fn s10_rename_moves_content() {
        let mut fs = formatted(64);
        fs.create("a").unwrap();
        let fd = fs.open("a").unwrap();
        fs.write(fd, b"payload").unwrap();
        fs.close(fd).unwrap();

        fs.rename("a", "b").unwrap();
        assert!(!fs.existed("a").unwrap());
        assert!(fs.existed("b").unwrap());

        let fd = fs.open("b").unwrap();
        let mut buf = [0u8; 7];
        fs.seek(fd, 0).unwrap();
        fs.read(fd, &mut buf).unwrap();
        assert_eq!(&buf, b"payload");
        fs.close(fd).unwrap();
    }
}
