//! Test-only helpers shared across module unit tests.

use crate::device::MemoryBlockDevice;
use crate::layout::{AbsSector, FsHeader, FsRoot, RelSector, FIXED_SCT_SIZE, MAP_ITEM_CNT, SECT_SIZE};

/// Builds a freshly formatted in-memory device of `sectors` total sectors,
/// returning it alongside the header that was just written. Mirrors
/// [`crate::fs::Dtfs::format`] without routing through the facade, so
/// lower-level module tests don't need to depend upward on `fs`.
pub(crate) fn formatted_device(sectors: u32) -> (MemoryBlockDevice, FsHeader) {
    let mut dev = MemoryBlockDevice::new(sectors);

    let map_size = FsHeader::map_size_for(sectors);
    let free_num = sectors - FIXED_SCT_SIZE - map_size;
    let header = FsHeader {
        sct_num: sectors,
        map_size,
        free_num,
        free_begin: AbsSector(FIXED_SCT_SIZE + map_size),
    };

    let mut header_buf = [0u8; SECT_SIZE];
    header.encode(&mut header_buf);
    dev.write(0, &header_buf).unwrap();

    let root = FsRoot::empty();
    let mut root_buf = [0u8; SECT_SIZE];
    root.encode(&mut root_buf);
    dev.write(1, &root_buf).unwrap();

    // Pre-link every data sector into one ascending free chain, same as
    // the real formatting routine.
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
        dev.write(FIXED_SCT_SIZE + map_idx, &map_buf).unwrap();
    }

    (dev, header)
}

use crate::device::BlockDevice;
