//! Integration tests and property tests run against the shipped in-memory
//! block device: the crate's black-box behavior (§8 of the design) rather
//! than the unit-level mechanics already covered alongside each module.

use dtfs::{BlockDevice, Dtfs, FsError, MemoryBlockDevice};
use proptest::collection::vec;
use proptest::prelude::*;

fn formatted(sectors: u32) -> Dtfs<MemoryBlockDevice> {
    Dtfs::format(MemoryBlockDevice::new(sectors)).unwrap()
}

#[test]
fn s3_cross_sector_write_occupies_two_sectors() {
    let mut fs = formatted(64);
    fs.create("big").unwrap();
    let fd = fs.open("big").unwrap();

    let data = vec![0xAAu8; 600];
    assert_eq!(fs.write(fd, &data).unwrap(), 600);
    assert_eq!(fs.length(fd).unwrap(), 600);

    fs.seek(fd, 0).unwrap();
    let mut buf = [0u8; 600];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 600);
    assert!(buf.iter().all(|&b| b == 0xAA));

    fs.close(fd).unwrap();
}

#[test]
fn s4_erase_across_sector_boundary_frees_one_sector() {
    let mut fs = formatted(64);
    fs.create("big").unwrap();
    let fd = fs.open("big").unwrap();
    fs.write(fd, &vec![0xAAu8; 600]).unwrap();

    let erased = fs.erase(fd, 100).unwrap();
    assert_eq!(erased, 100);
    assert_eq!(fs.length(fd).unwrap(), 500);

    fs.close(fd).unwrap();
}

#[test]
fn s5_delete_compacts_directory_keeps_siblings_readable() {
    let mut fs = formatted(64);
    for name in ["a", "b", "c"] {
        fs.create(name).unwrap();
    }
    let fd = fs.open("b").unwrap();
    fs.write(fd, b"bbb").unwrap();
    fs.close(fd).unwrap();

    fs.delete("a").unwrap();

    assert!(!fs.existed("a").unwrap());
    assert!(fs.existed("b").unwrap());
    assert!(fs.existed("c").unwrap());

    let fd = fs.open("b").unwrap();
    let mut buf = [0u8; 3];
    fs.read(fd, &mut buf).unwrap();
    assert_eq!(&buf, b"bbb");
    fs.close(fd).unwrap();
}

#[test]
fn format_on_too_small_device_is_rejected() {
    let dev = MemoryBlockDevice::new(2);
    assert_eq!(Dtfs::<MemoryBlockDevice>::format(dev).unwrap_err(), FsError::BadArgument);
}

/// Walks a file's (or the free list's) chain through the device directly,
/// bypassing the crate's own walkers, so the partition check below doesn't
/// just validate the implementation against itself.
fn walk_chain_via_map(device: &MemoryBlockDevice, header_buf: &[u8; 512], mut abs: u32) -> Vec<u32> {
    use dtfs::layout::{FsHeader, FIXED_SCT_SIZE, MAP_ITEM_CNT, SCT_END};

    let header = FsHeader::decode(header_buf);
    let mut out = Vec::new();
    while abs != SCT_END {
        out.push(abs);
        let rel = abs - FIXED_SCT_SIZE - header.map_size;
        let sct_off = rel / MAP_ITEM_CNT;
        let idx_off = rel % MAP_ITEM_CNT;
        let mut map_buf = [0u8; 512];
        device.read(FIXED_SCT_SIZE + sct_off, &mut map_buf).unwrap();
        let off = idx_off as usize * 4;
        let next_rel = u32::from_le_bytes(map_buf[off..off + 4].try_into().unwrap());
        abs = if next_rel == SCT_END {
            SCT_END
        } else {
            next_rel + FIXED_SCT_SIZE + header.map_size
        };
    }
    out
}

proptest! {
    /// After any sequence of create/write/erase/delete ops, the free list,
    /// every remaining file's chain, and the root chain together cover the
    /// data area with no overlaps and no gaps (testable property #2).
    #[test]
    fn sector_set_partitions_data_area(
        writes in vec(vec(any::<u8>(), 0..900), 1..6),
    ) {
        use dtfs::layout::{FsHeader, FsRoot, HEADER_SCT_IDX, ROOT_SCT_IDX, FIXED_SCT_SIZE, SCT_END};

        let mut fs = formatted(256);
        let mut names = Vec::new();
        for (i, payload) in writes.iter().enumerate() {
            let name = format!("f{i}");
            fs.create(&name).unwrap();
            let fd = fs.open(&name).unwrap();
            fs.write(fd, payload).unwrap();
            fs.close(fd).unwrap();
            names.push(name);
        }
        // Delete every other file so both free-list growth and directory
        // compaction participate in the final partition.
        for name in names.iter().step_by(2) {
            fs.delete(name).unwrap();
        }

        let device = fs.device();
        let mut header_buf = [0u8; 512];
        device.read(HEADER_SCT_IDX, &mut header_buf).unwrap();
        let header = FsHeader::decode(&header_buf);

        let mut root_buf = [0u8; 512];
        device.read(ROOT_SCT_IDX, &mut root_buf).unwrap();
        let root = FsRoot::decode(&root_buf);

        let mut seen = std::collections::HashSet::new();
        let mut total = 0usize;

        let mut chains: Vec<u32> = Vec::new();
        if header.free_begin.0 != SCT_END {
            chains.extend(walk_chain_via_map(device, &header_buf, header.free_begin.0));
        }
        if root.sct_begin.0 != SCT_END {
            chains.extend(walk_chain_via_map(device, &header_buf, root.sct_begin.0));
        }

        for (i, _) in writes.iter().enumerate() {
            let name = format!("f{i}");
            if let Ok(true) = fs.existed(&name) {
                let fd_chain_head = {
                    // Re-derive sctBegin straight from the on-disk entry,
                    // independent of the open-handle path.
                    let fe = dtfs::root::find(device, &header, &name).unwrap().unwrap();
                    fe.sct_begin.0
                };
                if fd_chain_head != SCT_END {
                    chains.extend(walk_chain_via_map(device, &header_buf, fd_chain_head));
                }
            }
        }

        for sct in &chains {
            total += 1;
            prop_assert!(seen.insert(*sct), "sector {sct} appeared in more than one chain");
        }

        let data_sectors = header.sct_num - FIXED_SCT_SIZE - header.map_size;
        prop_assert_eq!(total as u32, data_sectors);
    }

    /// create-open-write(v)-close-open-read(|v|)-close yields `v` back
    /// (testable property #6).
    #[test]
    fn round_trip_write_then_read(data in vec(any::<u8>(), 0..2000)) {
        let mut fs = formatted(64);
        fs.create("roundtrip").unwrap();

        let fd = fs.open("roundtrip").unwrap();
        fs.write(fd, &data).unwrap();
        fs.close(fd).unwrap();

        let fd = fs.open("roundtrip").unwrap();
        prop_assert_eq!(fs.length(fd).unwrap() as usize, data.len());
        let mut buf = vec![0u8; data.len()];
        fs.read(fd, &mut buf).unwrap();
        fs.close(fd).unwrap();

        prop_assert_eq!(buf, data);
    }

    /// Seeking into previously-written content and overwriting a span in
    /// the middle leaves the untouched bytes on either side intact
    /// (testable property #7).
    #[test]
    fn seek_then_overwrite_preserves_surrounding_bytes(
        original in vec(any::<u8>(), 10..500),
        k in 0usize..10,
        overwrite in vec(any::<u8>(), 0..10),
    ) {
        let k = k.min(original.len() - 1);
        let m = overwrite.len().min(original.len() - k);
        let overwrite = &overwrite[..m];

        let mut fs = formatted(64);
        fs.create("seekwrite").unwrap();
        let fd = fs.open("seekwrite").unwrap();
        fs.write(fd, &original).unwrap();

        fs.seek(fd, k as u32).unwrap();
        fs.write(fd, overwrite).unwrap();

        fs.seek(fd, 0).unwrap();
        let mut buf = vec![0u8; original.len()];
        fs.read(fd, &mut buf).unwrap();
        fs.close(fd).unwrap();

        let mut expected = original.clone();
        expected[k..k + m].copy_from_slice(overwrite);
        prop_assert_eq!(buf, expected);
    }

    /// erase(len - k) leaves exactly the first k bytes (testable property
    /// #9).
    #[test]
    fn erase_truncates_to_prefix(
        data in vec(any::<u8>(), 1..500),
        k in 0usize..500,
    ) {
        let k = k.min(data.len() - 1);

        let mut fs = formatted(64);
        fs.create("erase").unwrap();
        let fd = fs.open("erase").unwrap();
        fs.write(fd, &data).unwrap();

        fs.erase(fd, (data.len() - k) as u32).unwrap();
        prop_assert_eq!(fs.length(fd).unwrap() as usize, k);

        fs.seek(fd, 0).unwrap();
        let mut buf = vec![0u8; k];
        fs.read(fd, &mut buf).unwrap();
        fs.close(fd).unwrap();

        prop_assert_eq!(buf, &data[..k]);
    }
}
