//! End-to-end scenarios against a hand-built in-memory FAT32 volume: the
//! buffer cache and entry cache exercised together through `Filesystem`,
//! not unit-by-unit.

use fernfs_fat::test_support;
use fernfs_fat::{Filesystem, Process};

struct RootCwd;

impl Process for RootCwd {
    fn cwd(&self) -> fernfs_fat::EntryHandle {
        unreachable!("every path below is absolute")
    }
}

#[test]
fn create_write_read_round_trip() {
    let (device, _bpb) = test_support::fresh_device(2);
    let fs = Filesystem::init(device).unwrap();
    let proc = RootCwd;

    let file = fs.create(&proc, b"/letter.txt", false).unwrap();
    let n = fs.write(&file, 0, b"dear diary").unwrap();
    assert_eq!(n, 10);

    let mut buf = [0u8; 10];
    let read = fs.read(&file, 0, &mut buf);
    assert_eq!(read, 10);
    assert_eq!(&buf, b"dear diary");
    fs.close(file);
}

#[test]
fn write_spanning_multiple_clusters_reads_back_whole() {
    // sectors_per_cluster = 2 -> 1024 bytes/cluster; write enough to span
    // three clusters and confirm reloc_clus's chain-following round-trips.
    let (device, _bpb) = test_support::fresh_device(2);
    let fs = Filesystem::init(device).unwrap();
    let proc = RootCwd;

    let file = fs.create(&proc, b"/big.bin", false).unwrap();
    let payload: Vec<u8> = (0..2600u32).map(|i| (i % 251) as u8).collect();
    let n = fs.write(&file, 0, &payload).unwrap();
    assert_eq!(n, payload.len());

    let mut buf = vec![0u8; payload.len()];
    let read = fs.read(&file, 0, &mut buf);
    assert_eq!(read, payload.len());
    assert_eq!(buf, payload);
    fs.close(file);
}

#[test]
fn truncate_frees_cluster_chain_and_resets_size() {
    let (device, _bpb) = test_support::fresh_device(2);
    let fs = Filesystem::init(device).unwrap();
    let proc = RootCwd;

    let file = fs.create(&proc, b"/shrinkme.bin", false).unwrap();
    fs.write(&file, 0, &[0xAAu8; 3000]).unwrap();
    assert_eq!(fs.stat(&file).size, 3000);

    fs.truncate(&file);
    assert_eq!(fs.stat(&file).size, 0);

    let mut buf = [0u8; 8];
    assert_eq!(fs.read(&file, 0, &mut buf), 0);
    fs.close(file);
}

#[test]
fn buffer_cache_survives_eviction_pressure_across_many_files() {
    // Force the shared buffer cache well past its pool size by touching
    // many distinct files/directories, then confirm an early file's
    // content still reads back correctly (through a reread from disk if
    // its buffers were evicted, a cache hit if not — either way correct).
    let (device, _bpb) = test_support::fresh_device(1);
    let fs = Filesystem::init(device).unwrap();
    let proc = RootCwd;

    let first = fs.create(&proc, b"/early.txt", false).unwrap();
    fs.write(&first, 0, b"first").unwrap();
    fs.close(first);

    for i in 0..(fernfs_bcache::NBUF as u32 + 10) {
        let name = format!("/f{i}.bin");
        let f = fs.create(&proc, name.as_bytes(), false).unwrap();
        fs.write(&f, 0, &[i as u8; 16]).unwrap();
        fs.close(f);
    }

    let reopened = fs.open(&proc, b"/early.txt").unwrap();
    let mut buf = [0u8; 5];
    fs.read(&reopened, 0, &mut buf);
    assert_eq!(&buf, b"first");
    fs.close(reopened);
}

#[test]
fn long_filename_round_trips_through_close_and_reopen() {
    let (device, _bpb) = test_support::fresh_device(2);
    let fs = Filesystem::init(device).unwrap();
    let proc = RootCwd;
    let name = b"this is a rather long descriptive file name.txt";

    let file = fs.create(&proc, name, false).unwrap();
    fs.write(&file, 0, b"x").unwrap();
    fs.close(file);

    let reopened = fs.open(&proc, name).unwrap();
    let stat = fs.stat(&reopened);
    assert_eq!(stat.name(), name);
    fs.close(reopened);
}

#[test]
fn remove_defers_cluster_free_until_last_close() {
    let (device, _bpb) = test_support::fresh_device(2);
    let fs = Filesystem::init(device).unwrap();
    let proc = RootCwd;

    let file = fs.create(&proc, b"/held-open.bin", false).unwrap();
    fs.write(&file, 0, &[1u8; 500]).unwrap();
    let dup = fs.dup(&file);

    // Removing the name unlinks the directory record immediately; the path
    // is unresolvable from here on, but the two open handles above still
    // reference live content until both are closed.
    fs.remove(&proc, b"/held-open.bin").unwrap();
    assert!(fs.open(&proc, b"/held-open.bin").is_err());

    let mut buf = [0u8; 500];
    assert_eq!(fs.read(&file, 0, &mut buf), 500);
    assert_eq!(buf[0], 1);

    fs.close(dup);
    fs.close(file);
}
