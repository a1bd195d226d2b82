//! Raw FAT entry access.
//!
//! Only FAT copy #1 is ever touched, on both read and write. Mirroring
//! writes to the remaining FAT copies is left undone (see `DESIGN.md`)
//! rather than invented here.

use fernfs_bcache::Bcache;
use fernfs_driver_traits::BlockDevice;
use fernfs_vfs::{FatError, FatResult};

use crate::bpb::Bpb;

/// Any value at or above this is an end-of-chain sentinel.
pub const FAT32_EOC: u32 = 0x0FFF_FFF8;
/// New chain terminators are written with these low bits set; any value
/// `>= FAT32_EOC` would do, `+7` has no documented rationale and is kept
/// as-is (see `DESIGN.md`).
pub const FAT32_EOC_WRITE: u32 = FAT32_EOC + 7;

fn fat_sec_of_clus(bpb: &Bpb, cluster: u32, fat_copy: u32) -> u64 {
    let per_sector = bpb.bytes_per_sector as u32;
    bpb.reserved_sector_count as u64
        + ((cluster as u64 * 4) / per_sector as u64)
        + (bpb.fat_size as u64 * (fat_copy as u64 - 1))
}

fn fat_off_of_clus(bpb: &Bpb, cluster: u32) -> usize {
    ((cluster as u64 * 4) % bpb.bytes_per_sector as u64) as usize
}

/// Reads cluster `c`'s FAT entry. Already-terminal values pass through
/// unchanged; a cluster past the end of the data region reads as free (`0`)
/// rather than touching the device at all.
pub fn read_fat<D: BlockDevice>(bcache: &Bcache<D>, dev: u32, bpb: &Bpb, cluster: u32) -> u32 {
    if cluster >= FAT32_EOC {
        return cluster;
    }
    if cluster > bpb.data_cluster_count + 1 {
        return 0;
    }

    let sector = fat_sec_of_clus(bpb, cluster, 1);
    let off = fat_off_of_clus(bpb, cluster);
    let buf = bcache.bread(dev, sector);
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]) & 0x0FFF_FFFF
}

/// Writes cluster `c`'s FAT entry in FAT copy #1 and flushes synchronously.
/// Rejects writes past the data region rather than corrupting the FAT
/// region that follows it.
pub fn write_fat<D: BlockDevice>(bcache: &Bcache<D>, dev: u32, bpb: &Bpb, cluster: u32, value: u32) -> FatResult<()> {
    if cluster > bpb.data_cluster_count + 1 {
        return Err(FatError::Overflow);
    }

    let sector = fat_sec_of_clus(bpb, cluster, 1);
    let off = fat_off_of_clus(bpb, cluster);
    let mut buf = bcache.bread(dev, sector);
    let masked = value & 0x0FFF_FFFF;
    buf[off..off + 4].copy_from_slice(&masked.to_le_bytes());
    buf.write();
    Ok(())
}
