//! In-memory block device and a hand-built empty FAT32 volume, for unit and
//! integration tests. Grounded in `wfs-common`'s `core/tests.rs`
//! `MockBlockDevice` convention: a small struct implementing the crate's
//! `BlockDevice` trait purely in memory, seeded before each test.
#![cfg(feature = "std")]

extern crate std;

use std::vec;
use std::vec::Vec;

use fernfs_bcache::{Bcache, BSIZE};
use fernfs_driver_traits::{BlockDevice, BlockGeometry, DriverError};

use crate::bpb::Bpb;
use crate::table::FAT32_EOC_WRITE;

pub struct MemBlockDevice {
    sectors: Vec<[u8; BSIZE]>,
}

impl BlockDevice for MemBlockDevice {
    fn geometry(&self) -> BlockGeometry {
        BlockGeometry { sector_size: BSIZE as u32, total_sectors: self.sectors.len() as u64, optimal_transfer: 1 }
    }

    fn read_sectors(&mut self, start: u64, buffer: &mut [u8]) -> Result<usize, DriverError> {
        let sec = self.sectors.get(start as usize).ok_or(DriverError::InvalidParameter)?;
        buffer.copy_from_slice(sec);
        Ok(buffer.len())
    }

    fn write_sectors(&mut self, start: u64, buffer: &[u8]) -> Result<usize, DriverError> {
        let sec = self.sectors.get_mut(start as usize).ok_or(DriverError::InvalidParameter)?;
        sec.copy_from_slice(buffer);
        Ok(buffer.len())
    }
}

const RESERVED: u16 = 32;
const FAT_COUNT: u8 = 2;
const FAT_SIZE: u32 = 4;
const DATA_CLUSTERS: u32 = 200;

/// Builds an empty FAT32 volume (root directory has zero entries) with the
/// given sectors-per-cluster, returning the raw in-memory device plus the
/// parsed `Bpb`. For tests that drive a `Filesystem` directly, which owns
/// its own `Bcache` built from the device.
pub fn fresh_device(sectors_per_cluster: u8) -> (MemBlockDevice, Bpb) {
    let total_sectors = RESERVED as u32 + FAT_COUNT as u32 * FAT_SIZE + DATA_CLUSTERS * sectors_per_cluster as u32;
    let mut sectors = vec![[0u8; BSIZE]; total_sectors as usize + 16];

    let boot = &mut sectors[0];
    boot[510] = 0x55;
    boot[511] = 0xAA;
    boot[11..13].copy_from_slice(&(BSIZE as u16).to_le_bytes());
    boot[13] = sectors_per_cluster;
    boot[14..16].copy_from_slice(&RESERVED.to_le_bytes());
    boot[16] = FAT_COUNT;
    boot[32..36].copy_from_slice(&total_sectors.to_le_bytes());
    boot[36..40].copy_from_slice(&FAT_SIZE.to_le_bytes());
    boot[44..48].copy_from_slice(&2u32.to_le_bytes()); // root cluster
    boot[82..87].copy_from_slice(b"FAT32");

    let bpb = Bpb::parse(&sectors[0]).expect("hand-built bpb must parse");

    // Mark the root directory's cluster (2) allocated and end-of-chain so
    // alloc_clus's linear scan never claims it as free.
    let fat_off = (2u32 * 4) as usize;
    sectors[RESERVED as usize][fat_off..fat_off + 4].copy_from_slice(&(FAT32_EOC_WRITE & 0x0FFF_FFFF).to_le_bytes());

    (MemBlockDevice { sectors }, bpb)
}

/// Same volume as `fresh_device`, but already wrapped in a ready-to-use
/// `Bcache`, for tests that exercise `table`/`cluster` functions directly
/// without going through `Filesystem`.
pub fn fresh_volume(sectors_per_cluster: u8) -> (Bcache<MemBlockDevice>, Bpb) {
    let (device, bpb) = fresh_device(sectors_per_cluster);
    (Bcache::new(device), bpb)
}
