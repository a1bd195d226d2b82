//! Boot Parameter Block parsing.
//!
//! FAT32 only, matching the engine's scope: no FAT12/16 field disambiguation,
//! no root-directory-sector arithmetic for a fixed-size root directory (the
//! FAT32 root is just cluster chain like any other directory).

use fernfs_bcache::BSIZE;
use fernfs_vfs::{FatError, FatResult};

/// Process-wide, immutable after `init`. Field names mirror the BPB layout;
/// the four `[ADDED]`-derived fields below are computed once at parse time
/// so hot paths never repeat the arithmetic.
#[derive(Debug, Clone, Copy)]
pub struct Bpb {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sector_count: u16,
    pub fat_count: u8,
    /// Sectors per FAT copy (the FAT32 32-bit field; FAT32 always leaves the
    /// legacy 16-bit field zero).
    pub fat_size: u32,
    pub root_cluster: u32,

    pub first_data_sector: u32,
    pub data_sector_count: u32,
    pub data_cluster_count: u32,
    pub bytes_per_cluster: u32,
}

impl Bpb {
    /// Parses sector 0. Validates the `"FAT32"` tag at byte 82 and that
    /// `bytes_per_sector == BSIZE`; the latter is a fatal mismatch at init
    /// since the buffer cache's sector size is fixed at compile time,
    /// surfaced here as an error so `init()` can choose how to report it.
    pub fn parse(sector0: &[u8; BSIZE]) -> FatResult<Self> {
        if sector0[510] != 0x55 || sector0[511] != 0xAA {
            return Err(FatError::NotFound);
        }
        if &sector0[82..87] != b"FAT32" {
            return Err(FatError::NotFound);
        }

        let bytes_per_sector = u16::from_le_bytes([sector0[11], sector0[12]]);
        let sectors_per_cluster = sector0[13];
        let reserved_sector_count = u16::from_le_bytes([sector0[14], sector0[15]]);
        let fat_count = sector0[16];
        let total_sectors_16 = u16::from_le_bytes([sector0[19], sector0[20]]);
        let total_sectors_32 = u32::from_le_bytes([sector0[32], sector0[33], sector0[34], sector0[35]]);
        let fat_size = u32::from_le_bytes([sector0[36], sector0[37], sector0[38], sector0[39]]);
        let root_cluster = u32::from_le_bytes([sector0[44], sector0[45], sector0[46], sector0[47]]);

        if bytes_per_sector as usize != BSIZE {
            return Err(FatError::Overflow);
        }
        if sectors_per_cluster == 0 || fat_count == 0 || fat_size == 0 {
            return Err(FatError::NotFound);
        }

        let total_sectors = if total_sectors_16 != 0 { total_sectors_16 as u32 } else { total_sectors_32 };
        let first_data_sector = reserved_sector_count as u32 + fat_count as u32 * fat_size;
        let data_sector_count = total_sectors.saturating_sub(first_data_sector);
        let data_cluster_count = data_sector_count / sectors_per_cluster as u32;
        let bytes_per_cluster = bytes_per_sector as u32 * sectors_per_cluster as u32;

        Ok(Bpb {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sector_count,
            fat_count,
            fat_size,
            root_cluster,
            first_data_sector,
            data_sector_count,
            data_cluster_count,
            bytes_per_cluster,
        })
    }
}
