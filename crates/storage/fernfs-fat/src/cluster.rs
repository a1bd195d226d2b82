//! Cluster-chain allocator: cluster/sector indexing, allocation by linear
//! FAT scan (no free-cluster bitmap), and the cursor relocation a
//! sequential file read/write walks through.

use fernfs_bcache::{Bcache, BSIZE};
use fernfs_driver_traits::{fatal, BlockDevice, PanicHook};

use crate::bpb::Bpb;
use crate::table::{read_fat, write_fat, FAT32_EOC, FAT32_EOC_WRITE};

pub fn first_sec_of_clus(bpb: &Bpb, cluster: u32) -> u64 {
    (cluster as u64 - 2) * bpb.sectors_per_cluster as u64 + bpb.first_data_sector as u64
}

/// Linear scan from cluster 2 forward for the first free (`0`) FAT slot.
/// Claims it with an end-of-chain marker and zero-fills its data, one
/// sector at a time through the buffer cache. Exhaustion is fatal: "no
/// free cluster" is treated as unrecoverable, there being no bitmap to
/// consult first.
pub fn alloc_clus<D: BlockDevice>(
    bcache: &Bcache<D>,
    dev: u32,
    bpb: &Bpb,
    panic_hook: &dyn PanicHook,
) -> u32 {
    for cluster in 2..=bpb.data_cluster_count + 1 {
        if read_fat(bcache, dev, bpb, cluster) == 0 {
            write_fat(bcache, dev, bpb, cluster, FAT32_EOC_WRITE)
                .unwrap_or_else(|_| fatal!(panic_hook, "alloc_clus: write_fat rejected in-range cluster"));
            zero_clus(bcache, dev, bpb, cluster);
            return cluster;
        }
    }
    fatal!(panic_hook, "alloc_clus: no free cluster")
}

pub fn free_clus<D: BlockDevice>(bcache: &Bcache<D>, dev: u32, bpb: &Bpb, cluster: u32, panic_hook: &dyn PanicHook) {
    write_fat(bcache, dev, bpb, cluster, 0).unwrap_or_else(|_| fatal!(panic_hook, "free_clus: cluster out of range"));
}

pub fn zero_clus<D: BlockDevice>(bcache: &Bcache<D>, dev: u32, bpb: &Bpb, cluster: u32) {
    let first = first_sec_of_clus(bpb, cluster);
    for i in 0..bpb.sectors_per_cluster as u64 {
        let mut buf = bcache.bread(dev, first + i);
        buf.iter_mut().for_each(|b| *b = 0);
        buf.write();
    }
}

/// Positions `(cur_clus, clus_cnt)` so that `cur_clus` covers file offset
/// `off`, extending the chain when `alloc` is set and the offset runs past
/// the current end. Returns the byte offset within that cluster, or `None`
/// if `off` is past the chain's current end and `alloc` is false (cursor is
/// reset to the first cluster in that case, matching the original's "give
/// up and rewind" behavior).
pub fn reloc_clus<D: BlockDevice>(
    bcache: &Bcache<D>,
    dev: u32,
    bpb: &Bpb,
    first_clus: u32,
    cur_clus: &mut u32,
    clus_cnt: &mut u32,
    off: u64,
    alloc: bool,
    panic_hook: &dyn PanicHook,
) -> Option<u32> {
    let target = (off / bpb.bytes_per_cluster as u64) as u32;

    if target > *clus_cnt {
        while target > *clus_cnt {
            let next = read_fat(bcache, dev, bpb, *cur_clus);
            if next >= FAT32_EOC {
                if alloc {
                    let new_clus = alloc_clus(bcache, dev, bpb, panic_hook);
                    write_fat(bcache, dev, bpb, *cur_clus, new_clus)
                        .unwrap_or_else(|_| fatal!(panic_hook, "reloc_clus: splice rejected"));
                    *cur_clus = new_clus;
                    *clus_cnt += 1;
                } else {
                    *cur_clus = first_clus;
                    *clus_cnt = 0;
                    return None;
                }
            } else {
                *cur_clus = next;
                *clus_cnt += 1;
            }
        }
    } else if target < *clus_cnt {
        *cur_clus = first_clus;
        *clus_cnt = 0;
        while target > *clus_cnt {
            let next = read_fat(bcache, dev, bpb, *cur_clus);
            if next >= FAT32_EOC {
                fatal!(panic_hook, "reloc_clus: reached end of chain stepping backward");
            }
            *cur_clus = next;
            *clus_cnt += 1;
        }
    }

    Some((off % bpb.bytes_per_cluster as u64) as u32)
}
