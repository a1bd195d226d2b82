//! A FAT32 filesystem engine built on a pluggable block device and its own
//! buffer cache: boot-sector parsing, FAT table access and cluster
//! allocation, the on-disk directory-entry codec, and the entry cache that
//! ties them together into open/read/write/truncate/remove operations.
//!
//! `no_std` by default; the `std` feature turns it on for host-side testing
//! and enables `test_support`, a hand-built in-memory volume.
#![cfg_attr(not(feature = "std"), no_std)]

mod bpb;
mod cluster;
mod dir;
mod entry;
mod path;
#[cfg(feature = "std")]
pub mod test_support;
mod table;

pub use bpb::Bpb;
pub use dir::FAT32_MAX_FILENAME;
pub use entry::{EntryCache, EntryHandle, ENTRY_CACHE_NUM, ROOT_SLOT};
pub use path::{resolve, resolve_parent, Process};
pub use table::{FAT32_EOC, FAT32_EOC_WRITE};

use fernfs_bcache::{Bcache, BSIZE};
use fernfs_driver_traits::{trace, BlockDevice, CorePanicHook, Logger, NullLogger, PanicHook, UserCopy};
use fernfs_vfs::{FatResult, Stat, VolumeInfo};

/// A single mounted FAT32 volume: one buffer cache, one parsed boot sector,
/// one entry cache. Constructed once at init and held for the filesystem's
/// lifetime as a single value rather than a set of freestanding global
/// statics.
pub struct Filesystem<D: BlockDevice> {
    bcache: Bcache<D>,
    bpb: Bpb,
    entries: EntryCache,
}

impl<D: BlockDevice> Filesystem<D> {
    /// Reads sector 0 from `device`, parses it as a FAT32 boot sector, and
    /// seeds the root directory. Fails if the sector doesn't look like a
    /// FAT32 boot sector or its sector size doesn't match this engine's
    /// compile-time `BSIZE`.
    pub fn init(device: D) -> FatResult<Self> {
        Self::with_hooks(device, &NullLogger, &CorePanicHook)
    }

    pub fn with_hooks(device: D, logger: &'static dyn Logger, panic_hook: &'static dyn PanicHook) -> FatResult<Self> {
        let bcache = Bcache::with_hooks(device, logger, panic_hook);
        let sector0 = {
            let buf = bcache.bread(0, 0);
            let mut copy = [0u8; BSIZE];
            copy.copy_from_slice(&buf[..]);
            copy
        };
        let bpb = Bpb::parse(&sector0)?;
        trace!(logger, "fs init: spc={} root_clus={} data_clusters={}", bpb.sectors_per_cluster, bpb.root_cluster, bpb.data_cluster_count);
        let entries = EntryCache::with_hooks(logger, panic_hook);
        entries.init_root(0, bpb.root_cluster);
        Ok(Filesystem { bcache, bpb, entries })
    }

    pub fn volume_info(&self) -> VolumeInfo {
        VolumeInfo {
            bytes_per_sector: self.bpb.bytes_per_sector,
            sectors_per_cluster: self.bpb.sectors_per_cluster,
            data_cluster_count: self.bpb.data_cluster_count,
        }
    }

    pub fn root(&self) -> EntryHandle {
        self.entries.root()
    }

    pub fn dup(&self, e: &EntryHandle) -> EntryHandle {
        self.entries.dup(e)
    }

    pub fn close(&self, e: EntryHandle) {
        self.entries.put(&self.bcache, &self.bpb, e);
    }

    pub fn open(&self, proc: &dyn Process, path: &[u8]) -> FatResult<EntryHandle> {
        path::resolve(&self.entries, &self.bcache, &self.bpb, proc, path)
    }

    pub fn create(&self, proc: &dyn Process, path: &[u8], is_dir: bool) -> FatResult<EntryHandle> {
        let (parent, name, len) = path::resolve_parent(&self.entries, &self.bcache, &self.bpb, proc, path)?;
        let result = self.entries.ealloc(&self.bcache, &self.bpb, &parent, &name[..len], is_dir);
        self.entries.put(&self.bcache, &self.bpb, parent);
        result
    }

    pub fn remove(&self, proc: &dyn Process, path: &[u8]) -> FatResult<()> {
        let (parent, name, len) = path::resolve_parent(&self.entries, &self.bcache, &self.bpb, proc, path)?;
        let result = self.entries.eremove(&self.bcache, &self.bpb, &parent, &name[..len]);
        self.entries.put(&self.bcache, &self.bpb, parent);
        result
    }

    /// Kernel-buffer convenience over `read_to`, for callers that already
    /// have the destination as a plain slice (directory management, tests).
    pub fn read(&self, e: &EntryHandle, off: u64, buf: &mut [u8]) -> usize {
        self.entries.eread_buf(&self.bcache, &self.bpb, e, off, buf)
    }

    /// Reads into `dst`, an address that is either user-space (`to_user`) or
    /// a second kernel pointer, moved across that boundary through `copier`.
    /// This is the shape a syscall dispatcher actually calls: it owns the
    /// `UserCopy` implementation and knows whether the destination came from
    /// user or kernel space.
    pub fn read_to(&self, e: &EntryHandle, copier: &dyn UserCopy, to_user: bool, dst: usize, off: u64, n: usize) -> usize {
        self.entries.eread(&self.bcache, &self.bpb, e, copier, to_user, dst, off, n)
    }

    /// Kernel-buffer convenience over `write_from`. See `read`.
    pub fn write(&self, e: &EntryHandle, off: u64, buf: &[u8]) -> FatResult<usize> {
        self.entries.ewrite_buf(&self.bcache, &self.bpb, e, off, buf)
    }

    /// Writes from `src`, an address that is either user-space (`to_user`)
    /// or a second kernel pointer. See `read_to`.
    pub fn write_from(&self, e: &EntryHandle, copier: &dyn UserCopy, to_user: bool, src: usize, off: u64, n: usize) -> FatResult<usize> {
        self.entries.ewrite(&self.bcache, &self.bpb, e, copier, to_user, src, off, n)
    }

    pub fn truncate(&self, e: &EntryHandle) {
        self.entries.etrunc(&self.bcache, &self.bpb, e);
    }

    pub fn update(&self, e: &EntryHandle) {
        self.entries.eupdate(&self.bcache, &self.bpb, e);
    }

    pub fn stat(&self, e: &EntryHandle) -> Stat {
        self.entries.stat(e)
    }

    pub fn is_dir(&self, e: &EntryHandle) -> bool {
        self.entries.is_dir(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RootCwd;
    impl Process for RootCwd {
        fn cwd(&self) -> EntryHandle {
            unreachable!("tests below only resolve absolute paths")
        }
    }

    #[test]
    fn init_reads_volume_info_from_hand_built_boot_sector() {
        let (device, _bpb) = test_support::fresh_device(4);
        let fs = Filesystem::init(device).unwrap();
        let info = fs.volume_info();
        assert_eq!(info.sectors_per_cluster, 4);
        assert_eq!(info.bytes_per_sector, BSIZE as u16);
    }

    #[test]
    fn create_write_reopen_round_trip() {
        let (device, _bpb) = test_support::fresh_device(2);
        let fs = Filesystem::init(device).unwrap();
        let proc = RootCwd;

        let file = fs.create(&proc, b"/greeting.txt", false).unwrap();
        fs.write(&file, 0, b"hello, fernfs").unwrap();
        fs.close(file);

        let reopened = fs.open(&proc, b"/greeting.txt").unwrap();
        let mut buf = [0u8; 13];
        fs.read(&reopened, 0, &mut buf);
        assert_eq!(&buf, b"hello, fernfs");
        fs.close(reopened);
    }

    #[test]
    fn remove_makes_path_unresolvable() {
        let (device, _bpb) = test_support::fresh_device(2);
        let fs = Filesystem::init(device).unwrap();
        let proc = RootCwd;

        let file = fs.create(&proc, b"/temp.bin", false).unwrap();
        fs.close(file);
        fs.remove(&proc, b"/temp.bin").unwrap();
        assert!(fs.open(&proc, b"/temp.bin").is_err());
    }
}
