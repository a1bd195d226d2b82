//! Top-level facade over the fernfs storage stack: a buffer cache
//! (`fernfs_bcache`), a FAT32 filesystem engine built on it (`fernfs_fat`),
//! and their shared error/stat vocabulary (`fernfs_vfs`).
//!
//! Pulling these three crates together under one name is purely an
//! ergonomics layer for embedders and for this crate's own integration
//! tests; none of the three need this crate to depend on each other.
#![cfg_attr(not(feature = "std"), no_std)]

pub use fernfs_bcache::{Bcache, BufGuard, BufPin, BSIZE, NBUF};
pub use fernfs_driver_traits::{BlockDevice, BlockGeometry, CopyFault, DriverError, KernelOnlyCopy, Logger, PanicHook, UserCopy};
pub use fernfs_fat::{resolve, resolve_parent, Bpb, EntryCache, EntryHandle, Filesystem, Process, FAT32_MAX_FILENAME};
pub use fernfs_vfs::{FatError, FatResult, FileKind, Stat, VolumeInfo};
