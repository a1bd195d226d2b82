//! Error and stat vocabulary shared across the fernfs storage crates.
//!
//! Kept deliberately small and allocation-free: this is the handful of types
//! that cross the boundary between `fernfs-fat` and whatever embeds it,
//! modeled on `watos-vfs::VfsError`'s shape but restricted to the variants
//! this engine's error table (recoverable conditions only — invariant
//! violations are fatal panics, not values of this type).
#![cfg_attr(not(feature = "std"), no_std)]

pub type FatResult<T> = Result<T, FatError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatError {
    NotFound,
    NotADirectory,
    IsADirectory,
    InvalidName,
    ReadOnly,
    /// Allocation exhaustion is fatal, not recoverable; kept as its own
    /// variant for forward compatibility even though nothing downstream
    /// retries on it today.
    NoSpace,
    Overflow,
}

impl FatError {
    pub fn to_errno(self) -> i32 {
        match self {
            FatError::NotFound => -2,        // ENOENT
            FatError::NotADirectory => -20,  // ENOTDIR
            FatError::IsADirectory => -21,   // EISDIR
            FatError::InvalidName => -22,    // EINVAL
            FatError::ReadOnly => -30,       // EROFS
            FatError::NoSpace => -28,        // ENOSPC
            FatError::Overflow => -75,       // EOVERFLOW
        }
    }
}

/// Upper bound on a projected filename in `Stat`. Matches
/// `fernfs_fat::FAT32_MAX_FILENAME`; duplicated here as a plain constant so
/// this crate doesn't need to depend on `fernfs-fat` for one number.
pub const STAT_MAX_NAME: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
}

/// A point-in-time snapshot of an entry's externally visible attributes.
#[derive(Clone, Copy)]
pub struct Stat {
    pub name: [u8; STAT_MAX_NAME],
    pub name_len: usize,
    pub kind: FileKind,
    pub dev: u32,
    pub size: u64,
}

impl Stat {
    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len]
    }
}

/// Read-only volume-wide figures, in the same vein as a `statfs` result,
/// reduced to the fields this engine can answer without a free-cluster
/// bitmap (free-space accounting is out of scope).
#[derive(Debug, Clone, Copy)]
pub struct VolumeInfo {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub data_cluster_count: u32,
}
