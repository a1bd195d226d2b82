//! Path resolution: walks a `/`-separated path one component at a time,
//! starting from the root or from the caller's current directory, taking
//! and releasing one entry-cache reference per level as it goes.

use fernfs_bcache::Bcache;
use fernfs_driver_traits::BlockDevice;
use fernfs_vfs::{FatError, FatResult};

use crate::bpb::Bpb;
use crate::dir::FAT32_MAX_FILENAME;
use crate::entry::{EntryCache, EntryHandle};

/// What a caller's open-file table exposes to path resolution: just its
/// current directory. Kept separate from `EntryCache` itself so this crate
/// never has to know what a process or a file descriptor table looks like.
pub trait Process {
    fn cwd(&self) -> EntryHandle;
}

struct PathIter<'a> {
    rest: &'a [u8],
}

impl<'a> PathIter<'a> {
    fn new(path: &'a [u8]) -> Self {
        PathIter { rest: path }
    }
}

impl<'a> Iterator for PathIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        while self.rest.first() == Some(&b'/') {
            self.rest = &self.rest[1..];
        }
        if self.rest.is_empty() {
            return None;
        }
        let end = self.rest.iter().position(|&b| b == b'/').unwrap_or(self.rest.len());
        let (seg, remainder) = self.rest.split_at(end);
        self.rest = remainder;
        Some(seg)
    }
}

fn truncate_segment(seg: &[u8]) -> &[u8] {
    if seg.len() > FAT32_MAX_FILENAME {
        &seg[..FAT32_MAX_FILENAME]
    } else {
        seg
    }
}

fn start_dir(cache: &EntryCache, proc: &dyn Process, path: &[u8]) -> EntryHandle {
    if path.first() == Some(&b'/') {
        cache.root()
    } else {
        proc.cwd()
    }
}

/// Resolves `path` to the entry it names. An empty path (or one that
/// resolves to the starting directory itself, e.g. `"/"` or `"."`) returns
/// that directory.
pub fn resolve<D: BlockDevice>(cache: &EntryCache, bcache: &Bcache<D>, bpb: &Bpb, proc: &dyn Process, path: &[u8]) -> FatResult<EntryHandle> {
    let mut cur = start_dir(cache, proc, path);
    for seg in PathIter::new(path) {
        let seg = truncate_segment(seg);
        if !cache.is_dir(&cur) {
            cache.put(bcache, bpb, cur);
            return Err(FatError::NotADirectory);
        }
        match cache.dirlookup(bcache, bpb, &cur, seg) {
            Ok(next) => {
                cache.put(bcache, bpb, cur);
                cur = next;
            }
            Err(e) => {
                cache.put(bcache, bpb, cur);
                return Err(e);
            }
        }
    }
    Ok(cur)
}

/// Resolves all but the last component of `path`, returning the parent
/// directory plus the final component (truncated to `FAT32_MAX_FILENAME`
/// bytes), for callers that need to create or remove that name themselves
/// (`ealloc`, `eremove`). Fails if `path` has no final component (empty, or
/// just `/`).
pub fn resolve_parent<D: BlockDevice>(
    cache: &EntryCache,
    bcache: &Bcache<D>,
    bpb: &Bpb,
    proc: &dyn Process,
    path: &[u8],
) -> FatResult<(EntryHandle, [u8; FAT32_MAX_FILENAME], usize)> {
    let mut cur = start_dir(cache, proc, path);
    let mut segs = PathIter::new(path).peekable();
    let mut last: Option<&[u8]> = None;

    loop {
        let seg = match segs.next() {
            Some(s) => s,
            None => break,
        };
        if segs.peek().is_none() {
            last = Some(seg);
            break;
        }
        let seg = truncate_segment(seg);
        if !cache.is_dir(&cur) {
            cache.put(bcache, bpb, cur);
            return Err(FatError::NotADirectory);
        }
        match cache.dirlookup(bcache, bpb, &cur, seg) {
            Ok(next) => {
                cache.put(bcache, bpb, cur);
                cur = next;
            }
            Err(e) => {
                cache.put(bcache, bpb, cur);
                return Err(e);
            }
        }
    }

    let name = match last {
        Some(n) => truncate_segment(n),
        None => {
            cache.put(bcache, bpb, cur);
            return Err(FatError::InvalidName);
        }
    };
    let mut buf = [0u8; FAT32_MAX_FILENAME];
    buf[..name.len()].copy_from_slice(name);
    Ok((cur, buf, name.len()))
}
