//! Fixed-pool sector buffer cache.
//!
//! A classic block-I/O cache: at most one cached copy per `(dev, sector)`,
//! least-recently-used unreferenced buffer evicted first, a spin-lock over
//! the bookkeeping (device id, sector number, validity, refcount, LRU links)
//! and a per-buffer sleep-lock held across the device I/O that fills or
//! flushes a buffer's payload.
//!
//! Unlike the classic C implementation this cache is not a raw pointer
//! linked list: buffers live in a fixed array and the LRU list is threaded
//! through array indices, so there is no `unsafe` global mutable state.
#![cfg_attr(not(feature = "std"), no_std)]

use core::array;
use core::ops::{Deref, DerefMut};

use spin::Mutex;

use fernfs_driver_traits::{fatal, BlockDevice, CorePanicHook, Logger, NullLogger, PanicHook, SleepLock, trace};

/// Sector size this cache is built for. A real embedder validates its BPB's
/// `bytes_per_sector` against this at filesystem init; a mismatch is fatal.
pub const BSIZE: usize = 512;

/// Number of buffers in the pool. Fixed at compile time: the pool is a plain
/// array, not a `Vec`, so this crate never needs an allocator.
pub const NBUF: usize = 30;

const SENTINEL: usize = NBUF;

#[derive(Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
}

#[derive(Clone, Copy)]
struct Meta {
    dev: u32,
    sector: u64,
    valid: bool,
    refcnt: u32,
}

impl Meta {
    const fn empty() -> Self {
        Meta { dev: 0, sector: 0, valid: false, refcnt: 0 }
    }
}

struct Inner {
    meta: [Meta; NBUF],
    links: [Link; NBUF + 1],
}

impl Inner {
    fn new() -> Self {
        let mut links = [Link { prev: 0, next: 0 }; NBUF + 1];
        // Circular list: sentinel -> 0 -> 1 -> ... -> NBUF-1 -> sentinel.
        links[SENTINEL] = Link { prev: NBUF - 1, next: 0 };
        for i in 0..NBUF {
            links[i] = Link {
                prev: if i == 0 { SENTINEL } else { i - 1 },
                next: if i == NBUF - 1 { SENTINEL } else { i + 1 },
            };
        }
        Inner { meta: [Meta::empty(); NBUF], links }
    }

    fn unlink(&mut self, idx: usize) {
        let Link { prev, next } = self.links[idx];
        self.links[prev].next = next;
        self.links[next].prev = prev;
    }

    fn push_mru(&mut self, idx: usize) {
        let head_next = self.links[SENTINEL].next;
        self.links[idx] = Link { prev: SENTINEL, next: head_next };
        self.links[head_next].prev = idx;
        self.links[SENTINEL].next = idx;
    }

    fn release(&mut self, idx: usize) {
        self.meta[idx].refcnt -= 1;
        if self.meta[idx].refcnt == 0 {
            self.unlink(idx);
            self.push_mru(idx);
        }
    }
}

/// The buffer cache. Generic over the block device it reads through; owns
/// that device exclusively (a single-volume, device-0 assumption — there
/// is no fan-out to multiple physical devices here even though the cache
/// key below still carries a `dev` field for fidelity to the on-disk
/// model).
pub struct Bcache<D: BlockDevice> {
    device: Mutex<D>,
    inner: Mutex<Inner>,
    payload: [SleepLock<[u8; BSIZE]>; NBUF],
    logger: &'static dyn Logger,
    panic_hook: &'static dyn PanicHook,
}

impl<D: BlockDevice> Bcache<D> {
    pub fn new(device: D) -> Self {
        Self::with_hooks(device, &NullLogger, &CorePanicHook)
    }

    pub fn with_hooks(device: D, logger: &'static dyn Logger, panic_hook: &'static dyn PanicHook) -> Self {
        Bcache {
            device: Mutex::new(device),
            inner: Mutex::new(Inner::new()),
            payload: array::from_fn(|_| SleepLock::new([0u8; BSIZE])),
            logger,
            panic_hook,
        }
    }

    /// Look through the cache for `(dev, sector)`. Allocates an unreferenced
    /// buffer on a miss. Returns the index with `refcnt` already bumped;
    /// caller still needs to acquire the payload sleep-lock.
    fn bget(&self, dev: u32, sector: u64) -> usize {
        let mut inner = self.inner.lock();

        let mut idx = inner.links[SENTINEL].next;
        while idx != SENTINEL {
            if inner.meta[idx].dev == dev && inner.meta[idx].sector == sector {
                inner.meta[idx].refcnt += 1;
                trace!(self.logger, "bget: hit dev={dev} sector={sector} idx={idx}");
                return idx;
            }
            idx = inner.links[idx].next;
        }

        let mut idx = inner.links[SENTINEL].prev;
        while idx != SENTINEL {
            if inner.meta[idx].refcnt == 0 {
                inner.meta[idx] = Meta { dev, sector, valid: false, refcnt: 1 };
                trace!(self.logger, "bget: miss dev={dev} sector={sector} idx={idx}");
                return idx;
            }
            idx = inner.links[idx].prev;
        }

        fatal!(self.panic_hook, "bget: no buffers")
    }

    /// Returns a sleep-locked buffer whose payload reflects the on-disk
    /// sector, reading through the device on a cache miss.
    pub fn bread(&self, dev: u32, sector: u64) -> BufGuard<'_, D> {
        let idx = self.bget(dev, sector);
        let mut data = self.payload[idx].lock();

        let needs_read = !self.inner.lock().meta[idx].valid;
        if needs_read {
            if self.device.lock().read_sectors(sector, &mut data[..]).is_err() {
                fatal!(self.panic_hook, "bread: device read failed");
            }
            self.inner.lock().meta[idx].valid = true;
        }

        BufGuard { cache: self, idx, dev, sector, data: Some(data) }
    }

    fn bwrite(&self, idx: usize, sector: u64, data: &[u8; BSIZE]) {
        if !self.payload[idx].is_locked() {
            fatal!(self.panic_hook, "bwrite: buffer not locked");
        }
        if self.device.lock().write_sectors(sector, &data[..]).is_err() {
            fatal!(self.panic_hook, "bwrite: device write failed");
        }
    }
}

/// A sleep-locked buffer. Dropping it performs `brelse`'s bookkeeping:
/// release the sleep-lock, decrement the refcount, and on the 0 transition
/// splice the slot onto the MRU end of the LRU list.
pub struct BufGuard<'a, D: BlockDevice> {
    cache: &'a Bcache<D>,
    idx: usize,
    dev: u32,
    sector: u64,
    data: Option<fernfs_driver_traits::SleepLockGuard<'a, [u8; BSIZE]>>,
}

impl<'a, D: BlockDevice> BufGuard<'a, D> {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn sector(&self) -> u64 {
        self.sector
    }

    /// Synchronously writes the buffer's payload to the device. Caller must
    /// hold the sleep-lock, which a live `BufGuard` always does.
    pub fn write(&self) {
        self.cache.bwrite(self.idx, self.sector, self.data.as_ref().unwrap());
    }

    /// Converts this sleep-locked reference into a long-term pin: the
    /// sleep-lock is released but the refcount stays bumped so the slot
    /// can't be recycled. Mirrors `bpin`; callers serialize access to a
    /// pinned buffer by some other means (typically a higher-level
    /// sleep-lock of their own).
    pub fn pin(mut self) -> BufPin<'a, D> {
        {
            let mut inner = self.cache.inner.lock();
            inner.meta[self.idx].refcnt += 1;
        }
        self.data.take();
        BufPin { cache: self.cache, idx: self.idx, dev: self.dev, sector: self.sector }
    }
}

impl<'a, D: BlockDevice> Deref for BufGuard<'a, D> {
    type Target = [u8; BSIZE];
    fn deref(&self) -> &Self::Target {
        self.data.as_ref().unwrap()
    }
}

impl<'a, D: BlockDevice> DerefMut for BufGuard<'a, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data.as_mut().unwrap()
    }
}

impl<'a, D: BlockDevice> Drop for BufGuard<'a, D> {
    fn drop(&mut self) {
        self.data.take();
        self.cache.inner.lock().release(self.idx);
    }
}

/// A long-term buffer reference held without the sleep-lock. See
/// `BufGuard::pin`. Dropping performs `bunpin`.
pub struct BufPin<'a, D: BlockDevice> {
    cache: &'a Bcache<D>,
    idx: usize,
    dev: u32,
    sector: u64,
}

impl<'a, D: BlockDevice> BufPin<'a, D> {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn sector(&self) -> u64 {
        self.sector
    }

    /// Re-acquires the sleep-lock to get back to a normal `BufGuard`,
    /// without touching the refcount this pin already holds (so dropping
    /// the resulting guard releases the increment `pin` added).
    pub fn reacquire(self) -> BufGuard<'a, D> {
        let data = self.cache.payload[self.idx].lock();
        BufGuard { cache: self.cache, idx: self.idx, dev: self.dev, sector: self.sector, data: Some(data) }
    }
}

impl<'a, D: BlockDevice> Drop for BufPin<'a, D> {
    fn drop(&mut self) {
        self.cache.inner.lock().release(self.idx);
    }
}

#[cfg(test)]
extern crate alloc;
