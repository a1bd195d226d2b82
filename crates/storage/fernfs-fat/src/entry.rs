//! The directory-entry cache: a fixed arena of `Dirent`-equivalents backed
//! by the buffer cache, plus the operations that create, look up, read,
//! write, truncate, and remove them.
//!
//! Bookkeeping (reference counts, LRU order, which arena slot backs which
//! on-disk record) lives behind a spin lock, mirroring `fernfs_bcache`'s
//! `Inner`/`Meta` split. Each slot's actual content — name, size, cluster
//! cursor — lives behind its own sleep lock, acquired only after the
//! bookkeeping lock is dropped.

use fernfs_bcache::Bcache;
use fernfs_driver_traits::{fatal, trace, BlockDevice, KernelOnlyCopy, Logger, NullLogger, PanicHook, CorePanicHook, SleepLock, UserCopy};
use fernfs_vfs::{FatError, FatResult, FileKind, Stat, FileKind::*, STAT_MAX_NAME};
use spin::Mutex;

use crate::bpb::Bpb;
use crate::cluster::{alloc_clus, first_sec_of_clus, free_clus, reloc_clus};
use crate::dir::{
    self, decode_name, encode_name, formatname, generate_shortname, is_long_entry,
    ShortEntry, EMPTY_ENTRY, END_OF_ENTRY, FAT32_MAX_FILENAME, MAX_NAME_RECORDS,
};
use crate::table::{read_fat, FAT32_EOC};

/// Chunk size the user-copy-aware `eread`/`ewrite` stage file content
/// through on their way between the buffer cache and a caller's
/// destination/source address. One sector, matching the cache's own unit of
/// I/O so a chunk never spans more device reads than `content_read_at`
/// would already need.
const COPY_CHUNK: usize = fernfs_bcache::BSIZE;

/// Arena capacity. Sized for a handful of simultaneously open files and
/// directories, not for caching an entire filesystem tree.
pub const ENTRY_CACHE_NUM: usize = 64;
/// The root directory's arena slot. Statically valid from `init_root`
/// onward and never recycled.
pub const ROOT_SLOT: u32 = 0;
const NONE: u32 = u32::MAX;
const SENTINEL: usize = ENTRY_CACHE_NUM;
/// Bytes occupied by the synthetic `.`/`..` records `write_dot_entries`
/// seeds at the start of every new directory's first cluster.
const DOT_ENTRIES_SIZE: u32 = 64;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    /// Claimed but not yet populated from the directory record it names.
    Uninit,
    Live,
    Removed,
}

struct Meta {
    state: State,
    dev: u32,
    /// Arena index of the directory this entry's short-name record lives
    /// in. `NONE` for the root.
    parent: u32,
    /// Byte offset of this entry's short-name record within the parent's
    /// data.
    parent_off: u32,
    /// Mirrors `Content::name`/`name_len` so a cache-hit scan can match on
    /// (parent, name) without taking a per-entry content lock.
    name: [u8; FAT32_MAX_FILENAME],
    name_len: u8,
    refcnt: u32,
}

struct Link {
    prev: u32,
    next: u32,
}

/// All non-root slots live permanently in one doubly-linked ring, ordered
/// MRU (just released) to LRU (longest since last release). A slot with
/// `refcnt == 0` is a release candidate for both a name-matched cache hit
/// and, failing that, reclamation for an unrelated name — it is never
/// actually evicted until something claims it, mirroring `fernfs_bcache`'s
/// buffers: released is not the same as gone.
struct Inner {
    meta: [Meta; ENTRY_CACHE_NUM],
    links: [Link; ENTRY_CACHE_NUM + 1],
}

impl Inner {
    fn new() -> Self {
        let meta = core::array::from_fn(|_| Meta {
            state: State::Uninit,
            dev: 0,
            parent: NONE,
            parent_off: 0,
            name: [0; FAT32_MAX_FILENAME],
            name_len: 0,
            refcnt: 0,
        });
        let mut links: [Link; ENTRY_CACHE_NUM + 1] = core::array::from_fn(|_| Link { prev: NONE, next: NONE });
        links[SENTINEL] = Link { prev: SENTINEL as u32, next: SENTINEL as u32 };
        let mut inner = Inner { meta, links };
        for idx in 1..ENTRY_CACHE_NUM as u32 {
            inner.link_at_head(idx);
        }
        inner
    }

    fn unlink(&mut self, idx: u32) {
        let prev = self.links[idx as usize].prev;
        let next = self.links[idx as usize].next;
        self.links[prev as usize].next = next;
        self.links[next as usize].prev = prev;
    }

    fn link_at_head(&mut self, idx: u32) {
        let head = self.links[SENTINEL].next;
        self.links[idx as usize] = Link { prev: SENTINEL as u32, next: head };
        self.links[head as usize].prev = idx;
        self.links[SENTINEL].next = idx;
    }

    /// Moves a just-released (`refcnt == 0`) slot to the head of the list,
    /// matching `fernfs_bcache`'s `brelse` convention: the most recently
    /// released entry is the last one reclaimed for something else.
    fn move_to_head(&mut self, idx: u32) {
        self.unlink(idx);
        self.link_at_head(idx);
    }

    /// Finds a slot with `refcnt == 0`, scanning from the tail (longest
    /// since release first).
    fn reclaim(&self, panic_hook: &dyn PanicHook) -> u32 {
        let mut idx = self.links[SENTINEL].prev;
        while idx as usize != SENTINEL {
            if self.meta[idx as usize].refcnt == 0 {
                return idx;
            }
            idx = self.links[idx as usize].prev;
        }
        fatal!(panic_hook, "entry cache exhausted")
    }
}

struct Content {
    loaded: bool,
    attr: u8,
    name: [u8; FAT32_MAX_FILENAME],
    name_len: u8,
    first_clus: u32,
    cur_clus: u32,
    clus_cnt: u32,
    file_size: u32,
    dirty: bool,
}

impl Content {
    const fn empty() -> Self {
        Content {
            loaded: false,
            attr: 0,
            name: [0; FAT32_MAX_FILENAME],
            name_len: 0,
            first_clus: 0,
            cur_clus: 0,
            clus_cnt: 0,
            file_size: 0,
            dirty: false,
        }
    }
}

/// A live handle into the entry cache. Obtained from `root`, `dirlookup`,
/// `ealloc`, or `dup`; must be released with `put`.
pub struct EntryHandle(u32);

struct FoundEntry {
    sne_off: u64,
    lne_count: usize,
    short: ShortEntry,
    name: [u8; FAT32_MAX_FILENAME],
    name_len: usize,
}

pub struct EntryCache {
    inner: Mutex<Inner>,
    content: [SleepLock<Content>; ENTRY_CACHE_NUM],
    logger: &'static dyn Logger,
    panic_hook: &'static dyn PanicHook,
}

impl EntryCache {
    pub fn new() -> Self {
        Self::with_hooks(&NullLogger, &CorePanicHook)
    }

    pub fn with_hooks(logger: &'static dyn Logger, panic_hook: &'static dyn PanicHook) -> Self {
        EntryCache {
            inner: Mutex::new(Inner::new()),
            content: core::array::from_fn(|_| SleepLock::new(Content::empty())),
            logger,
            panic_hook,
        }
    }

    /// Must be called exactly once, before any lookup, to seed slot 0 as the
    /// root directory.
    pub fn init_root(&self, dev: u32, first_clus: u32) {
        let mut inner = self.inner.lock();
        inner.meta[ROOT_SLOT as usize] =
            Meta { state: State::Live, dev, parent: NONE, parent_off: 0, name: [0; FAT32_MAX_FILENAME], name_len: 0, refcnt: 1 };
        drop(inner);

        let mut content = self.content[ROOT_SLOT as usize].lock();
        *content = Content { loaded: true, attr: dir::attrs::DIRECTORY, first_clus, cur_clus: first_clus, ..Content::empty() };
    }

    pub fn root(&self) -> EntryHandle {
        self.bump_refcnt(ROOT_SLOT);
        EntryHandle(ROOT_SLOT)
    }

    pub fn dup(&self, e: &EntryHandle) -> EntryHandle {
        self.bump_refcnt(e.0);
        EntryHandle(e.0)
    }

    fn bump_refcnt(&self, idx: u32) {
        self.inner.lock().meta[idx as usize].refcnt += 1;
    }

    /// Releases `e`. When its reference count reaches zero, flushes any
    /// pending content update, recycles the arena slot, and — if the entry
    /// was marked removed — frees its cluster chain. Releasing the last
    /// reference to a child also releases the structural hold it kept on
    /// its parent, cascading upward.
    pub fn put<D: BlockDevice>(&self, bcache: &Bcache<D>, bpb: &Bpb, e: EntryHandle) {
        let mut idx = e.0;
        core::mem::forget(e);
        loop {
            {
                let mut content = self.content[idx as usize].lock();
                if content.dirty {
                    self.flush_content(bcache, bpb, idx, &mut content);
                }
            }

            let mut inner = self.inner.lock();
            inner.meta[idx as usize].refcnt -= 1;
            if inner.meta[idx as usize].refcnt != 0 || idx == ROOT_SLOT {
                return;
            }
            inner.move_to_head(idx);
            let state = inner.meta[idx as usize].state;
            let parent = inner.meta[idx as usize].parent;
            drop(inner);

            if state == State::Removed {
                let mut content = self.content[idx as usize].lock();
                content_truncate(bcache, bpb, &mut content, self.panic_hook);
                content.loaded = false;
            }

            if parent == NONE {
                return;
            }
            idx = parent;
        }
    }

    fn flush_content<D: BlockDevice>(&self, bcache: &Bcache<D>, bpb: &Bpb, idx: u32, content: &mut Content) {
        let parent = self.inner.lock().meta[idx as usize].parent;
        let parent_off = self.inner.lock().meta[idx as usize].parent_off;
        if parent == NONE {
            content.dirty = false;
            return;
        }
        let mut raw = [0u8; 32];
        let mut parent_content = self.content[parent as usize].lock();
        content_read_dir_at(bcache, bpb, &mut parent_content, parent_off as u64, &mut raw, self.panic_hook);
        raw[11] = content.attr;
        raw[20..22].copy_from_slice(&((content.first_clus >> 16) as u16).to_le_bytes());
        raw[26..28].copy_from_slice(&(content.first_clus as u16).to_le_bytes());
        raw[28..32].copy_from_slice(&content.file_size.to_le_bytes());
        content_write_at(bcache, bpb, &mut parent_content, parent_off as u64, &raw, self.panic_hook);
        content.dirty = false;
    }

    /// Explicit flush, for callers that want the on-disk record current
    /// without releasing the handle.
    pub fn eupdate<D: BlockDevice>(&self, bcache: &Bcache<D>, bpb: &Bpb, e: &EntryHandle) {
        let mut content = self.content[e.0 as usize].lock();
        if content.dirty {
            self.flush_content(bcache, bpb, e.0, &mut content);
        }
    }

    /// Resolves `name` within `dir`. Handles `.` and `..` without touching
    /// the disk. Everything else first tries a cache hit by (parent, name)
    /// across every arena slot regardless of current refcount — a closed
    /// file whose dirent is still parked in the cache is found here without
    /// any disk I/O — and only falls back to a directory scan on a miss.
    pub fn dirlookup<D: BlockDevice>(&self, bcache: &Bcache<D>, bpb: &Bpb, dir: &EntryHandle, name: &[u8]) -> FatResult<EntryHandle> {
        if name == b"." {
            return Ok(self.dup(dir));
        }
        if name == b".." {
            let parent = self.inner.lock().meta[dir.0 as usize].parent;
            return Ok(if parent == NONE { self.dup(dir) } else { self.dup_idx(parent) });
        }

        let dir_attr = self.content[dir.0 as usize].lock().attr;
        if dir_attr & dir::attrs::DIRECTORY == 0 {
            return Err(FatError::NotADirectory);
        }

        if let Some(idx) = self.cache_hit(dir.0, name) {
            return Ok(EntryHandle(idx));
        }

        let mut dir_content = self.content[dir.0 as usize].lock();
        let found = dir_scan_find(bcache, bpb, &mut dir_content, name, self.panic_hook).ok_or(FatError::NotFound)?;
        drop(dir_content);
        Ok(self.eget(dir.0, &found))
    }

    fn dup_idx(&self, idx: u32) -> EntryHandle {
        self.bump_refcnt(idx);
        EntryHandle(idx)
    }

    /// Scans every arena slot for a `Live` entry matching (parent, name),
    /// bumping its refcount on a hit. A 0→1 refcount transition also bumps
    /// the parent's refcount, mirroring the structural hold `ealloc`/`eget`
    /// establish on first creation — released back down by `put` the next
    /// time this entry's own refcount returns to zero.
    fn cache_hit(&self, parent: u32, name: &[u8]) -> Option<u32> {
        let mut inner = self.inner.lock();
        let mut idx = inner.links[SENTINEL].next;
        while idx as usize != SENTINEL {
            let hit = {
                let m = &inner.meta[idx as usize];
                m.state == State::Live && m.parent == parent && names_eq(&m.name[..m.name_len as usize], name)
            };
            if hit {
                let was_zero = inner.meta[idx as usize].refcnt == 0;
                inner.meta[idx as usize].refcnt += 1;
                if was_zero {
                    inner.meta[parent as usize].refcnt += 1;
                }
                return Some(idx);
            }
            idx = inner.links[idx as usize].next;
        }
        None
    }

    /// Finds or creates the cache entry for a directory record just located
    /// at `found.sne_off`. Tries the same name-keyed hit as `dirlookup`
    /// first (covers `ealloc`'s post-write lookup); on a miss, reclaims a
    /// `refcnt == 0` slot and loads it from `found`.
    fn eget(&self, parent: u32, found: &FoundEntry) -> EntryHandle {
        if let Some(idx) = self.cache_hit(parent, &found.name[..found.name_len]) {
            return EntryHandle(idx);
        }

        let mut inner = self.inner.lock();
        let idx = inner.reclaim(self.panic_hook);
        trace!(self.logger, "eget: reclaiming slot {idx} for parent={parent}");
        let mut name = [0u8; FAT32_MAX_FILENAME];
        name[..found.name_len].copy_from_slice(&found.name[..found.name_len]);
        inner.meta[idx as usize] =
            Meta { state: State::Uninit, dev: 0, parent, parent_off: found.sne_off as u32, name, name_len: found.name_len as u8, refcnt: 1 };
        inner.meta[parent as usize].refcnt += 1;
        drop(inner);

        let mut content = self.content[idx as usize].lock();
        content.loaded = true;
        content.attr = found.short.attr;
        content.name = [0; FAT32_MAX_FILENAME];
        content.name[..found.name_len].copy_from_slice(&found.name[..found.name_len]);
        content.name_len = found.name_len as u8;
        content.first_clus = found.short.first_cluster();
        content.cur_clus = found.short.first_cluster();
        content.clus_cnt = 0;
        content.file_size = found.short.file_size;
        content.dirty = false;
        drop(content);

        self.inner.lock().meta[idx as usize].state = State::Live;
        EntryHandle(idx)
    }

    /// Creates `name` inside `dir`, writing its directory record(s) and, for
    /// a new directory, seeding `.`/`..`. Idempotent: if `name` already
    /// exists, that existing dirent is returned rather than an error.
    pub fn ealloc<D: BlockDevice>(&self, bcache: &Bcache<D>, bpb: &Bpb, dir: &EntryHandle, name_raw: &[u8], is_dir: bool) -> FatResult<EntryHandle> {
        let (name_buf, name_len) = formatname(name_raw).map_err(|_| FatError::InvalidName)?;
        let name = &name_buf[..name_len];

        let mut dir_content = self.content[dir.0 as usize].lock();
        if dir_content.attr & dir::attrs::DIRECTORY == 0 {
            return Err(FatError::NotADirectory);
        }
        if let Some(found) = dir_scan_find(bcache, bpb, &mut dir_content, name, self.panic_hook) {
            drop(dir_content);
            return Ok(self.eget(dir.0, &found));
        }
        let parent_first_clus = dir_content.first_clus;

        let attr = if is_dir { dir::attrs::DIRECTORY } else { dir::attrs::ARCHIVE };
        let first_clus = if is_dir { alloc_clus(bcache, 0, bpb, self.panic_hook) } else { 0 };
        // For a new directory, `.`/`..` must exist on disk before this
        // entry's own content is ever loaded from the cache: eget seeds the
        // new slot's in-memory `file_size` straight from this SNE, and that
        // becomes the high-water mark `dir_find_free_run` trusts the next
        // time something is created inside it. Writing the dot entries first
        // and recording their 64 bytes here means the first real child added
        // (even before any close/reopen) lands after them instead of
        // clobbering them.
        if is_dir {
            write_dot_entries(bcache, bpb, first_clus, parent_first_clus, self.panic_hook);
        }
        let short = ShortEntry {
            name: generate_shortname(name),
            attr,
            first_clus_hi: (first_clus >> 16) as u16,
            first_clus_lo: first_clus as u16,
            file_size: if is_dir { DOT_ENTRIES_SIZE } else { 0 },
        };
        let sne_off = dir_append(bcache, bpb, &mut dir_content, name, short, self.panic_hook);
        drop(dir_content);
        trace!(self.logger, "ealloc: created {:?} at parent_off={sne_off}", core::str::from_utf8(name));

        let mut found_name = [0u8; FAT32_MAX_FILENAME];
        found_name[..name_len].copy_from_slice(name);
        let found = FoundEntry { sne_off, lne_count: 0, short, name: found_name, name_len };
        Ok(self.eget(dir.0, &found))
    }

    /// Unlinks `name` from `dir` on disk immediately, then tombstones the
    /// entry's own cache slot and immediately `put`s it. Routing through
    /// `eget`/`put` here (rather than poking the arena directly) guarantees
    /// the tombstoned entry has at least the reference this call itself
    /// just took, so the final release — here if nothing else has it open,
    /// later if something does — always happens through `put`'s cascade and
    /// always frees the cluster chain exactly once.
    pub fn eremove<D: BlockDevice>(&self, bcache: &Bcache<D>, bpb: &Bpb, dir: &EntryHandle, name: &[u8]) -> FatResult<()> {
        let mut dir_content = self.content[dir.0 as usize].lock();
        if dir_content.attr & dir::attrs::DIRECTORY == 0 {
            return Err(FatError::NotADirectory);
        }
        let found = dir_scan_find(bcache, bpb, &mut dir_content, name, self.panic_hook).ok_or(FatError::NotFound)?;
        erase_records(bcache, bpb, &mut dir_content, found.sne_off, found.lne_count, self.panic_hook);
        drop(dir_content);
        trace!(self.logger, "eremove: unlinked {:?}, cluster free deferred to last put", core::str::from_utf8(name));

        let handle = self.eget(dir.0, &found);
        self.inner.lock().meta[handle.0 as usize].state = State::Removed;
        self.put(bcache, bpb, handle);
        Ok(())
    }

    /// Reads up to `n` bytes starting at `off` into `dst`, an address that is
    /// either a user-space address (`to_user == true`) or a second kernel
    /// pointer, moved across that boundary through `copier` one sector-sized
    /// chunk at a time. Returns 0 for a directory entry. Stops and returns
    /// however many bytes were moved so far the moment `copier` reports a
    /// fault — no error value, matching the "I/O copy fault -> partial byte
    /// count" policy; a short read for any other reason (end of file) is
    /// reported the same way, since the caller can't tell the two apart from
    /// the count alone and doesn't need to.
    pub fn eread<D: BlockDevice>(
        &self,
        bcache: &Bcache<D>,
        bpb: &Bpb,
        e: &EntryHandle,
        copier: &dyn UserCopy,
        to_user: bool,
        dst: usize,
        off: u64,
        n: usize,
    ) -> usize {
        let mut content = self.content[e.0 as usize].lock();
        if content.attr & dir::attrs::DIRECTORY != 0 {
            return 0;
        }
        let mut scratch = [0u8; COPY_CHUNK];
        let mut done = 0usize;
        while done < n {
            let chunk = core::cmp::min(COPY_CHUNK, n - done);
            let got = content_read_at(bcache, bpb, &mut content, off + done as u64, &mut scratch[..chunk], self.panic_hook);
            if got == 0 {
                break;
            }
            if copier.copy(to_user, dst + done, &mut scratch[..got], true).is_err() {
                break;
            }
            done += got;
            if got < chunk {
                break;
            }
        }
        done
    }

    /// Writes up to `n` bytes from `src` (user or kernel, per `to_user`)
    /// starting at `off`. Rejects a read-only entry, an `off` past the
    /// current end of file, or a write that would push the file past the
    /// 32-bit size field's range, before touching any cluster. A copy fault
    /// partway through stops the write and returns the partial count, same
    /// as `eread`.
    pub fn ewrite<D: BlockDevice>(
        &self,
        bcache: &Bcache<D>,
        bpb: &Bpb,
        e: &EntryHandle,
        copier: &dyn UserCopy,
        to_user: bool,
        src: usize,
        off: u64,
        n: usize,
    ) -> FatResult<usize> {
        let mut content = self.content[e.0 as usize].lock();
        if content.attr & dir::attrs::READ_ONLY != 0 {
            return Err(FatError::ReadOnly);
        }
        let end = off.checked_add(n as u64).ok_or(FatError::Overflow)?;
        if off > content.file_size as u64 || end > u32::MAX as u64 {
            return Err(FatError::Overflow);
        }

        let mut scratch = [0u8; COPY_CHUNK];
        let mut done = 0usize;
        while done < n {
            let chunk = core::cmp::min(COPY_CHUNK, n - done);
            if copier.copy(to_user, src + done, &mut scratch[..chunk], false).is_err() {
                break;
            }
            let wrote = content_write_at(bcache, bpb, &mut content, off + done as u64, &scratch[..chunk], self.panic_hook);
            done += wrote;
            if wrote < chunk {
                break;
            }
        }
        Ok(done)
    }

    /// Kernel-buffer convenience over `eread`, for callers (directory
    /// management, tests) that are never moving bytes across a user/kernel
    /// boundary and just want a plain slice.
    pub fn eread_buf<D: BlockDevice>(&self, bcache: &Bcache<D>, bpb: &Bpb, e: &EntryHandle, off: u64, buf: &mut [u8]) -> usize {
        self.eread(bcache, bpb, e, &KernelOnlyCopy, false, buf.as_mut_ptr() as usize, off, buf.len())
    }

    /// Kernel-buffer convenience over `ewrite`. See `eread_buf`.
    pub fn ewrite_buf<D: BlockDevice>(&self, bcache: &Bcache<D>, bpb: &Bpb, e: &EntryHandle, off: u64, buf: &[u8]) -> FatResult<usize> {
        self.ewrite(bcache, bpb, e, &KernelOnlyCopy, false, buf.as_ptr() as usize, off, buf.len())
    }

    pub fn etrunc<D: BlockDevice>(&self, bcache: &Bcache<D>, bpb: &Bpb, e: &EntryHandle) {
        let mut content = self.content[e.0 as usize].lock();
        content_truncate(bcache, bpb, &mut content, self.panic_hook);
    }

    pub fn stat(&self, e: &EntryHandle) -> Stat {
        let content = self.content[e.0 as usize].lock();
        let mut name = [0u8; STAT_MAX_NAME];
        let n = core::cmp::min(content.name_len as usize, STAT_MAX_NAME);
        name[..n].copy_from_slice(&content.name[..n]);
        Stat {
            name,
            name_len: n,
            kind: if content.attr & dir::attrs::DIRECTORY != 0 { Dir } else { FileKind::File },
            dev: 0,
            size: content.file_size as u64,
        }
    }

    pub fn is_dir(&self, e: &EntryHandle) -> bool {
        self.content[e.0 as usize].lock().attr & dir::attrs::DIRECTORY != 0
    }
}

fn content_read_at<D: BlockDevice>(bcache: &Bcache<D>, bpb: &Bpb, c: &mut Content, off: u64, buf: &mut [u8], panic_hook: &dyn PanicHook) -> usize {
    if c.first_clus == 0 || off >= c.file_size as u64 {
        return 0;
    }
    let end = core::cmp::min(off + buf.len() as u64, c.file_size as u64);
    let mut pos = off;
    let mut read = 0usize;
    while pos < end {
        let clus_off = match reloc_clus(bcache, 0, bpb, c.first_clus, &mut c.cur_clus, &mut c.clus_cnt, pos, false, panic_hook) {
            Some(o) => o as u64,
            None => break,
        };
        let sector = first_sec_of_clus(bpb, c.cur_clus) + clus_off / fernfs_bcache::BSIZE as u64;
        let sector_off = (clus_off % fernfs_bcache::BSIZE as u64) as usize;
        let n = core::cmp::min(fernfs_bcache::BSIZE - sector_off, (end - pos) as usize);
        let block = bcache.bread(0, sector);
        buf[read..read + n].copy_from_slice(&block[sector_off..sector_off + n]);
        drop(block);
        read += n;
        pos += n as u64;
    }
    read
}

/// Like `content_read_at`, but for reading a *directory's* own data rather
/// than a file's: directory content is never bounded by `file_size` (a
/// directory's on-disk short-name record conventionally carries `file_size
/// == 0`, and the root has no record to persist one in at all — see
/// `init_root`), so a scan instead runs until `reloc_clus` reports the
/// cluster chain has no more allocated sectors to give it. Used by
/// `dir_scan_find`/`dir_find_free_run` (scanning a directory's entries) and
/// `flush_content` (reading the SNE record *inside* a parent directory).
fn content_read_dir_at<D: BlockDevice>(bcache: &Bcache<D>, bpb: &Bpb, c: &mut Content, off: u64, buf: &mut [u8], panic_hook: &dyn PanicHook) -> usize {
    if c.first_clus == 0 {
        return 0;
    }
    let end = off + buf.len() as u64;
    let mut pos = off;
    let mut read = 0usize;
    while pos < end {
        let clus_off = match reloc_clus(bcache, 0, bpb, c.first_clus, &mut c.cur_clus, &mut c.clus_cnt, pos, false, panic_hook) {
            Some(o) => o as u64,
            None => break,
        };
        let sector = first_sec_of_clus(bpb, c.cur_clus) + clus_off / fernfs_bcache::BSIZE as u64;
        let sector_off = (clus_off % fernfs_bcache::BSIZE as u64) as usize;
        let n = core::cmp::min(fernfs_bcache::BSIZE - sector_off, (end - pos) as usize);
        let block = bcache.bread(0, sector);
        buf[read..read + n].copy_from_slice(&block[sector_off..sector_off + n]);
        drop(block);
        read += n;
        pos += n as u64;
    }
    read
}

fn content_write_at<D: BlockDevice>(bcache: &Bcache<D>, bpb: &Bpb, c: &mut Content, off: u64, buf: &[u8], panic_hook: &dyn PanicHook) -> usize {
    if buf.is_empty() {
        return 0;
    }
    if c.first_clus == 0 {
        c.first_clus = alloc_clus(bcache, 0, bpb, panic_hook);
        c.cur_clus = c.first_clus;
        c.clus_cnt = 0;
    }
    let end = off + buf.len() as u64;
    let mut pos = off;
    let mut written = 0usize;
    while pos < end {
        let clus_off = reloc_clus(bcache, 0, bpb, c.first_clus, &mut c.cur_clus, &mut c.clus_cnt, pos, true, panic_hook)
            .unwrap_or_else(|| fatal!(panic_hook, "content_write_at: reloc_clus failed to extend chain"));
        let sector = first_sec_of_clus(bpb, c.cur_clus) + clus_off as u64 / fernfs_bcache::BSIZE as u64;
        let sector_off = (clus_off as u64 % fernfs_bcache::BSIZE as u64) as usize;
        let n = core::cmp::min(fernfs_bcache::BSIZE - sector_off, (end - pos) as usize);
        let mut block = bcache.bread(0, sector);
        block[sector_off..sector_off + n].copy_from_slice(&buf[written..written + n]);
        block.write();
        drop(block);
        written += n;
        pos += n as u64;
    }
    if off + written as u64 > c.file_size as u64 {
        c.file_size = (off + written as u64) as u32;
    }
    c.dirty = true;
    written
}

fn content_truncate<D: BlockDevice>(bcache: &Bcache<D>, bpb: &Bpb, c: &mut Content, panic_hook: &dyn PanicHook) {
    let mut clus = c.first_clus;
    while clus != 0 && clus < FAT32_EOC {
        let next = read_fat(bcache, 0, bpb, clus);
        free_clus(bcache, 0, bpb, clus, panic_hook);
        clus = next;
    }
    c.first_clus = 0;
    c.cur_clus = 0;
    c.clus_cnt = 0;
    c.file_size = 0;
    c.dirty = true;
}

/// Case-sensitive: no Unicode/ASCII collation is part of this engine's scope
/// (names compare exactly, matching the original's plain `strncmp`).
fn names_eq(a: &[u8], b: &[u8]) -> bool {
    a == b
}

fn short_display_name(short: &ShortEntry) -> ([u8; FAT32_MAX_FILENAME], usize) {
    let mut out = [0u8; FAT32_MAX_FILENAME];
    let mut len = 0;
    for &b in &short.name[..8] {
        if b == b' ' {
            break;
        }
        out[len] = b;
        len += 1;
    }
    let ext_len = short.name[8..11].iter().take_while(|&&b| b != b' ').count();
    if ext_len > 0 {
        out[len] = b'.';
        len += 1;
        out[len..len + ext_len].copy_from_slice(&short.name[8..8 + ext_len]);
        len += ext_len;
    }
    (out, len)
}

/// Scans `dir`'s data from the start, reassembling any long-name chain that
/// precedes each short entry, until `name` matches or `END_OF_ENTRY` ends
/// the directory.
fn dir_scan_find<D: BlockDevice>(bcache: &Bcache<D>, bpb: &Bpb, dir: &mut Content, name: &[u8], panic_hook: &dyn PanicHook) -> Option<FoundEntry> {
    let mut off = 0u64;
    let mut pending: [[u8; 32]; MAX_NAME_RECORDS] = [[0u8; 32]; MAX_NAME_RECORDS];
    let mut pending_count = 0usize;
    loop {
        let mut raw = [0u8; 32];
        let n = content_read_dir_at(bcache, bpb, dir, off, &mut raw, panic_hook);
        if n < 32 || raw[0] == END_OF_ENTRY {
            return None;
        }
        if raw[0] == EMPTY_ENTRY {
            pending_count = 0;
            off += 32;
            continue;
        }
        if is_long_entry(raw[11]) {
            if pending_count < MAX_NAME_RECORDS {
                pending[pending_count] = raw;
                pending_count += 1;
            }
            off += 32;
            continue;
        }

        let short = ShortEntry::decode(&raw);
        let (display, display_len) = if pending_count > 0 {
            decode_name(&pending[..pending_count], pending_count)
        } else {
            short_display_name(&short)
        };
        let matched = names_eq(&display[..display_len], name);
        let sne_off = off;
        let lne_count = pending_count;
        pending_count = 0;
        off += 32;
        if matched {
            return Some(FoundEntry { sne_off, lne_count, short, name: display, name_len: display_len });
        }
    }
}

fn dir_find_free_run<D: BlockDevice>(bcache: &Bcache<D>, bpb: &Bpb, dir: &mut Content, need: usize, panic_hook: &dyn PanicHook) -> u64 {
    let mut off = 0u64;
    let mut run_start = 0u64;
    let mut run_len = 0usize;
    loop {
        let mut raw = [0u8; 32];
        let n = content_read_dir_at(bcache, bpb, dir, off, &mut raw, panic_hook);
        let at_end = n < 32 || raw[0] == END_OF_ENTRY;
        if at_end {
            return if run_len > 0 { run_start } else { off };
        }
        if raw[0] == EMPTY_ENTRY {
            if run_len == 0 {
                run_start = off;
            }
            run_len += 1;
            if run_len >= need {
                return run_start;
            }
        } else {
            run_len = 0;
        }
        off += 32;
    }
}

fn dir_append<D: BlockDevice>(bcache: &Bcache<D>, bpb: &Bpb, dir: &mut Content, name: &[u8], short: ShortEntry, panic_hook: &dyn PanicHook) -> u64 {
    let (records, count) = encode_name(name, short);
    let start = dir_find_free_run(bcache, bpb, dir, count, panic_hook);
    for i in 0..count {
        content_write_at(bcache, bpb, dir, start + (i as u64) * 32, &records[i], panic_hook);
    }
    start + ((count - 1) as u64) * 32
}

fn erase_records<D: BlockDevice>(bcache: &Bcache<D>, bpb: &Bpb, dir: &mut Content, sne_off: u64, lne_count: usize, panic_hook: &dyn PanicHook) {
    let start = sne_off - (lne_count as u64) * 32;
    let mut marker = [0u8; 32];
    marker[0] = EMPTY_ENTRY;
    for i in 0..=lne_count {
        content_write_at(bcache, bpb, dir, start + (i as u64) * 32, &marker, panic_hook);
    }
}

fn write_dot_entries<D: BlockDevice>(bcache: &Bcache<D>, bpb: &Bpb, first_clus: u32, parent_first_clus: u32, panic_hook: &dyn PanicHook) {
    let mut scratch = Content { loaded: true, first_clus, cur_clus: first_clus, attr: dir::attrs::DIRECTORY, ..Content::empty() };
    let mut dot_name = [b' '; 11];
    dot_name[0] = b'.';
    let dot = ShortEntry {
        name: dot_name,
        attr: dir::attrs::DIRECTORY,
        first_clus_hi: (first_clus >> 16) as u16,
        first_clus_lo: first_clus as u16,
        file_size: 0,
    };
    let mut dotdot_name = [b' '; 11];
    dotdot_name[0] = b'.';
    dotdot_name[1] = b'.';
    let dotdot = ShortEntry {
        name: dotdot_name,
        attr: dir::attrs::DIRECTORY,
        first_clus_hi: (parent_first_clus >> 16) as u16,
        first_clus_lo: parent_first_clus as u16,
        file_size: 0,
    };
    content_write_at(bcache, bpb, &mut scratch, 0, &dot.encode(), panic_hook);
    content_write_at(bcache, bpb, &mut scratch, 32, &dotdot.encode(), panic_hook);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_fs(spc: u8) -> (fernfs_bcache::Bcache<crate::test_support::MemBlockDevice>, Bpb, EntryCache) {
        let (bcache, bpb) = crate::test_support::fresh_volume(spc);
        let cache = EntryCache::new();
        cache.init_root(0, bpb.root_cluster);
        (bcache, bpb, cache)
    }

    #[test]
    fn create_write_read_round_trips() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let file = cache.ealloc(&bcache, &bpb, &root, b"hello.txt", false).unwrap();
        cache.ewrite_buf(&bcache, &bpb, &file, 0, b"hi there").unwrap();
        let mut buf = [0u8; 8];
        let n = cache.eread_buf(&bcache, &bpb, &file, 0, &mut buf);
        assert_eq!(n, 8);
        assert_eq!(&buf, b"hi there");
        cache.put(&bcache, &bpb, file);
        cache.put(&bcache, &bpb, root);
    }

    /// A child created in a brand-new directory, without an intervening
    /// close/reopen of that directory's own handle, must land after the
    /// synthetic `.`/`..` records rather than overwriting them: the new
    /// directory's in-memory `file_size` has to already account for those
    /// 64 bytes the moment `ealloc` hands back its handle.
    #[test]
    fn first_child_of_new_dir_does_not_clobber_dot_entries() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let sub = cache.ealloc(&bcache, &bpb, &root, b"sub", true).unwrap();
        let leaf = cache.ealloc(&bcache, &bpb, &sub, b"leaf.txt", false).unwrap();
        cache.put(&bcache, &bpb, leaf);

        let mut raw = [0u8; 32];
        let mut sub_content = cache.content[sub.0 as usize].lock();
        let n = content_read_at(&bcache, &bpb, &mut sub_content, 0, &mut raw, cache.panic_hook);
        drop(sub_content);
        assert_eq!(n, 32);
        assert_eq!(&raw[0..1], b".");

        let dotdot = cache.dirlookup(&bcache, &bpb, &sub, b"..").unwrap();
        assert!(cache.is_dir(&dotdot));
        cache.put(&bcache, &bpb, dotdot);
        cache.put(&bcache, &bpb, sub);
        cache.put(&bcache, &bpb, root);
    }

    #[test]
    fn dirlookup_finds_created_entry_after_reopen() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let dir = cache.ealloc(&bcache, &bpb, &root, b"sub", true).unwrap();
        cache.put(&bcache, &bpb, dir);

        let found = cache.dirlookup(&bcache, &bpb, &root, b"sub").unwrap();
        assert!(cache.is_dir(&found));
        let dotdot = cache.dirlookup(&bcache, &bpb, &found, b"..").unwrap();
        assert_eq!(cache.stat(&dotdot).size, 0);
        cache.put(&bcache, &bpb, dotdot);
        cache.put(&bcache, &bpb, found);
        cache.put(&bcache, &bpb, root);
    }

    #[test]
    fn long_filename_survives_dirlookup() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let name = b"a rather long file name.txt";
        let file = cache.ealloc(&bcache, &bpb, &root, name, false).unwrap();
        cache.put(&bcache, &bpb, file);

        let found = cache.dirlookup(&bcache, &bpb, &root, name).unwrap();
        let stat = cache.stat(&found);
        assert_eq!(stat.name(), name);
        cache.put(&bcache, &bpb, found);
        cache.put(&bcache, &bpb, root);
    }

    #[test]
    fn reopen_after_close_hits_cache_without_rescan() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let file = cache.ealloc(&bcache, &bpb, &root, b"cached.txt", false).unwrap();
        let slot = file.0;
        cache.put(&bcache, &bpb, file);

        // The arena slot is still parked (refcnt 0, state Live) at this
        // point, not wiped — dirlookup must find it by the same slot index
        // rather than reclaiming a different one.
        let reopened = cache.dirlookup(&bcache, &bpb, &root, b"cached.txt").unwrap();
        assert_eq!(reopened.0, slot);
        cache.put(&bcache, &bpb, reopened);
        cache.put(&bcache, &bpb, root);
    }

    #[test]
    fn remove_without_reopening_still_frees_clusters() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let file = cache.ealloc(&bcache, &bpb, &root, b"gone2.bin", false).unwrap();
        cache.ewrite_buf(&bcache, &bpb, &file, 0, &[9u8; 600]).unwrap();
        let first_clus = cache.content[file.0 as usize].lock().first_clus;
        cache.put(&bcache, &bpb, file);

        // No one holds a reference to the removed entry at the moment of
        // removal; its clusters must still be freed by eremove's own
        // eget/put pair, not leaked.
        cache.eremove(&bcache, &bpb, &root, b"gone2.bin").unwrap();
        let reused = alloc_clus(&bcache, 0, &bpb, cache.panic_hook);
        assert_eq!(reused, first_clus, "freed cluster chain should be reusable immediately");
        free_clus(&bcache, 0, &bpb, reused, cache.panic_hook);
        cache.put(&bcache, &bpb, root);
    }

    #[test]
    fn remove_then_final_put_frees_clusters() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let file = cache.ealloc(&bcache, &bpb, &root, b"gone.bin", false).unwrap();
        cache.ewrite_buf(&bcache, &bpb, &file, 0, &[1u8; 600]).unwrap();
        let first_clus = {
            let stat = cache.stat(&file);
            assert_eq!(stat.size, 600);
            stat.size
        };
        let _ = first_clus;

        cache.eremove(&bcache, &bpb, &root, b"gone.bin").unwrap();
        assert!(cache.dirlookup(&bcache, &bpb, &root, b"gone.bin").is_err());
        cache.put(&bcache, &bpb, file);
        cache.put(&bcache, &bpb, root);
    }

    #[test]
    fn truncate_resets_size_and_frees_chain() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let file = cache.ealloc(&bcache, &bpb, &root, b"shrink.bin", false).unwrap();
        cache.ewrite_buf(&bcache, &bpb, &file, 0, &[7u8; 2000]).unwrap();
        cache.etrunc(&bcache, &bpb, &file);
        assert_eq!(cache.stat(&file).size, 0);
        cache.put(&bcache, &bpb, file);
        cache.put(&bcache, &bpb, root);
    }

    #[test]
    fn write_to_read_only_entry_is_rejected() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let file = cache.ealloc(&bcache, &bpb, &root, b"locked.bin", false).unwrap();
        cache.content[file.0 as usize].lock().attr |= dir::attrs::READ_ONLY;

        let err = cache.ewrite_buf(&bcache, &bpb, &file, 0, b"nope").unwrap_err();
        assert_eq!(err, FatError::ReadOnly);
        cache.put(&bcache, &bpb, file);
        cache.put(&bcache, &bpb, root);
    }

    #[test]
    fn write_past_current_end_of_file_is_rejected() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let file = cache.ealloc(&bcache, &bpb, &root, b"sparse.bin", false).unwrap();
        let err = cache.ewrite_buf(&bcache, &bpb, &file, 100, b"gap").unwrap_err();
        assert_eq!(err, FatError::Overflow);
        cache.put(&bcache, &bpb, file);
        cache.put(&bcache, &bpb, root);
    }

    /// A `UserCopy` that faults after letting a fixed number of bytes
    /// through, standing in for a user page that's mapped for the first
    /// part of a buffer and unmapped (or revoked mid-syscall) for the rest.
    struct FaultAfter(core::cell::Cell<usize>);

    impl UserCopy for FaultAfter {
        fn copy(&self, _to_user: bool, _addr: usize, buf: &mut [u8], write: bool) -> Result<(), fernfs_driver_traits::CopyFault> {
            let remaining = self.0.get();
            if buf.len() > remaining {
                return Err(fernfs_driver_traits::CopyFault);
            }
            self.0.set(remaining - buf.len());
            if !write {
                buf.fill(0x5A);
            }
            Ok(())
        }
    }

    /// `eread`/`ewrite` stage one `COPY_CHUNK` (one sector) at a time, so a
    /// fault can only be observed at a chunk boundary: these write/read
    /// 1200 bytes (more than one chunk) and let exactly one chunk's worth of
    /// bytes through before faulting.
    #[test]
    fn read_stops_and_returns_partial_count_on_copy_fault() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let file = cache.ealloc(&bcache, &bpb, &root, b"faulty.bin", false).unwrap();
        cache.ewrite_buf(&bcache, &bpb, &file, 0, &[1u8; 1200]).unwrap();

        let copier = FaultAfter(core::cell::Cell::new(COPY_CHUNK));
        let mut sink = [0u8; 1200];
        let n = cache.eread(&bcache, &bpb, &file, &copier, true, sink.as_mut_ptr() as usize, 0, 1200);
        assert_eq!(n, COPY_CHUNK, "copy fault on the second chunk should stop the read after the first");
        cache.put(&bcache, &bpb, file);
        cache.put(&bcache, &bpb, root);
    }

    #[test]
    fn write_stops_and_returns_partial_count_on_copy_fault() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let file = cache.ealloc(&bcache, &bpb, &root, b"faulty2.bin", false).unwrap();

        let copier = FaultAfter(core::cell::Cell::new(COPY_CHUNK));
        let src = [0xAAu8; 1200];
        let n = cache.ewrite(&bcache, &bpb, &file, &copier, true, src.as_ptr() as usize, 0, 1200).unwrap();
        assert_eq!(n, COPY_CHUNK, "copy fault on the second chunk should stop the write after the first");
        assert_eq!(cache.stat(&file).size as usize, COPY_CHUNK);
        cache.put(&bcache, &bpb, file);
        cache.put(&bcache, &bpb, root);
    }

    #[test]
    fn read_on_directory_entry_returns_zero() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let dir = cache.ealloc(&bcache, &bpb, &root, b"adir", true).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(cache.eread_buf(&bcache, &bpb, &dir, 0, &mut buf), 0);
        cache.put(&bcache, &bpb, dir);
        cache.put(&bcache, &bpb, root);
    }

    /// A directory's on-disk short-name record carries `file_size == 0` by
    /// FAT32 convention (the root has no record at all), so a directory scan
    /// must never be bounded by `Content::file_size` — only by the extent of
    /// its allocated cluster chain. A brand-new `EntryCache` over the same
    /// on-disk bytes (standing in for a fresh mount, where nothing is parked
    /// in the arena and root's in-memory `file_size` starts at its seeded 0)
    /// must still find an entry a previous session created.
    #[test]
    fn remount_finds_preexisting_root_entry() {
        let (bcache, bpb) = crate::test_support::fresh_volume(2);
        {
            let cache = EntryCache::new();
            cache.init_root(0, bpb.root_cluster);
            let root = cache.root();
            let file = cache.ealloc(&bcache, &bpb, &root, b"existing.txt", false).unwrap();
            cache.ewrite_buf(&bcache, &bpb, &file, 0, b"already here").unwrap();
            cache.put(&bcache, &bpb, file);
            cache.put(&bcache, &bpb, root);
        }

        let remounted = EntryCache::new();
        remounted.init_root(0, bpb.root_cluster);
        let root = remounted.root();
        let found = remounted.dirlookup(&bcache, &bpb, &root, b"existing.txt").unwrap();
        let mut buf = [0u8; 12];
        assert_eq!(remounted.eread_buf(&bcache, &bpb, &found, 0, &mut buf), 12);
        assert_eq!(&buf, b"already here");
        remounted.put(&bcache, &bpb, found);
        remounted.put(&bcache, &bpb, root);
    }

    /// Also exercises a directory deeper than the root, and `dir_find_free_run`
    /// locating space for a second entry after a remount rather than
    /// clobbering the first (both depend on scanning past a stale in-memory
    /// `file_size` of 0).
    #[test]
    fn remount_can_append_sibling_after_preexisting_entry() {
        let (bcache, bpb) = crate::test_support::fresh_volume(2);
        {
            let cache = EntryCache::new();
            cache.init_root(0, bpb.root_cluster);
            let root = cache.root();
            let sub = cache.ealloc(&bcache, &bpb, &root, b"sub", true).unwrap();
            let first = cache.ealloc(&bcache, &bpb, &sub, b"first.txt", false).unwrap();
            cache.put(&bcache, &bpb, first);
            cache.put(&bcache, &bpb, sub);
            cache.put(&bcache, &bpb, root);
        }

        let remounted = EntryCache::new();
        remounted.init_root(0, bpb.root_cluster);
        let root = remounted.root();
        let sub = remounted.dirlookup(&bcache, &bpb, &root, b"sub").unwrap();
        let second = remounted.ealloc(&bcache, &bpb, &sub, b"second.txt", false).unwrap();
        remounted.put(&bcache, &bpb, second);

        let first_again = remounted.dirlookup(&bcache, &bpb, &sub, b"first.txt").unwrap();
        assert!(!remounted.is_dir(&first_again));
        remounted.put(&bcache, &bpb, first_again);
        remounted.put(&bcache, &bpb, sub);
        remounted.put(&bcache, &bpb, root);
    }

    /// `ealloc` of a name that already exists is idempotent: it returns the
    /// existing dirent rather than erroring.
    #[test]
    fn ealloc_of_existing_name_is_idempotent() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let first = cache.ealloc(&bcache, &bpb, &root, b"dup.txt", false).unwrap();
        cache.ewrite_buf(&bcache, &bpb, &first, 0, b"data").unwrap();
        cache.put(&bcache, &bpb, first);

        let second = cache.ealloc(&bcache, &bpb, &root, b"dup.txt", false).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(cache.eread_buf(&bcache, &bpb, &second, 0, &mut buf), 4);
        assert_eq!(&buf, b"data");
        cache.put(&bcache, &bpb, second);
        cache.put(&bcache, &bpb, root);
    }

    /// Names compare exactly, not case-folded: no Unicode/ASCII collation is
    /// in scope, so `File.txt` and `file.txt` are distinct entries.
    #[test]
    fn filenames_are_case_sensitive() {
        let (bcache, bpb, cache) = fresh_fs(2);
        let root = cache.root();
        let lower = cache.ealloc(&bcache, &bpb, &root, b"file.txt", false).unwrap();
        cache.ewrite_buf(&bcache, &bpb, &lower, 0, b"lower").unwrap();
        cache.put(&bcache, &bpb, lower);

        let upper = cache.ealloc(&bcache, &bpb, &root, b"File.txt", false).unwrap();
        assert_eq!(cache.stat(&upper).size, 0, "differently-cased name must be a distinct, freshly created entry");
        cache.put(&bcache, &bpb, upper);
        cache.put(&bcache, &bpb, root);
    }
}
