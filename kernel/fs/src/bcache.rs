//! The hashed LRU buffer cache.
//!
//! Grounded on `original_source/src/kernel/blk/bcache.c`: 256 4 KiB
//! buffers, a 64-bucket hash table keyed by `((dev_key >> 4) ^ blockno) &
//! 63`, one global lock guarding hash/LRU bookkeeping plus a lock per
//! buffer guarding its data. `bread`'s hit path waits for a buffer's BUSY
//! flag to clear by dropping the global lock and spinning — the source has
//! a literal `// TODO: sleep instead` at that point. This keeps the same
//! cooperative spin rather than upgrading it to a blocking wait, so it
//! is modeled here as a [`Yielder`] the caller supplies rather than a hard
//! dependency on a scheduler. The source's raw device pointer in the hash
//! key becomes [`vireo_core::id::DeviceId`]'s packed `(major, minor)` pair.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;

use vireo_core::error::{KError, KResult};
use vireo_core::id::DeviceId;
use vireo_core::sync::IrqSpinLock;

use crate::block::{BlockDeviceOps, BlockOp, BlockReqFlags, BlockRequest};

/// Number of cache buffers.
pub const NUM_BUFFERS: usize = 256;
/// Size of one buffer in bytes.
pub const BUFFER_SIZE: usize = 4096;
/// Number of hash buckets.
pub const HASH_BUCKETS: usize = 64;

bitflags! {
    /// Per-buffer state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BufferFlags: u8 {
        /// Contents reflect on-disk data.
        const VALID = 1 << 0;
        /// Contents have been written since the last flush.
        const DIRTY = 1 << 1;
        /// An I/O operation on this buffer is in flight.
        const BUSY = 1 << 2;
    }
}

/// Cooperates with [`Bcache`]'s BUSY-wait spin in [`Bcache::bread`]. A
/// scheduler-integrated implementation (calling `Scheduler::yield_now`)
/// is wired up in the kernel crate that owns both this cache and the
/// scheduler; this crate only needs the seam.
pub trait Yielder {
    /// Gives up the CPU for one quantum, or simply spins if there is no
    /// scheduler to yield to.
    fn yield_now(&self);
}

/// A [`Yielder`] that never actually yields, for environments (host tests)
/// where contention never occurs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinYielder;

impl Yielder for SpinYielder {
    fn yield_now(&self) {
        core::hint::spin_loop();
    }
}

fn hash_key(dev: DeviceId, blockno: u64) -> usize {
    let dev_key = (u64::from(dev.major()) << 16) | u64::from(dev.minor());
    (((dev_key >> 4) ^ blockno) & (HASH_BUCKETS as u64 - 1)) as usize
}

struct BufMeta {
    dev: Option<DeviceId>,
    blockno: u64,
    flags: BufferFlags,
    refcount: u32,
    pincount: u32,
    ops: Option<Arc<dyn BlockDeviceOps>>,
    hash_next: Option<usize>,
    lru_prev: Option<usize>,
    lru_next: Option<usize>,
}

impl BufMeta {
    const fn empty() -> Self {
        Self {
            dev: None,
            blockno: 0,
            flags: BufferFlags::empty(),
            refcount: 0,
            pincount: 0,
            ops: None,
            hash_next: None,
            lru_prev: None,
            lru_next: None,
        }
    }
}

/// Cumulative cache statistics, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct BcacheStats {
    /// Number of `bread` calls that found the block already cached.
    pub hits: u64,
    /// Number of `bread` calls that required a device read.
    pub misses: u64,
    /// Number of buffers evicted to satisfy a miss.
    pub evictions: u64,
}

struct State {
    meta: Vec<BufMeta>,
    hash: [Option<usize>; HASH_BUCKETS],
    lru_head: Option<usize>,
    lru_tail: Option<usize>,
    stats: BcacheStats,
}

impl State {
    fn lru_unlink(&mut self, index: usize) {
        let (prev, next) = (self.meta[index].lru_prev, self.meta[index].lru_next);
        match prev {
            Some(p) => self.meta[p].lru_next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(n) => self.meta[n].lru_prev = prev,
            None => self.lru_tail = prev,
        }
        self.meta[index].lru_prev = None;
        self.meta[index].lru_next = None;
    }

    fn lru_push_front(&mut self, index: usize) {
        self.meta[index].lru_prev = None;
        self.meta[index].lru_next = self.lru_head;
        if let Some(head) = self.lru_head {
            self.meta[head].lru_prev = Some(index);
        }
        self.lru_head = Some(index);
        if self.lru_tail.is_none() {
            self.lru_tail = Some(index);
        }
    }

    fn lru_push_back(&mut self, index: usize) {
        self.meta[index].lru_next = None;
        self.meta[index].lru_prev = self.lru_tail;
        if let Some(tail) = self.lru_tail {
            self.meta[tail].lru_next = Some(index);
        }
        self.lru_tail = Some(index);
        if self.lru_head.is_none() {
            self.lru_head = Some(index);
        }
    }

    fn move_to_front(&mut self, index: usize) {
        self.lru_unlink(index);
        self.lru_push_front(index);
    }

    fn hash_insert(&mut self, index: usize) {
        let dev = self.meta[index].dev.expect("hash_insert on unbound buffer");
        let bucket = hash_key(dev, self.meta[index].blockno);
        self.meta[index].hash_next = self.hash[bucket];
        self.hash[bucket] = Some(index);
    }

    fn hash_remove(&mut self, index: usize) {
        let Some(dev) = self.meta[index].dev else { return };
        let bucket = hash_key(dev, self.meta[index].blockno);
        let mut cur = self.hash[bucket];
        let mut prev: Option<usize> = None;
        while let Some(c) = cur {
            if c == index {
                let next = self.meta[c].hash_next;
                match prev {
                    Some(p) => self.meta[p].hash_next = next,
                    None => self.hash[bucket] = next,
                }
                self.meta[index].hash_next = None;
                return;
            }
            prev = Some(c);
            cur = self.meta[c].hash_next;
        }
    }

    fn hash_lookup(&self, dev: DeviceId, blockno: u64) -> Option<usize> {
        let bucket = hash_key(dev, blockno);
        let mut cur = self.hash[bucket];
        while let Some(c) = cur {
            if self.meta[c].dev == Some(dev) && self.meta[c].blockno == blockno {
                return Some(c);
            }
            cur = self.meta[c].hash_next;
        }
        None
    }

    /// Finds the LRU-tail-most buffer eligible for eviction (refcount and
    /// pincount both zero).
    fn find_evictable(&self) -> Option<usize> {
        let mut cur = self.lru_tail;
        while let Some(c) = cur {
            if self.meta[c].refcount == 0 && self.meta[c].pincount == 0 {
                return Some(c);
            }
            cur = self.meta[c].lru_prev;
        }
        None
    }
}

/// The hashed LRU buffer cache.
pub struct Bcache<Y: Yielder = SpinYielder> {
    state: IrqSpinLock<State>,
    data: Vec<IrqSpinLock<[u8; BUFFER_SIZE]>>,
    yielder: Y,
}

impl<Y: Yielder + Default> Default for Bcache<Y> {
    fn default() -> Self {
        Self::new(Y::default())
    }
}

impl<Y: Yielder> Bcache<Y> {
    /// Creates an empty cache of [`NUM_BUFFERS`] unbound buffers.
    #[must_use]
    pub fn new(yielder: Y) -> Self {
        let mut meta = Vec::with_capacity(NUM_BUFFERS);
        for _ in 0..NUM_BUFFERS {
            meta.push(BufMeta::empty());
        }
        let mut data = Vec::with_capacity(NUM_BUFFERS);
        for _ in 0..NUM_BUFFERS {
            data.push(IrqSpinLock::new([0u8; BUFFER_SIZE]));
        }
        let mut lru_head = None;
        let mut lru_tail = None;
        for i in (0..NUM_BUFFERS).rev() {
            meta[i].lru_next = lru_head;
            if lru_head.is_none() {
                lru_tail = Some(i);
            } else {
                let next = lru_head.unwrap();
                meta[next].lru_prev = Some(i);
            }
            lru_head = Some(i);
        }
        Self {
            state: IrqSpinLock::new(State { meta, hash: [None; HASH_BUCKETS], lru_head, lru_tail, stats: BcacheStats::default() }),
            data,
            yielder,
        }
    }

    /// Cumulative statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> BcacheStats {
        self.state.lock().stats
    }

    fn flush_locked(&self, state: &mut State, index: usize) -> KResult<()> {
        if !state.meta[index].flags.contains(BufferFlags::DIRTY) {
            return Ok(());
        }
        let dev = state.meta[index].dev.expect("flush of unbound buffer");
        let blockno = state.meta[index].blockno;
        let ops = state.meta[index].ops.clone().expect("flush of buffer with no device ops");
        let mut buf = self.data[index].lock();
        let mut req = BlockRequest {
            device: dev,
            op: BlockOp::Write,
            flags: BlockReqFlags::empty(),
            start_sector: blockno,
            sector_count: 1,
            buffer: &mut buf[..],
            private: 0,
        };
        ops.request(&mut req)?;
        state.meta[index].flags.remove(BufferFlags::DIRTY);
        Ok(())
    }

    /// Reads block `blockno` of `dev` into the cache, blocking (via the
    /// cooperative spin, not the scheduler) until any in-flight I/O on the
    /// same buffer finishes (`bread`).
    ///
    /// `ops` is the device's ops vtable, supplied by the caller rather than
    /// looked up internally, so this cache never needs a reference to a
    /// [`crate::block::BlockRegistry`].
    ///
    /// # Errors
    /// Propagates the device driver's read error, or [`KError::NoMem`] if
    /// every buffer is pinned/referenced and none can be evicted.
    pub fn bread(&self, ops: &Arc<dyn BlockDeviceOps>, dev: DeviceId, blockno: u64) -> KResult<usize> {
        loop {
            let mut state = self.state.lock();
            if let Some(index) = state.hash_lookup(dev, blockno) {
                state.meta[index].refcount += 1;
                state.move_to_front(index);
                state.stats.hits += 1;
                if !state.meta[index].flags.contains(BufferFlags::BUSY) {
                    return Ok(index);
                }
                drop(state);
                self.yielder.yield_now();
                continue;
            }

            state.stats.misses += 1;
            let Some(index) = state.find_evictable() else {
                return Err(KError::NoMem);
            };
            state.stats.evictions += 1;
            self.flush_locked(&mut state, index)?;
            state.hash_remove(index);

            state.meta[index].dev = Some(dev);
            state.meta[index].blockno = blockno;
            state.meta[index].ops = Some(Arc::clone(ops));
            state.meta[index].flags = BufferFlags::BUSY;
            state.meta[index].refcount = 1;
            state.meta[index].pincount = 0;
            state.hash_insert(index);
            state.move_to_front(index);
            drop(state);

            let result = {
                let mut buf = self.data[index].lock();
                let mut req = BlockRequest {
                    device: dev,
                    op: BlockOp::Read,
                    flags: BlockReqFlags::empty(),
                    start_sector: blockno,
                    sector_count: 1,
                    buffer: &mut buf[..],
                    private: 0,
                };
                ops.request(&mut req)
            };

            let mut state = self.state.lock();
            match result {
                Ok(()) => {
                    state.meta[index].flags = BufferFlags::VALID;
                    return Ok(index);
                }
                Err(e) => {
                    state.meta[index].refcount = 0;
                    state.hash_remove(index);
                    state.meta[index].dev = None;
                    state.meta[index].flags = BufferFlags::empty();
                    return Err(e);
                }
            }
        }
    }

    /// Reads the buffer's contents under its per-buffer lock.
    pub fn with_data<R>(&self, index: usize, f: impl FnOnce(&[u8; BUFFER_SIZE]) -> R) -> R {
        f(&self.data[index].lock())
    }

    /// Mutates the buffer's contents under its per-buffer lock and marks it
    /// dirty (`bwrite`). If `sync`, writes through to the
    /// device immediately and clears the dirty flag.
    ///
    /// # Errors
    /// Propagates the device driver's write error when `sync` is set.
    pub fn bwrite(&self, index: usize, sync: bool, f: impl FnOnce(&mut [u8; BUFFER_SIZE])) -> KResult<()> {
        {
            let mut buf = self.data[index].lock();
            f(&mut buf);
        }
        let mut state = self.state.lock();
        state.meta[index].flags.insert(BufferFlags::DIRTY);
        if sync {
            self.flush_locked(&mut state, index)?;
        }
        Ok(())
    }

    /// Releases a reference taken by [`Bcache::bread`]; when the refcount
    /// reaches zero the buffer moves to the LRU tail, becoming the next
    /// eviction candidate (`brelse`).
    pub fn brelse(&self, index: usize) {
        let mut state = self.state.lock();
        if state.meta[index].refcount > 0 {
            state.meta[index].refcount -= 1;
        }
        if state.meta[index].refcount == 0 {
            state.lru_unlink(index);
            state.lru_push_back(index);
        }
    }

    /// Prevents eviction of the buffer at `index` during a multi-step
    /// operation.
    pub fn bpin(&self, index: usize) {
        self.state.lock().meta[index].pincount += 1;
    }

    /// Releases a pin taken by [`Bcache::bpin`].
    pub fn bunpin(&self, index: usize) {
        let mut state = self.state.lock();
        if state.meta[index].pincount > 0 {
            state.meta[index].pincount -= 1;
        }
    }

    /// Flushes every dirty buffer for `dev` (or every device if `None`)
    /// (`bsync`).
    ///
    /// # Errors
    /// Returns the first write error encountered; flushing continues for
    /// the remaining buffers regardless.
    pub fn bsync(&self, dev: Option<DeviceId>) -> KResult<()> {
        let mut first_err = None;
        for index in 0..NUM_BUFFERS {
            let mut state = self.state.lock();
            let matches = state.meta[index].dev.is_some() && (dev.is_none() || state.meta[index].dev == dev);
            if matches && state.meta[index].flags.contains(BufferFlags::DIRTY) {
                if let Err(e) = self.flush_locked(&mut state, index) {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Drops all clean buffers for `dev` and flushes dirty ones, used at
    /// unmount (`bcache_invalidate`).
    ///
    /// # Errors
    /// Returns the first write error encountered while flushing dirty
    /// buffers.
    pub fn invalidate(&self, dev: DeviceId) -> KResult<()> {
        let mut first_err = None;
        for index in 0..NUM_BUFFERS {
            let mut state = self.state.lock();
            if state.meta[index].dev != Some(dev) {
                continue;
            }
            if state.meta[index].flags.contains(BufferFlags::DIRTY) {
                if let Err(e) = self.flush_locked(&mut state, index) {
                    first_err.get_or_insert(e);
                }
            }
            state.hash_remove(index);
            state.meta[index].dev = None;
            state.meta[index].flags = BufferFlags::empty();
            state.meta[index].ops = None;
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockDeviceOps;
    use alloc::vec;

    struct MemDevice {
        data: IrqSpinLock<Vec<u8>>,
    }

    impl MemDevice {
        fn new(blocks: usize) -> Self {
            Self { data: IrqSpinLock::new(vec![0u8; blocks * BUFFER_SIZE]) }
        }
    }

    impl BlockDeviceOps for MemDevice {
        fn open(&self) -> KResult<()> {
            Ok(())
        }
        fn close(&self) -> KResult<()> {
            Ok(())
        }
        fn request(&self, req: &mut BlockRequest<'_>) -> KResult<()> {
            let offset = req.start_sector as usize * BUFFER_SIZE;
            let mut data = self.data.lock();
            match req.op {
                BlockOp::Read => req.buffer.copy_from_slice(&data[offset..offset + BUFFER_SIZE]),
                BlockOp::Write => data[offset..offset + BUFFER_SIZE].copy_from_slice(req.buffer),
                BlockOp::Flush => {}
            }
            Ok(())
        }
        fn ioctl(&self, _cmd: u32, _arg: usize) -> KResult<usize> {
            Ok(0)
        }
        fn flush(&self) -> KResult<()> {
            Ok(())
        }
    }

    fn setup() -> (Bcache<SpinYielder>, Arc<dyn BlockDeviceOps>, DeviceId) {
        (Bcache::new(SpinYielder), Arc::new(MemDevice::new(NUM_BUFFERS + 8)), DeviceId::new(8, 0))
    }

    #[test]
    fn bread_miss_then_hit() {
        let (cache, ops, dev) = setup();
        let idx1 = cache.bread(&ops, dev, 0).unwrap();
        cache.brelse(idx1);
        let idx2 = cache.bread(&ops, dev, 0).unwrap();
        assert_eq!(idx1, idx2);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
        cache.brelse(idx2);
    }

    #[test]
    fn bwrite_sync_clears_dirty_and_persists() {
        let (cache, ops, dev) = setup();
        let idx = cache.bread(&ops, dev, 1).unwrap();
        cache.bwrite(idx, true, |buf| buf[0] = 0x42).unwrap();
        cache.brelse(idx);
        cache.invalidate(dev);
        let idx2 = cache.bread(&ops, dev, 1).unwrap();
        cache.with_data(idx2, |buf| assert_eq!(buf[0], 0x42));
        cache.brelse(idx2);
    }

    #[test]
    fn dirty_evictee_is_flushed_before_reuse() {
        let (cache, ops, dev) = setup();
        let idx = cache.bread(&ops, dev, 2).unwrap();
        cache.bwrite(idx, false, |buf| buf[0] = 0x99).unwrap();
        cache.brelse(idx);
        for blockno in 3..3 + NUM_BUFFERS as u64 {
            let i = cache.bread(&ops, dev, blockno).unwrap();
            cache.brelse(i);
        }
        assert!(cache.stats().evictions > 0);
        let idx2 = cache.bread(&ops, dev, 2).unwrap();
        cache.with_data(idx2, |buf| assert_eq!(buf[0], 0x99));
        cache.brelse(idx2);
    }

    #[test]
    fn pinned_buffer_is_not_evicted() {
        let (cache, ops, dev) = setup();
        let idx = cache.bread(&ops, dev, 0).unwrap();
        cache.bpin(idx);
        cache.brelse(idx);
        for blockno in 1..1 + NUM_BUFFERS as u64 {
            let i = cache.bread(&ops, dev, blockno).unwrap();
            cache.brelse(i);
        }
        let idx_again = cache.bread(&ops, dev, 0).unwrap();
        assert_eq!(idx, idx_again);
        cache.bunpin(idx_again);
        cache.brelse(idx_again);
    }

    #[test]
    fn at_most_one_buffer_per_dev_block() {
        let (cache, ops, dev) = setup();
        let idx1 = cache.bread(&ops, dev, 5).unwrap();
        let idx2 = cache.bread(&ops, dev, 5).unwrap();
        assert_eq!(idx1, idx2);
        cache.brelse(idx1);
        cache.brelse(idx2);
    }
}
