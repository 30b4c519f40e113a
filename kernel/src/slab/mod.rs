//! Slab memory allocator (SMA, spec §4.4): fixed-size object caches built
//! from page-multiple slabs, each slab a bitmap of equal-size slots.
//! Grounded on `original_source/kern/sma.c`'s empty/partial/full state
//! machine and `first_free` bitmap scan, re-expressed over `alloc::alloc`
//! (itself backed by [`crate::allocator::ALLOCATOR`]) instead of the
//! original's own `vmalloc`/`vfree`, and guarded by a [`util::mutex::Mutex`]
//! like every other per-object lock in this kernel.

use alloc::{
    alloc::{alloc, alloc_zeroed, dealloc, Layout},
    collections::VecDeque,
    string::String,
    vec::Vec,
};
use core::fmt;
use util::mutex::Mutex;
use x86_64::memory::{PageSize, Size4KiB};

const PAGE_SIZE: usize = Size4KiB::SIZE as usize;
const BITMAP_BPW: usize = u64::BITS as usize;
/// Must never be 1 — that would erase the partial/full distinction
/// (`original_source/kern/sma.c`'s own comment on `BITMAP_MIN_SIZE`).
const BITMAP_MIN_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabError {
    OutOfMemory,
    InvalidPointer,
    DoubleFree,
}

impl fmt::Display for SlabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SlabError::OutOfMemory => "slab cache out of memory",
            SlabError::InvalidPointer => "pointer does not belong to this cache",
            SlabError::DoubleFree => "double free detected in slab cache",
        };
        write!(f, "{}", msg)
    }
}

impl core::error::Error for SlabError {}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SlabState {
    Empty,
    Partial,
    Full,
}

struct Slab {
    addr: Option<*mut u8>,
    bitmap: Vec<u64>,
    /// Lowest known-clear bit, or `bitmap_count` once the slab is full
    /// (spec §3 "`first_free` in a slab is the lowest clear bit").
    first_free: usize,
    state: SlabState,
}

impl Slab {
    fn new(bitmap_words: usize) -> Self {
        Self {
            addr: None,
            bitmap: alloc::vec![0u64; bitmap_words],
            first_free: 0,
            state: SlabState::Empty,
        }
    }

    fn bit_set(&mut self, i: usize) {
        self.bitmap[i / BITMAP_BPW] |= 1 << (i % BITMAP_BPW);
    }

    fn bit_clear(&mut self, i: usize) {
        self.bitmap[i / BITMAP_BPW] &= !(1 << (i % BITMAP_BPW));
    }

    fn bit_get(&self, i: usize) -> bool {
        self.bitmap[i / BITMAP_BPW] & (1 << (i % BITMAP_BPW)) != 0
    }

    fn all_clear(&self) -> bool {
        self.bitmap.iter().all(|w| *w == 0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub nalloc: u64,
    pub nfree: u64,
    pub ncurrent: i64,
    pub nslabs: u64,
}

/// One fixed-object-size cache (spec §3 "SMA"). `ctor`/`dtor` run once per
/// slot, on first backing and on slab teardown respectively — not on every
/// alloc/free, matching `original_source`'s `slab_ctr`/`slab_dtr`.
pub struct Cache {
    name: String,
    data_size: usize,
    bitmap_count: usize,
    bitmap_words: usize,
    ctor: Option<fn(&mut [u8])>,
    dtor: Option<fn(&mut [u8])>,
    slabs: Vec<Slab>,
    empty: VecDeque<usize>,
    partial: VecDeque<usize>,
    full: VecDeque<usize>,
    stats: CacheStats,
}

unsafe impl Send for Cache {}

impl Cache {
    /// `data_size` is the fixed object size; each slab backs
    /// `max(BITMAP_MIN_SIZE, PAGE_SIZE / data_size)` objects, rounding the
    /// slab's own backing allocation up to a whole number of slots.
    pub fn new<N: Into<String>>(
        name: N,
        data_size: usize,
        ctor: Option<fn(&mut [u8])>,
        dtor: Option<fn(&mut [u8])>,
    ) -> Self {
        let bitmap_count = BITMAP_MIN_SIZE.max(PAGE_SIZE / data_size.max(1));
        let bitmap_words = (bitmap_count + BITMAP_BPW - 1) / BITMAP_BPW;
        Self {
            name: name.into(),
            data_size,
            bitmap_count,
            bitmap_words,
            ctor,
            dtor,
            slabs: Vec::new(),
            empty: VecDeque::new(),
            partial: VecDeque::new(),
            full: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn slab_layout(&self) -> Layout {
        Layout::from_size_align(self.data_size * self.bitmap_count, core::mem::align_of::<u64>())
            .expect("invalid slab layout")
    }

    /// Backs a slab lazily (spec §4.4: a slab can sit EMPTY with no
    /// payload allocation at all, `original_source`'s `slab->addr == NULL`)
    /// and runs the constructor hook over every slot exactly once.
    unsafe fn back_slab(&mut self, idx: usize) -> Result<(), SlabError> {
        if self.slabs[idx].addr.is_some() {
            return Ok(());
        }
        let layout = self.slab_layout();
        let ptr = alloc(layout);
        if ptr.is_null() {
            return Err(SlabError::OutOfMemory);
        }
        if let Some(ctor) = self.ctor {
            for i in 0..self.bitmap_count {
                let slot = core::slice::from_raw_parts_mut(ptr.add(i * self.data_size), self.data_size);
                ctor(slot);
            }
        }
        self.slabs[idx].addr = Some(ptr);
        self.stats.nslabs += 1;
        Ok(())
    }

    unsafe fn unback_slab(&mut self, idx: usize) {
        let Some(ptr) = self.slabs[idx].addr.take() else {
            return;
        };
        if let Some(dtor) = self.dtor {
            for i in 0..self.bitmap_count {
                let slot = core::slice::from_raw_parts_mut(ptr.add(i * self.data_size), self.data_size);
                dtor(slot);
            }
        }
        dealloc(ptr, self.slab_layout());
        self.stats.nslabs -= 1;
    }

    /// Recomputes `first_free` after a bit was set, moving the slab to
    /// FULL if no clear bit remains (spec §8 "a slab that exactly fills
    /// its last slot transitions to FULL, not back to PARTIAL").
    fn update_first_free(&mut self, idx: usize) {
        let bitmap_count = self.bitmap_count;
        let slab = &mut self.slabs[idx];
        for bit in 0..bitmap_count {
            if !slab.bit_get(bit) {
                slab.first_free = bit;
                return;
            }
        }
        slab.first_free = bitmap_count;
        slab.state = SlabState::Full;
        self.partial.retain(|&i| i != idx);
        self.full.push_back(idx);
    }

    /// Moves a slab whose bitmap just went fully clear to EMPTY, keeping
    /// at most one already-backed "warm" empty slab to reduce thrashing
    /// (spec §3 "one slab may remain as a hot empty").
    fn check_free_slab(&mut self, idx: usize) {
        if self.slabs[idx].state == SlabState::Full {
            self.full.retain(|&i| i != idx);
            self.slabs[idx].state = SlabState::Partial;
            self.partial.push_front(idx);
            return;
        }
        if !self.slabs[idx].all_clear() {
            return;
        }
        self.partial.retain(|&i| i != idx);
        self.slabs[idx].state = SlabState::Empty;
        let already_warm = self
            .empty
            .front()
            .map_or(false, |&i| self.slabs[i].addr.is_some());
        if already_warm {
            unsafe { self.unback_slab(idx) };
            self.empty.push_back(idx);
        } else {
            self.empty.push_front(idx);
        }
    }

    fn get_free_block(&mut self) -> Result<Option<*mut u8>, SlabError> {
        if let Some(&idx) = self.partial.front() {
            let slab = &mut self.slabs[idx];
            let slot = slab.first_free;
            slab.bit_set(slot);
            let addr = unsafe { slab.addr.unwrap().add(slot * self.data_size) };
            self.update_first_free(idx);
            return Ok(Some(addr));
        }

        let idx = if let Some(&idx) = self.empty.front() {
            idx
        } else {
            let idx = self.slabs.len();
            self.slabs.push(Slab::new(self.bitmap_words));
            self.empty.push_back(idx);
            idx
        };

        unsafe { self.back_slab(idx)? };
        self.empty.retain(|&i| i != idx);
        let slab = &mut self.slabs[idx];
        slab.bit_set(0);
        slab.first_free = 1;
        slab.state = SlabState::Partial;
        self.partial.push_front(idx);
        Ok(Some(unsafe { slab.addr.unwrap() }))
    }

    /// Allocates one object (spec §4.4 `sma_alloc`). `zero` mirrors the
    /// original's `M_ZERO` flag.
    pub fn alloc(&mut self, zero: bool) -> Result<*mut u8, SlabError> {
        let addr = self
            .get_free_block()?
            .ok_or(SlabError::OutOfMemory)?;
        self.stats.nalloc += 1;
        self.stats.ncurrent += 1;
        if zero {
            unsafe { core::ptr::write_bytes(addr, 0, self.data_size) };
        }
        Ok(addr)
    }

    fn find_slab(&self, ptr: *mut u8) -> Option<(usize, usize)> {
        self.slabs.iter().enumerate().find_map(|(idx, slab)| {
            let base = slab.addr?;
            let offset = (ptr as usize).checked_sub(base as usize)?;
            if offset % self.data_size != 0 {
                return None;
            }
            let item = offset / self.data_size;
            (item < self.bitmap_count).then_some((idx, item))
        })
    }

    /// Releases one object back to its slab (spec §4.4 `sma_free`).
    pub fn free(&mut self, ptr: *mut u8) -> Result<(), SlabError> {
        let (idx, item) = self.find_slab(ptr).ok_or(SlabError::InvalidPointer)?;
        if !self.slabs[idx].bit_get(item) {
            return Err(SlabError::DoubleFree);
        }
        self.slabs[idx].bit_clear(item);
        if item < self.slabs[idx].first_free {
            self.slabs[idx].first_free = item;
        }
        self.check_free_slab(idx);
        self.stats.nfree += 1;
        self.stats.ncurrent -= 1;
        Ok(())
    }

    /// Whether `ptr` was allocated from this cache (`sma_own`).
    pub fn owns(&self, ptr: *mut u8) -> bool {
        self.find_slab(ptr).is_some()
    }
}

/// Moves one object from `src` to `dst`, copying the overlapping prefix
/// and zeroing any extra bytes in the (larger) destination when `zero` is
/// set (spec §8 scenario 3). The source slot is released exactly as
/// `Cache::free` would, without re-validating the pointer a second time.
pub fn move_object(
    dst: &Mutex<Cache>,
    src: &Mutex<Cache>,
    ptr: *mut u8,
    zero: bool,
) -> Result<*mut u8, SlabError> {
    let mut src_guard = src.lock();
    let (idx, item) = src_guard.find_slab(ptr).ok_or(SlabError::InvalidPointer)?;
    if !src_guard.slabs[idx].bit_get(item) {
        return Err(SlabError::DoubleFree);
    }

    let mut dst_guard = dst.lock();
    let new_addr = dst_guard.alloc(false)?;
    let copy_len = src_guard.data_size.min(dst_guard.data_size);
    unsafe {
        core::ptr::copy_nonoverlapping(ptr, new_addr, copy_len);
        if zero && dst_guard.data_size > copy_len {
            core::ptr::write_bytes(new_addr.add(copy_len), 0, dst_guard.data_size - copy_len);
        }
    }
    drop(dst_guard);

    src_guard.slabs[idx].bit_clear(item);
    if item < src_guard.slabs[idx].first_free {
        src_guard.slabs[idx].first_free = item;
    }
    src_guard.check_free_slab(idx);
    src_guard.stats.nfree += 1;
    src_guard.stats.ncurrent -= 1;

    Ok(new_addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_cycle_restores_empty_state() {
        let mut cache = Cache::new("test64", 64, None, None);
        let a = cache.alloc(false).unwrap();
        assert_eq!(cache.stats().ncurrent, 1);
        cache.free(a).unwrap();
        assert_eq!(cache.stats().ncurrent, 0);
        assert!(cache.empty.contains(&0));
    }

    #[test]
    fn double_free_detected() {
        let mut cache = Cache::new("test64", 64, None, None);
        let a = cache.alloc(false).unwrap();
        cache.free(a).unwrap();
        assert_eq!(cache.free(a), Err(SlabError::DoubleFree));
    }

    #[test]
    fn filling_every_slot_transitions_to_full() {
        let mut cache = Cache::new("test-small", PAGE_SIZE / BITMAP_MIN_SIZE, None, None);
        let count = cache.bitmap_count;
        let mut ptrs = Vec::new();
        for _ in 0..count {
            ptrs.push(cache.alloc(false).unwrap());
        }
        assert_eq!(cache.full.len(), 1);
        assert!(cache.partial.is_empty());
        cache.free(ptrs[0]).unwrap();
        assert_eq!(cache.partial.len(), 1);
    }

    #[test]
    fn move_between_caches_copies_prefix_and_zero_pads() {
        let cache64 = Mutex::new(Cache::new("c64", 64, None, None));
        let cache96 = Mutex::new(Cache::new("c96", 96, None, None));
        let src_ptr = cache64.lock().alloc(false).unwrap();
        unsafe { core::ptr::write_bytes(src_ptr, 0xA5, 64) };

        let dst_ptr = move_object(&cache96, &cache64, src_ptr, true).unwrap();
        let dst_bytes = unsafe { core::slice::from_raw_parts(dst_ptr, 96) };
        assert!(dst_bytes[..64].iter().all(|&b| b == 0xA5));
        assert!(dst_bytes[64..].iter().all(|&b| b == 0));
        assert_eq!(cache64.lock().stats().ncurrent, 0);
        assert_eq!(cache96.lock().stats().ncurrent, 1);
    }
}
