//! Fixed-size bounce-buffer pool for DMA-capable transfers.
//!
//! Allocates contiguous runs of fixed-size buffers out of a single
//! backing region. Every allocation has the same granularity, so
//! fragmentation only ever costs whole buffers, never partial ones.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

/// Errors returned by [`BouncePool`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No run of the requested length is currently free.
    #[error("bounce pool has no free run of the requested length")]
    Full,
}

/// A bit-per-buffer free mask over a fixed backing region.
///
/// `base` and `buffer_size` describe the byte address of buffer 0 and
/// the stride between buffers; `alloc`/`free` deal in that address
/// space so callers never have to convert indices themselves.
#[derive(Debug)]
pub struct BouncePool {
    base: usize,
    buffer_size: usize,
    /// `free[i]` is `true` iff buffer `i` is not currently allocated.
    free: Vec<bool>,
}

impl BouncePool {
    /// Creates a pool of `num_buffers` buffers of `buffer_size` bytes
    /// each, starting at `base`. All buffers start free.
    #[must_use]
    pub fn new(base: usize, buffer_size: usize, num_buffers: usize) -> Self {
        Self {
            base,
            buffer_size,
            free: vec![true; num_buffers],
        }
    }

    /// Total number of buffers the pool manages.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.free.len()
    }

    /// Finds `count` contiguous free buffers starting at the lowest
    /// free index, marks them used, and returns the base address of
    /// the run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Full`] if no such run exists. `count == 0`
    /// trivially succeeds, returning `base`.
    pub fn alloc(&mut self, count: usize) -> Result<usize, Error> {
        let idx = self.find_free_run(count).ok_or(Error::Full)?;
        for slot in &mut self.free[idx..idx + count] {
            *slot = false;
        }
        Ok(self.base + idx * self.buffer_size)
    }

    /// Marks `count` buffers starting at `addr` free again.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not buffer-aligned or the range falls
    /// outside the pool — both indicate a bookkeeping bug in the
    /// caller, never a condition a correct caller can hit.
    pub fn free(&mut self, addr: usize, count: usize) {
        let offset = addr.checked_sub(self.base).expect("address before pool base");
        assert!(offset % self.buffer_size == 0, "unaligned bounce buffer address");
        let idx = offset / self.buffer_size;
        assert!(idx + count <= self.free.len(), "bounce buffer range out of bounds");
        for slot in &mut self.free[idx..idx + count] {
            assert!(!*slot, "double free of bounce buffer");
            *slot = true;
        }
    }

    /// Returns `true` iff no run of `count` contiguous free buffers
    /// exists (equivalently, iff `alloc(count)` would fail).
    #[must_use]
    pub fn full(&self, count: usize) -> bool {
        self.find_free_run(count).is_none()
    }

    fn find_free_run(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return Some(0);
        }
        if count > self.free.len() {
            return None;
        }
        let mut run = 0;
        for (i, &is_free) in self.free.iter().enumerate() {
            if is_free {
                run += 1;
                if run == count {
                    return Some(i + 1 - count);
                }
            } else {
                run = 0;
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_base_relative_address() {
        let mut pool = BouncePool::new(0x1000, 0x100, 4);
        let addr = pool.alloc(2).unwrap();
        assert_eq!(addr, 0x1000);
    }

    #[test]
    fn alloc_finds_lowest_contiguous_run() {
        let mut pool = BouncePool::new(0, 0x100, 4);
        let first = pool.alloc(1).unwrap();
        pool.alloc(1).unwrap();
        pool.free(first, 1);
        // buffer 0 is free again; a fresh single-buffer alloc reuses it.
        let reused = pool.alloc(1).unwrap();
        assert_eq!(reused, 0);
    }

    #[test]
    fn alloc_requires_contiguity() {
        let mut pool = BouncePool::new(0, 0x100, 4);
        let a = pool.alloc(1).unwrap();
        let _b = pool.alloc(1).unwrap();
        let c = pool.alloc(1).unwrap();
        pool.free(a, 1);
        pool.free(c, 1);
        // buffers 0 and 2 are free but not contiguous; a run of 2 fails.
        assert_eq!(pool.alloc(2), Err(Error::Full));
    }

    #[test]
    fn full_matches_alloc_feasibility() {
        let mut pool = BouncePool::new(0, 0x100, 4);
        assert!(!pool.full(4));
        pool.alloc(4).unwrap();
        assert!(pool.full(1));
    }

    #[test]
    fn exact_capacity_then_stall() {
        let mut pool = BouncePool::new(0, 0x100, 4);
        for _ in 0..4 {
            pool.alloc(1).unwrap();
        }
        assert_eq!(pool.alloc(1), Err(Error::Full));
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut pool = BouncePool::new(0, 0x100, 2);
        let addr = pool.alloc(1).unwrap();
        pool.free(addr, 1);
        pool.free(addr, 1);
    }
}
