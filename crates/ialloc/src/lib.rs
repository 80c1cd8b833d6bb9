//! Bounded index allocator.
//!
//! Hands out small integer IDs from `[0, capacity)` for correlating an
//! in-flight request with its eventual response. A free-list, not a
//! bitmap: allocation and free are both O(1), and double-free is
//! detected instead of silently corrupting the pool.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::vec::Vec;

/// Errors returned by [`IndexAllocator`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No IDs are currently available.
    #[error("index allocator is exhausted")]
    Full,
    /// The given ID is already free; freeing it again would corrupt
    /// the free-list.
    #[error("double free of index {0}")]
    DoubleFree(u32),
}

/// A free-list allocator over `[0, capacity)`.
#[derive(Debug)]
pub struct IndexAllocator {
    /// IDs not currently in use, in arbitrary order.
    free: Vec<u32>,
    /// Whether index `i` is present in `free`, kept in parallel so
    /// double-free can be detected in O(1) instead of scanning.
    is_free: Vec<bool>,
}

impl IndexAllocator {
    /// Creates an allocator over `[0, capacity)`, all IDs initially
    /// free.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            free: (0..capacity).rev().collect(),
            is_free: alloc::vec![true; capacity as usize],
        }
    }

    /// Total number of IDs the allocator manages.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.is_free.len()
    }

    /// Allocates the next free ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Full`] if every ID is currently allocated.
    pub fn alloc(&mut self) -> Result<u32, Error> {
        let id = self.free.pop().ok_or(Error::Full)?;
        self.is_free[id as usize] = false;
        Ok(id)
    }

    /// Returns `id` to the free pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DoubleFree`] if `id` is already free — this is
    /// a programming-fault signal, never an expected outcome.
    pub fn free(&mut self, id: u32) -> Result<(), Error> {
        let slot = self
            .is_free
            .get_mut(id as usize)
            .ok_or(Error::DoubleFree(id))?;
        if *slot {
            return Err(Error::DoubleFree(id));
        }
        *slot = true;
        self.free.push(id);
        Ok(())
    }

    /// Returns `true` iff no IDs are available, i.e. `alloc` would
    /// fail.
    #[must_use]
    pub fn full(&self) -> bool {
        self.free.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_restores_state() {
        let mut a = IndexAllocator::new(4);
        let id = a.alloc().unwrap();
        a.free(id).unwrap();
        assert!(!a.full());
        assert_eq!(a.capacity(), 4);
    }

    #[test]
    fn exhaustion_reports_full() {
        let mut a = IndexAllocator::new(2);
        a.alloc().unwrap();
        a.alloc().unwrap();
        assert!(a.full());
        assert_eq!(a.alloc(), Err(Error::Full));
    }

    #[test]
    fn double_free_is_detected() {
        let mut a = IndexAllocator::new(2);
        let id = a.alloc().unwrap();
        a.free(id).unwrap();
        assert_eq!(a.free(id), Err(Error::DoubleFree(id)));
    }

    #[test]
    fn free_of_out_of_range_id_is_reported() {
        let mut a = IndexAllocator::new(2);
        assert_eq!(a.free(5), Err(Error::DoubleFree(5)));
    }

    #[test]
    fn ids_are_reused_after_free() {
        let mut a = IndexAllocator::new(1);
        let id1 = a.alloc().unwrap();
        a.free(id1).unwrap();
        let id2 = a.alloc().unwrap();
        assert_eq!(id1, id2);
    }
}
