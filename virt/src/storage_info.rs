//! Storage info descriptors published between the virtualiser and its
//! peers.
//!
//! `ready` carries the readiness handshake: the writer stores with
//! release ordering, the reader loads with acquire, so that a reader
//! observing `ready == true` also observes every write the producer
//! made before flipping it.

use core::sync::atomic::{AtomicBool, Ordering};

/// Storage parameters for one disk view: the driver's own disk, or one
/// client's carved-out partition.
#[derive(Debug)]
pub struct StorageInfo {
    pub sector_size: u32,
    pub capacity: u64,
    pub read_only: bool,
    ready: AtomicBool,
}

impl StorageInfo {
    #[must_use]
    pub fn new(sector_size: u32, capacity: u64, read_only: bool) -> Self {
        Self {
            sector_size,
            capacity,
            read_only,
            ready: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

impl Default for StorageInfo {
    fn default() -> Self {
        Self::new(0, 0, false)
    }
}
