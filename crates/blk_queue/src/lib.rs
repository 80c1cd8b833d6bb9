//! Request/response queue pair shared between the virtualiser and one
//! side of the system (either the driver or a client).
//!
//! Each direction is a single-producer/single-consumer ring: the
//! producer writes a slot and then releases the head index; the
//! consumer acquires the head index before reading the slot it
//! guards. Cross-queue ordering is never promised — only ordering
//! within one ring.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use strum::FromRepr;

/// Errors returned by ring and queue-pair operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The ring has no free slot.
    #[error("queue is full")]
    Full,
    /// The ring has nothing to dequeue.
    #[error("queue is empty")]
    Empty,
}

/// The operation a [`Request`] asks for.
///
/// Decoded from the wire with [`Code::from_repr`]; a byte matching no
/// variant is an unknown request code (§4.6), not a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Code {
    Read = 0,
    Write = 1,
    Flush = 2,
    Barrier = 3,
}

/// Outcome of a completed request.
///
/// `IoError` preserves the driver's own status byte so it can be
/// passed through to the client untransformed (§4.6, §7.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    InvalidParam,
    IoError(u8),
}

/// A request descriptor, as carried by a request ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub code: u8,
    /// Client-local byte offset (client→virt direction) or the
    /// driver-physical address of a bounce buffer (virt→driver
    /// direction); which one applies depends on which ring this
    /// descriptor sits on.
    pub addr: u64,
    pub block_number: u32,
    pub count: u16,
    pub id: u32,
}

/// A response descriptor, as carried by a response ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub success_count: u16,
    pub id: u32,
}

/// A single-producer/single-consumer ring of fixed capacity.
#[derive(Debug)]
struct Ring<T> {
    slots: Vec<Option<T>>,
    /// Number of items ever produced.
    head: AtomicUsize,
    /// Number of items ever consumed.
    tail: AtomicUsize,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Acquire)
    }

    fn is_full(&self) -> bool {
        self.head.load(Ordering::Acquire) - self.tail.load(Ordering::Acquire) == self.capacity()
    }

    fn enqueue(&mut self, item: T) -> Result<(), Error> {
        if self.is_full() {
            return Err(Error::Full);
        }
        let head = self.head.load(Ordering::Relaxed);
        let cap = self.capacity();
        self.slots[head % cap] = Some(item);
        // Payload write happens-before this release; the consumer's
        // matching acquire load of `head` is what makes that visible.
        self.head.store(head + 1, Ordering::Release);
        Ok(())
    }

    fn dequeue(&mut self) -> Result<T, Error> {
        if self.is_empty() {
            return Err(Error::Empty);
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let cap = self.capacity();
        let item = self.slots[tail % cap].take().expect("slot within live range must be occupied");
        self.tail.store(tail + 1, Ordering::Release);
        Ok(item)
    }
}

impl<T: Copy> Ring<T> {
    /// Reads the next item without consuming it.
    fn peek(&self) -> Result<T, Error> {
        if self.is_empty() {
            return Err(Error::Empty);
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let cap = self.capacity();
        Ok(self.slots[tail % cap].expect("slot within live range must be occupied"))
    }
}

/// A request ring paired with a response ring, plus the doorbell
/// hand-shake a producer uses to ask to be woken when the consumer
/// drains its queue.
#[derive(Debug)]
pub struct QueuePair {
    req: Ring<Request>,
    resp: Ring<Response>,
    signal_wanted: core::sync::atomic::AtomicBool,
}

impl QueuePair {
    #[must_use]
    pub fn new(req_capacity: usize, resp_capacity: usize) -> Self {
        Self {
            req: Ring::new(req_capacity),
            resp: Ring::new(resp_capacity),
            signal_wanted: core::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn enqueue_req(&mut self, req: Request) -> Result<(), Error> {
        self.req.enqueue(req)
    }

    pub fn dequeue_req(&mut self) -> Result<Request, Error> {
        self.req.dequeue()
    }

    /// Reads the next client request without removing it from the
    /// ring, so the caller can decide whether to admit it before
    /// committing to a dequeue (§4.6 back-pressure: a stalled request
    /// must stay at the head of its queue, not be dropped).
    pub fn peek_req(&self) -> Result<Request, Error> {
        self.req.peek()
    }

    pub fn enqueue_resp(&mut self, resp: Response) -> Result<(), Error> {
        self.resp.enqueue(resp)
    }

    pub fn dequeue_resp(&mut self) -> Result<Response, Error> {
        self.resp.dequeue()
    }

    #[must_use]
    pub fn empty_req(&self) -> bool {
        self.req.is_empty()
    }

    #[must_use]
    pub fn empty_resp(&self) -> bool {
        self.resp.is_empty()
    }

    #[must_use]
    pub fn full_req(&self) -> bool {
        self.req.is_full()
    }

    #[must_use]
    pub fn full_resp(&self) -> bool {
        self.resp.is_full()
    }

    /// Asks to be notified the next time the consumer drains this
    /// queue pair.
    pub fn request_signal(&self) {
        self.signal_wanted.store(true, Ordering::Release);
    }

    /// Withdraws a previous [`QueuePair::request_signal`].
    pub fn cancel_signal(&self) {
        self.signal_wanted.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn signal_wanted(&self) -> bool {
        self.signal_wanted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(id: u32) -> Request {
        Request {
            code: Code::Read as u8,
            addr: 0,
            block_number: 0,
            count: 1,
            id,
        }
    }

    #[test]
    fn fifo_ordering_within_one_ring() {
        let mut q = QueuePair::new(4, 4);
        q.enqueue_req(req(1)).unwrap();
        q.enqueue_req(req(2)).unwrap();
        assert_eq!(q.dequeue_req().unwrap().id, 1);
        assert_eq!(q.dequeue_req().unwrap().id, 2);
    }

    #[test]
    fn full_and_empty_track_capacity() {
        let mut q = QueuePair::new(2, 2);
        assert!(q.empty_req());
        q.enqueue_req(req(1)).unwrap();
        q.enqueue_req(req(2)).unwrap();
        assert!(q.full_req());
        assert_eq!(q.enqueue_req(req(3)), Err(Error::Full));
        q.dequeue_req().unwrap();
        q.dequeue_req().unwrap();
        assert!(q.empty_req());
        assert_eq!(q.dequeue_req().err(), Some(Error::Empty));
    }

    #[test]
    fn signal_wanted_round_trips() {
        let q = QueuePair::new(1, 1);
        assert!(!q.signal_wanted());
        q.request_signal();
        assert!(q.signal_wanted());
        q.cancel_signal();
        assert!(!q.signal_wanted());
    }

    #[test]
    fn code_from_repr_rejects_unknown_bytes() {
        assert_eq!(Code::from_repr(0), Some(Code::Read));
        assert_eq!(Code::from_repr(3), Some(Code::Barrier));
        assert_eq!(Code::from_repr(42), None);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut q = QueuePair::new(2, 2);
        q.enqueue_req(req(1)).unwrap();
        assert_eq!(q.peek_req().unwrap().id, 1);
        assert_eq!(q.peek_req().unwrap().id, 1);
        assert_eq!(q.dequeue_req().unwrap().id, 1);
    }

    #[test]
    fn wraps_correctly_after_many_cycles() {
        let mut q = QueuePair::new(2, 2);
        for i in 0..10 {
            q.enqueue_req(req(i)).unwrap();
            assert_eq!(q.dequeue_req().unwrap().id, i);
        }
    }
}
