//! Error types for the virtualiser core.
//!
//! Split the way the failure modes themselves are split (§7): discovery
//! failures are a startup-time concern with their own recovery story,
//! validation failures are a per-request client fault that always maps
//! to one wire status, and [`Error`] covers everything else (resource
//! exhaustion and protocol-invariant violations).

use thiserror::Error;

/// Why MBR discovery did not reach `Ready` (§4.4, §7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// Sector 0 didn't carry the MBR signature.
    #[error("MBR signature is invalid")]
    BadSignature,
    /// A non-empty partition's `lba_start` isn't a multiple of the
    /// transfer-unit-to-sector ratio.
    #[error("partition {index} starts at an unaligned sector")]
    UnalignedPartition { index: usize },
    /// Fewer partitions exist on the disk than there are clients to
    /// assign them to.
    #[error("disk has fewer partitions than configured clients")]
    NotEnoughPartitions,
    /// A client's configured partition mapping names a partition that
    /// doesn't exist.
    #[error("client {client} is mapped to nonexistent partition {partition}")]
    BadMapping { client: usize, partition: usize },
    /// The driver returned a non-OK status for the sector-0 read.
    #[error("driver failed to read sector 0")]
    DriverReadFailed,
}

/// Why one client request was rejected (§7.1); always surfaced to the
/// client as `Status::InvalidParam`, never propagated further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The request's block range falls outside the client's
    /// partition, or overflows.
    #[error("request from client {client} is out of bounds")]
    OutOfBounds { client: usize },
    /// The request's data-region offset isn't transfer-unit aligned,
    /// or the transfer doesn't fit inside the client's data region.
    #[error("request from client {client} has an invalid data offset")]
    BadOffset { client: usize },
    /// The request names zero blocks.
    #[error("request from client {client} has a zero block count")]
    ZeroCount { client: usize },
    /// The request's opcode byte doesn't decode to a known code.
    #[error("request from client {client} has an unknown request code")]
    UnknownCode { client: usize },
}

/// Everything else: resource exhaustion the caller can retry after,
/// and protocol-invariant violations that indicate a bookkeeping bug
/// rather than an expected runtime condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("bounce pool exhausted")]
    BounceExhausted,
    #[error("bookkeeping table exhausted")]
    BookkeepingExhausted,
    #[error("driver request ring is full")]
    DriverQueueFull,
    #[error("client index {0} is not configured")]
    UnknownClient(usize),
    #[error("driver response id {0} has no bookkeeping entry")]
    UnknownResponseId(u32),
}

impl From<bounce_pool::Error> for Error {
    fn from(_: bounce_pool::Error) -> Self {
        Self::BounceExhausted
    }
}

impl From<ialloc::Error> for Error {
    fn from(_: ialloc::Error) -> Self {
        Self::BookkeepingExhausted
    }
}

impl From<blk_queue::Error> for Error {
    fn from(_: blk_queue::Error) -> Self {
        Self::DriverQueueFull
    }
}
