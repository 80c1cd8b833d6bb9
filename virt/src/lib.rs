//! Block virtualiser: multiplexes a single block driver across a
//! fixed number of mutually untrusting client partitions.
//!
//! Each client sees a private virtual disk carved out of one MBR
//! partition (§4.4), addressed in fixed-size transfer units (§3). The
//! core never touches the driver itself, the host's IPC primitives, or
//! the shared-memory mapping that backs each queue and data region —
//! all three are the host's job; this crate owns the policy that sits
//! between them: [`state::VirtState`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod channel;
pub mod config;
pub mod dma;
pub mod error;
pub mod mbr;
pub mod state;
pub mod storage_info;
pub mod translate;

pub use channel::{DriverInfo, Event, Notifier};
pub use config::Config;
pub use error::{DiscoveryError, Error, ValidationError};
pub use state::{VirtState, VirtStatus};
