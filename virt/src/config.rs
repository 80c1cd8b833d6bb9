//! Compile-time configuration, modelled as a value the host builds
//! once at startup rather than as `const`s baked into this crate — see
//! `SPEC_FULL.md` §13.

use alloc::vec::Vec;

/// Static configuration for one virtualiser instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of client protection domains.
    pub num_clients: usize,
    /// `mapping[i]` is the MBR partition index assigned to client `i`.
    pub mapping: Vec<usize>,
    /// Transfer unit size in bytes; must be a power of two and a
    /// multiple of `sector_size`.
    pub transfer_size: u32,
    /// Device sector size in bytes.
    pub sector_size: u32,
    /// Depth of the driver request/response rings.
    pub blk_queue_size_driv: usize,
    /// Size in bytes of the driver-side DMA data region the bounce
    /// pool is carved out of.
    pub blk_data_region_size_driv: usize,
}

impl Config {
    /// Sectors per transfer unit (`R` in `spec.md` §4.4/§4.5).
    #[must_use]
    pub fn sectors_per_transfer(&self) -> u32 {
        self.transfer_size / self.sector_size
    }

    /// Number of fixed-size bounce buffers the driver data region
    /// holds.
    #[must_use]
    pub fn num_buffers_driv(&self) -> usize {
        self.blk_data_region_size_driv / self.transfer_size as usize
    }

    /// Size of the request-bookkeeping table; equal to the driver
    /// queue depth, since at most one bookkeeping entry exists per
    /// outstanding driver request.
    #[must_use]
    pub fn reqbk_size(&self) -> usize {
        self.blk_queue_size_driv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            num_clients: 1,
            mapping: alloc::vec![0],
            transfer_size: 4096,
            sector_size: 512,
            blk_queue_size_driv: 4,
            blk_data_region_size_driv: 4 * 4096,
        }
    }

    #[test]
    fn derived_quantities() {
        let c = config();
        assert_eq!(c.sectors_per_transfer(), 8);
        assert_eq!(c.num_buffers_driv(), 4);
        assert_eq!(c.reqbk_size(), 4);
    }
}
