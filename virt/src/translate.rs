//! Per-client descriptor and client-block → driver-block translation.

use crate::error::ValidationError;

/// Per-client partition assignment, in device-native sectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientDescriptor {
    pub start_sector: u32,
    pub sectors: u32,
}

impl ClientDescriptor {
    #[must_use]
    pub fn capacity(&self, sectors_per_transfer: u32) -> u64 {
        u64::from(self.sectors / sectors_per_transfer)
    }

    /// Translates a client-relative transfer-unit block number and
    /// count into a driver-relative transfer-unit block number.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::OutOfBounds`] if the request overflows or
    /// falls outside the client's partition.
    pub fn translate(
        &self,
        client: usize,
        cli_block: u32,
        cli_count: u16,
        sectors_per_transfer: u32,
    ) -> Result<u32, ValidationError> {
        let start = self.start_sector / sectors_per_transfer;
        let size = self.sectors / sectors_per_transfer;

        let drv_block = cli_block
            .checked_add(start)
            .ok_or(ValidationError::OutOfBounds { client })?;
        let end = drv_block
            .checked_add(u32::from(cli_count))
            .ok_or(ValidationError::OutOfBounds { client })?;

        if drv_block < start || end > start + size {
            return Err(ValidationError::OutOfBounds { client });
        }

        Ok(drv_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientDescriptor {
        ClientDescriptor {
            start_sector: 2048,
            sectors: 2048,
        }
    }

    #[test]
    fn capacity_in_transfer_units() {
        assert_eq!(client().capacity(8), 256);
    }

    #[test]
    fn in_bounds_request_translates() {
        assert_eq!(client().translate(0, 0, 1, 8).unwrap(), 256);
    }

    #[test]
    fn request_at_exact_capacity_boundary_accepted() {
        assert_eq!(client().translate(0, 255, 1, 8).unwrap(), 511);
    }

    #[test]
    fn request_one_past_capacity_rejected() {
        assert_eq!(
            client().translate(0, 256, 1, 8).unwrap_err(),
            ValidationError::OutOfBounds { client: 0 }
        );
    }

    #[test]
    fn overflowing_block_number_rejected() {
        assert_eq!(
            client().translate(0, u32::MAX, 1, 8).unwrap_err(),
            ValidationError::OutOfBounds { client: 0 }
        );
    }
}
