//! MS-DOS Master Boot Record layout and partition-table parsing.

use dataview::{Pod, PodMethods as _};

use crate::error::DiscoveryError;

pub const SECTOR_SIZE: usize = 512;
pub const SIGNATURE: [u8; 2] = [0x55, 0xAA];
pub const MAX_PRIMARY_PARTITIONS: usize = 4;
const PARTITION_TABLE_OFFSET: usize = 446;
const SIGNATURE_OFFSET: usize = 510;

/// One of the four primary partition table entries.
///
/// Packed to match the on-disk layout exactly (`lba_start`/`sectors`
/// sit at byte offsets the natural `u32` alignment wouldn't honour),
/// matching the C `struct msdos_mbr`'s own `__attribute__((packed))`.
#[derive(Debug, Clone, Copy, Pod)]
#[repr(C, packed)]
pub struct PartitionEntry {
    pub status: u8,
    pub chs_start: [u8; 3],
    pub partition_type: u8,
    pub chs_end: [u8; 3],
    pub lba_start: u32,
    pub sectors: u32,
}

impl PartitionEntry {
    const TYPE_EMPTY: u8 = 0x00;

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partition_type == Self::TYPE_EMPTY
    }
}

/// The 512-byte sector-0 record as read off the device.
///
/// Packed for the same reason as [`PartitionEntry`]: an unpacked
/// `repr(C)` layout would align the partition table to a 4-byte
/// boundary (offset 448, not 446) and pad the struct past 512 bytes.
#[derive(Debug, Clone, Copy, Pod)]
#[repr(C, packed)]
pub struct Mbr {
    _bootstrap_and_disk_id: [u8; PARTITION_TABLE_OFFSET],
    pub partitions: [PartitionEntry; MAX_PRIMARY_PARTITIONS],
    pub signature: [u8; 2],
}

const _: () = assert!(size_of::<Mbr>() == SECTOR_SIZE);

impl Mbr {
    /// Reinterprets a 512-byte sector-0 read as an MBR record.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::BadSignature`] if `bytes` isn't
    /// exactly one sector.
    pub fn parse(bytes: &[u8]) -> Result<Self, DiscoveryError> {
        if bytes.len() != SECTOR_SIZE {
            return Err(DiscoveryError::BadSignature);
        }
        let mut mbr = Self::zeroed();
        mbr.as_bytes_mut().copy_from_slice(bytes);
        Ok(mbr)
    }

    #[must_use]
    pub fn has_valid_signature(&self) -> bool {
        self.signature == SIGNATURE
    }

    fn zeroed() -> Self {
        Self {
            _bootstrap_and_disk_id: [0; PARTITION_TABLE_OFFSET],
            partitions: [PartitionEntry {
                status: 0,
                chs_start: [0; 3],
                partition_type: 0,
                chs_end: [0; 3],
                lba_start: 0,
                sectors: 0,
            }; MAX_PRIMARY_PARTITIONS],
            signature: [0; 2],
        }
    }
}

/// `(start_sector, sectors)` for every non-empty partition, in table
/// order, both expressed in device-native sectors.
#[derive(Debug, Clone, Copy)]
pub struct PartitionSlice {
    pub start_sector: u32,
    pub sectors: u32,
}

/// Parses and validates the partition table, returning the non-empty
/// partitions in table order.
///
/// # Errors
///
/// Returns [`DiscoveryError::BadSignature`] if the signature doesn't
/// match, or [`DiscoveryError::UnalignedPartition`] if any non-empty
/// partition's `lba_start` isn't a multiple of `sectors_per_transfer`.
pub fn valid_partitions(
    mbr: &Mbr,
    sectors_per_transfer: u32,
) -> Result<alloc::vec::Vec<PartitionSlice>, DiscoveryError> {
    if !mbr.has_valid_signature() {
        return Err(DiscoveryError::BadSignature);
    }

    let mut partitions = alloc::vec::Vec::new();
    for (index, entry) in mbr.partitions.iter().enumerate() {
        if entry.is_empty() {
            continue;
        }
        // Copy out of the packed entry before use; `lba_start`/`sectors`
        // may not sit at a 4-byte-aligned offset.
        let start_sector = entry.lba_start;
        let sectors = entry.sectors;
        if start_sector % sectors_per_transfer != 0 {
            return Err(DiscoveryError::UnalignedPartition { index });
        }
        partitions.push(PartitionSlice { start_sector, sectors });
    }
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector_bytes(partitions: &[(u8, u32, u32)], signature: [u8; 2]) -> [u8; SECTOR_SIZE] {
        let mut bytes = [0u8; SECTOR_SIZE];
        for (i, &(ty, lba_start, sectors)) in partitions.iter().enumerate() {
            let off = PARTITION_TABLE_OFFSET + i * 16;
            bytes[off + 4] = ty;
            bytes[off + 8..off + 12].copy_from_slice(&lba_start.to_le_bytes());
            bytes[off + 12..off + 16].copy_from_slice(&sectors.to_le_bytes());
        }
        bytes[SIGNATURE_OFFSET..SIGNATURE_OFFSET + 2].copy_from_slice(&signature);
        bytes
    }

    #[test]
    fn rejects_bad_signature() {
        let bytes = sector_bytes(&[(0x83, 2048, 2048)], [0, 0]);
        let mbr = Mbr::parse(&bytes).unwrap();
        assert_eq!(
            valid_partitions(&mbr, 8).unwrap_err(),
            DiscoveryError::BadSignature
        );
    }

    #[test]
    fn accepts_aligned_partition() {
        let bytes = sector_bytes(&[(0x83, 2048, 2048)], SIGNATURE);
        let mbr = Mbr::parse(&bytes).unwrap();
        let parts = valid_partitions(&mbr, 8).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].start_sector, 2048);
        assert_eq!(parts[0].sectors, 2048);
    }

    #[test]
    fn rejects_unaligned_partition() {
        let bytes = sector_bytes(&[(0x83, 2049, 2048)], SIGNATURE);
        let mbr = Mbr::parse(&bytes).unwrap();
        assert_eq!(
            valid_partitions(&mbr, 8).unwrap_err(),
            DiscoveryError::UnalignedPartition { index: 0 }
        );
    }

    #[test]
    fn empty_entries_are_skipped() {
        let bytes = sector_bytes(&[(0x00, 0, 0), (0x83, 2048, 2048)], SIGNATURE);
        let mbr = Mbr::parse(&bytes).unwrap();
        let parts = valid_partitions(&mbr, 8).unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn rejects_wrong_length_buffer() {
        assert_eq!(Mbr::parse(&[0u8; 10]).unwrap_err(), DiscoveryError::BadSignature);
    }
}
