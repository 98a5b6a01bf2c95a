//! NTFS boot sector.
//!
//! Only the fields needed to locate and size MFT records are interpreted; the
//! remaining fields are kept for display.

use binread::{BinRead, BinReaderExt};
use getset::{CopyGetters, Getters};
use std::io;

use super::ntfs_error::NtfsError;
use crate::constants::BOOT_SECTOR_SIZE;

/// OEM identifier every NTFS boot sector carries at byte 3.
pub const NTFS_SIGNATURE: &[u8; 8] = b"NTFS    ";

/// Largest MFT record size accepted from a boot sector.
pub const MAX_RECORD_SIZE: u32 = 64 * 1024;

#[derive(Debug, BinRead, Getters, CopyGetters)]
#[br(little)]
pub struct BootSector {
    _jmp_boot: [u8; 3],
    #[getset(get = "pub")]
    oem_id: [u8; 8],
    #[getset(get_copy = "pub")]
    bytes_per_sector: u16,
    #[getset(get_copy = "pub")]
    sectors_per_cluster: u8,
    _reserved_sectors: u16,
    _unused_0: [u8; 5],
    _media: u8,
    _unused_1: u16,
    _sectors_per_track: u16,
    _heads: u16,
    _hidden_sectors: u32,
    _unused_2: u32,
    _unused_3: u32,
    #[getset(get_copy = "pub")]
    total_sectors: u64,
    #[getset(get_copy = "pub")]
    mft_cluster: u64,
    #[getset(get_copy = "pub")]
    mft_mirror_cluster: u64,
    #[getset(get_copy = "pub")]
    clusters_per_record: i8,
    _pad_0: [u8; 3],
    _clusters_per_index: i8,
    _pad_1: [u8; 3],
    #[getset(get_copy = "pub")]
    serial: u64,
    #[getset(get_copy = "pub")]
    checksum: u32,
    #[br(count = 426)]
    _boot_code: Vec<u8>,
    _sig: u16,
}

/// Decodes the signed MFT record size byte.
///
/// A negative value `v` encodes `2^|v|` bytes; a positive value counts
/// kilobytes. Zero and sizes above [`MAX_RECORD_SIZE`] are invalid.
pub fn decode_record_size(raw: i8) -> Option<u32> {
    let size = match raw {
        0 => None,
        v if v < 0 => {
            let shift = v.unsigned_abs() as u32;
            1u32.checked_shl(shift).filter(|_| shift < 32)
        }
        v => (v as u32).checked_mul(1024),
    };
    size.filter(|size| *size <= MAX_RECORD_SIZE)
}

impl BootSector {
    /// Parses and checks a boot sector.
    ///
    /// # Errors
    /// - `NtfsError::InvalidBootSector` if the buffer is short, the signature is
    ///   missing or there are no sectors per cluster
    /// - `NtfsError::UnsupportedSectorSize` unless sectors are 512 or 4096 bytes
    /// - `NtfsError::InvalidRecordSize` if the record size byte is unusable
    /// - `NtfsError::InvalidBootSector` if the MFT lies beyond the 64-bit
    ///   address space
    pub fn from_bytes(buf: &[u8]) -> Result<Self, NtfsError> {
        if buf.len() < BOOT_SECTOR_SIZE {
            return Err(NtfsError::InvalidBootSector(format!(
                "short read: {} of {BOOT_SECTOR_SIZE} bytes",
                buf.len()
            )));
        }
        if &buf[3..11] != NTFS_SIGNATURE {
            return Err(NtfsError::InvalidBootSector(format!(
                "missing NTFS signature, found {:?}",
                String::from_utf8_lossy(&buf[3..11])
            )));
        }

        let boot: BootSector = io::Cursor::new(&buf[..BOOT_SECTOR_SIZE])
            .read_le()
            .map_err(|err| NtfsError::InvalidBootSector(err.to_string()))?;

        if boot.bytes_per_sector != 512 && boot.bytes_per_sector != 4096 {
            return Err(NtfsError::UnsupportedSectorSize(boot.bytes_per_sector));
        }
        if boot.sectors_per_cluster == 0 {
            return Err(NtfsError::InvalidBootSector(String::from("0 sectors per cluster")));
        }
        if decode_record_size(boot.clusters_per_record).is_none() {
            return Err(NtfsError::InvalidRecordSize(boot.clusters_per_record));
        }
        if boot.mft_cluster.checked_mul(boot.bytes_per_cluster()).is_none() {
            return Err(NtfsError::InvalidBootSector(format!(
                "MFT cluster {} is not addressable",
                boot.mft_cluster
            )));
        }

        Ok(boot)
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    /// Size of one MFT record in bytes.
    pub fn record_size(&self) -> u32 {
        decode_record_size(self.clusters_per_record).unwrap_or(1024)
    }

    /// Byte offset of the MFT from the partition start.
    pub fn mft_offset(&self) -> u64 {
        self.mft_cluster.saturating_mul(self.bytes_per_cluster())
    }

    /// Size of the volume in bytes, as declared.
    pub fn volume_bytes(&self) -> u64 {
        self.total_sectors.saturating_mul(self.bytes_per_sector as u64)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A 512-byte boot sector with 512-byte sectors, 1 sector per cluster.
    pub(crate) fn boot_sector(mft_cluster: u64, record_byte: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        buf[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
        buf[3..11].copy_from_slice(NTFS_SIGNATURE);
        buf[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
        buf[0x0D] = 1;
        buf[0x28..0x30].copy_from_slice(&4096u64.to_le_bytes());
        buf[0x30..0x38].copy_from_slice(&mft_cluster.to_le_bytes());
        buf[0x38..0x40].copy_from_slice(&2u64.to_le_bytes());
        buf[0x40] = record_byte;
        buf[0x48..0x50].copy_from_slice(&0x1234_5678_9ABC_DEF0u64.to_le_bytes());
        buf[510] = 0x55;
        buf[511] = 0xAA;
        buf
    }

    #[test]
    fn negative_record_byte_is_a_power_of_two() {
        assert_eq!(decode_record_size(0xF6u8 as i8), Some(1024));
        assert_eq!(decode_record_size(-12), Some(4096));
    }

    #[test]
    fn positive_record_byte_counts_kilobytes() {
        assert_eq!(decode_record_size(0x01), Some(1024));
        assert_eq!(decode_record_size(4), Some(4096));
        assert_eq!(decode_record_size(0), None);
        assert_eq!(decode_record_size(-40), None);
    }

    #[test]
    fn oversized_records_are_refused() {
        assert_eq!(decode_record_size(-16), Some(MAX_RECORD_SIZE));
        assert_eq!(decode_record_size(0xE1u8 as i8), None);
        assert_eq!(decode_record_size(65), None);
        assert!(matches!(
            BootSector::from_bytes(&boot_sector(16, 0xE1)),
            Err(NtfsError::InvalidRecordSize(_))
        ));
    }

    #[test]
    fn unaddressable_mft_is_refused() {
        assert!(matches!(
            BootSector::from_bytes(&boot_sector(u64::MAX / 2, 0xF6)),
            Err(NtfsError::InvalidBootSector(_))
        ));
        let far = BootSector::from_bytes(&boot_sector(u64::MAX / 1024, 0xF6)).unwrap();
        assert_eq!(far.mft_offset(), (u64::MAX / 1024) * 512);
    }

    #[test]
    fn parses_fields() {
        let boot = BootSector::from_bytes(&boot_sector(16, 0xF6)).unwrap();
        assert_eq!(boot.oem_id(), NTFS_SIGNATURE);
        assert_eq!(boot.bytes_per_sector(), 512);
        assert_eq!(boot.sectors_per_cluster(), 1);
        assert_eq!(boot.total_sectors(), 4096);
        assert_eq!(boot.mft_cluster(), 16);
        assert_eq!(boot.mft_mirror_cluster(), 2);
        assert_eq!(boot.serial(), 0x1234_5678_9ABC_DEF0);
        assert_eq!(boot.record_size(), 1024);
        assert_eq!(boot.mft_offset(), 16 * 512);
    }

    #[test]
    fn rejects_foreign_or_odd_boot_sectors() {
        let mut fat = boot_sector(16, 0xF6);
        fat[3..11].copy_from_slice(b"MSDOS5.0");
        assert!(matches!(BootSector::from_bytes(&fat), Err(NtfsError::InvalidBootSector(_))));

        let mut odd = boot_sector(16, 0xF6);
        odd[0x0B..0x0D].copy_from_slice(&1024u16.to_le_bytes());
        assert!(matches!(
            BootSector::from_bytes(&odd),
            Err(NtfsError::UnsupportedSectorSize(1024))
        ));

        assert!(matches!(
            BootSector::from_bytes(&boot_sector(16, 0)),
            Err(NtfsError::InvalidRecordSize(0))
        ));
        assert!(matches!(
            BootSector::from_bytes(&[0u8; 100]),
            Err(NtfsError::InvalidBootSector(_))
        ));
    }
}
