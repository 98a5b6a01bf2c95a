//! FAT32 boot sector and volume geometry.
//!
//! This module implements:
//! - BIOS Parameter Block (Bpb) parsing and optional validation
//! - FAT type detection (FAT12/16/32) from the cluster count
//! - The immutable [`VolumeGeometry`] the engine works from

use binread::{BinRead, BinReaderExt};
use getset::{CopyGetters, Getters};
use std::fmt;
use std::io;

use super::fat_error::FATError;

/// The different FAT variants, told apart by their data cluster count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FATType {
    FAT12,
    FAT16,
    FAT32,
}

impl fmt::Display for FATType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FATType::FAT12 => "FAT12",
            FATType::FAT16 => "FAT16",
            FATType::FAT32 => "FAT32",
        };
        write!(f, "{s}")
    }
}

/// BIOS Parameter Block of a FAT32 boot sector (512 bytes).
#[derive(BinRead, Debug, Getters)]
#[br(little)]
pub struct Bpb {
    /// Jump instruction to boot code (0xEB ?? 0x90 or 0xE9 ?? ??)
    jmp: [u8; 3],
    /// OEM identifier (e.g., "MSWIN4.1")
    #[get = "pub"]
    oem_name: [u8; 8],
    bytes_per_sec: u16,
    sec_per_clus: u8,
    rsvd_sec_cnt: u16,
    num_fat: u8,
    /// Root directory entry count (0 on FAT32)
    root_ent_cnt: u16,
    tot_sec_16: u16,
    _media: u8,
    fat_sz_16: u16,
    _sec_per_trk: u16,
    _num_heads: u16,
    _hidd_sec: u32,
    tot_sec_32: u32,

    // FAT32 extended fields
    fat_sz_32: u32,
    _ext_flags: u16,
    _fs_ver: u16,
    root_clus: u32,
    _fs_info: u16,
    _bk_boot_sec: u16,
    _reserved: [u8; 12],
    _drv_num: u8,
    _reserved_1: u8,
    _boot_sig: u8,
    /// Volume serial number
    #[get = "pub"]
    vol_id: u32,
    /// Volume label, space padded
    #[get = "pub"]
    vol_lab: [u8; 11],
    /// Filesystem type label ("FAT32   ")
    #[get = "pub"]
    fil_sys_type: [u8; 8],

    #[br(count = 420)]
    _boot_code: Vec<u8>,
    /// Boot sector signature (0x55 0xAA)
    sig: [u8; 2],
}

impl Bpb {
    /// Decodes a Bpb from the first 512 bytes of a boot sector.
    ///
    /// # Errors
    /// - `FATError::InvalidBootSector` if the buffer is shorter than a boot sector
    /// - the validation variants of `FATError` if `validate` is set and a check fails
    pub fn from_bytes(buf: &[u8], validate: bool) -> Result<Bpb, FATError> {
        if buf.len() < crate::constants::BOOT_SECTOR_SIZE {
            return Err(FATError::InvalidBootSector(format!(
                "boot sector holds {} bytes, expected {}",
                buf.len(),
                crate::constants::BOOT_SECTOR_SIZE
            )));
        }

        let mut reader = io::Cursor::new(buf);
        let bpb: Bpb = reader.read_le()?;

        if validate { bpb.validate() } else { Ok(bpb) }
    }

    /// Total sector count, from whichever of the 16/32-bit fields is set.
    pub fn tot_sec(&self) -> u32 {
        if self.tot_sec_16 != 0 {
            self.tot_sec_16.into()
        } else {
            self.tot_sec_32
        }
    }

    /// Sectors per FAT, from whichever of the 16/32-bit fields is set.
    pub fn fat_sz(&self) -> u32 {
        if self.fat_sz_16 != 0 {
            self.fat_sz_16.into()
        } else {
            self.fat_sz_32
        }
    }

    /// Number of clusters in the data region. Zero when the header is inconsistent.
    pub fn cluster_count(&self) -> u32 {
        if self.bytes_per_sec == 0 || self.sec_per_clus == 0 {
            return 0;
        }
        let root_dir_sectors =
            (self.root_ent_cnt as u64 * 32).div_ceil(self.bytes_per_sec as u64);
        let meta = self.rsvd_sec_cnt as u64 + self.num_fat as u64 * self.fat_sz() as u64 + root_dir_sectors;

        let clusters = (self.tot_sec() as u64).saturating_sub(meta) / self.sec_per_clus as u64;
        u32::try_from(clusters).unwrap_or(0)
    }

    /// Determines the FAT type from the cluster count, as Microsoft's specification does.
    pub fn fat_type(&self) -> FATType {
        let clus_cnt = self.cluster_count();

        if clus_cnt < 4085 {
            FATType::FAT12
        } else if clus_cnt < 65525 {
            FATType::FAT16
        } else {
            FATType::FAT32
        }
    }

    /// Builds the geometry the engine works from.
    pub fn geometry(&self) -> VolumeGeometry {
        VolumeGeometry {
            bytes_per_sector: self.bytes_per_sec,
            sectors_per_cluster: self.sec_per_clus,
            reserved_sectors: self.rsvd_sec_cnt,
            fat_count: self.num_fat,
            sectors_per_fat: self.fat_sz(),
            root_cluster: self.root_clus,
            total_sectors: self.tot_sec(),
        }
    }

    /// Validates the Bpb against the FAT32 specification.
    ///
    /// # Errors
    /// - `FATError::InvalidJmp`, `InvalidBytesPerSec`, `InvalidSecPerClus`,
    ///   `InvalidClusSz`, `InvalidSignature` for general header damage
    /// - `FATError::UnsupportedFATType` if the cluster count is not a FAT32 one
    /// - the FAT32 specific variants from [`Bpb::validate_fat32`]
    fn validate(self) -> Result<Self, FATError> {
        if !((self.jmp[0] == 0xEB && self.jmp[2] == 0x90) || self.jmp[0] == 0xE9) {
            return Err(FATError::InvalidJmp(format!(
                "0x{:02X}{:02X}{:02X}",
                self.jmp[0], self.jmp[1], self.jmp[2],
            )));
        }

        const VALID_BYTES_PER_SEC: [u16; 4] = [512, 1024, 2048, 4096];
        if !VALID_BYTES_PER_SEC.contains(&self.bytes_per_sec) {
            return Err(FATError::InvalidBytesPerSec(self.bytes_per_sec));
        }

        const VALID_SEC_PER_CLUS: [u8; 8] = [1, 2, 4, 8, 16, 32, 64, 128];
        if !VALID_SEC_PER_CLUS.contains(&self.sec_per_clus) {
            return Err(FATError::InvalidSecPerClus(self.sec_per_clus));
        }

        let clus_sz = self.bytes_per_sec as u32 * self.sec_per_clus as u32;
        if clus_sz > 32 * 1024 {
            return Err(FATError::InvalidClusSz(clus_sz));
        }

        if self.sig != [0x55, 0xAA] {
            return Err(FATError::InvalidSignature(format!(
                "0x{:02X}{:02X}",
                self.sig[0], self.sig[1]
            )));
        }

        match self.fat_type() {
            FATType::FAT32 => self.validate_fat32(),
            other => Err(FATError::UnsupportedFATType(other.to_string())),
        }
    }

    /// Performs the FAT32-specific checks.
    fn validate_fat32(self) -> Result<Self, FATError> {
        if self.rsvd_sec_cnt == 0 {
            return Err(FATError::InvalidRsvdSecCnt(self.rsvd_sec_cnt));
        }

        if self.num_fat == 0 {
            return Err(FATError::InvalidNumFat(self.num_fat));
        }

        if self.root_ent_cnt != 0 {
            return Err(FATError::InvalidRootEntCnt(self.root_ent_cnt));
        }

        if self.tot_sec_16 != 0 {
            return Err(FATError::InvalidTotSec(String::from(
                "BPB_TotSec16 should be 0 for a FAT32 volume.",
            )));
        }
        if self.tot_sec_32 == 0 {
            return Err(FATError::InvalidTotSec(String::from(
                "BPB_TotSec32 should be greater than 0 for a FAT32 volume.",
            )));
        }

        if self.fat_sz_16 != 0 {
            return Err(FATError::InvalidFatSz(String::from(
                "BPB_FATSz16 should be 0 for a FAT32 volume.",
            )));
        }
        if self.fat_sz_32 == 0 {
            return Err(FATError::InvalidFatSz(String::from(
                "BPB_FATSz32 should be greater than 0 for a FAT32 volume.",
            )));
        }

        if self.root_clus < 2 {
            return Err(FATError::InvalidRootClus(self.root_clus));
        }

        Ok(self)
    }
}

/// Geometry of a FAT32 volume, read once from the boot sector.
///
/// `first_data_sector() == reserved_sectors + fat_count * sectors_per_fat`
/// holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct VolumeGeometry {
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    fat_count: u8,
    sectors_per_fat: u32,
    root_cluster: u32,
    total_sectors: u32,
}

impl VolumeGeometry {
    /// First sector of the first FAT.
    pub fn fat_start(&self) -> u64 {
        self.reserved_sectors as u64
    }

    /// First sector of the data region (cluster 2).
    pub fn first_data_sector(&self) -> u64 {
        self.reserved_sectors as u64 + self.fat_count as u64 * self.sectors_per_fat as u64
    }

    /// Size in bytes of one FAT copy.
    pub fn fat_bytes(&self) -> u64 {
        self.sectors_per_fat as u64 * self.bytes_per_sector as u64
    }
}
