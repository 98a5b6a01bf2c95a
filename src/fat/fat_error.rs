//! Error types for the FAT32 engine.
//!
//! Boot sector errors are fatal to the volume handle. Chain and directory
//! errors only concern the file or directory being read.

use thiserror::Error;

use crate::block::BlockError;

/// Errors that can occur while opening or browsing a FAT32 volume.
#[derive(Error, Debug)]
pub enum FATError {
    /// Sector 0 could not be read in full or does not hold a boot sector.
    #[error("Invalid boot sector: {0}")]
    InvalidBootSector(String),

    /// The first three bytes of a FAT volume must contain a valid x86 jump instruction.
    #[error("Invalid jump instruction `{0}`")]
    InvalidJmp(String),

    /// Bytes per sector must be 512, 1024, 2048 or 4096.
    #[error("Invalid count of bytes per sector: `{0}`. Legal values: 512, 1024, 2048 or 4096")]
    InvalidBytesPerSec(u16),

    /// Sectors per cluster must be a power of 2 up to 128.
    #[error(
        "Invalid number of sector per cluster: `{0}`. Legal values: 1, 2, 4, 8, 16, 32, 64, 128"
    )]
    InvalidSecPerClus(u8),

    /// Total cluster size must not exceed 32 KiB.
    #[error("Invalid cluster size: `{0}`. Any value greater than 32K is invalid.")]
    InvalidClusSz(u32),

    #[error("Invalid count of reserved sectors: `{0}`. Any value greater than 0 is valid.")]
    InvalidRsvdSecCnt(u16),

    #[error("Invalid number of FATs on this volume: `{0}`.")]
    InvalidNumFat(u8),

    /// FAT32 stores its root directory as a cluster chain, so this count must be 0.
    #[error(
        "Invalid count of directory entries in the root directory: `{0}`. It should be 0 for a FAT32 volume."
    )]
    InvalidRootEntCnt(u16),

    #[error("Invalid total count of sectors on the volume: `{0}`")]
    InvalidTotSec(String),

    #[error("Invalid FAT size: `{0}`")]
    InvalidFatSz(String),

    /// Clusters 0 and 1 are reserved, the data area starts at cluster 2.
    #[error(
        "Invalid cluster number of the first cluster of the root directory: `{0}`. This value should be at least 2."
    )]
    InvalidRootClus(u32),

    /// The boot sector signature must be 0x55AA.
    #[error("Invalid BPB signature: `{0}`. Expected signature: 0x55AA")]
    InvalidSignature(String),

    /// The detected FAT type is not supported (only FAT32 is supported).
    #[error("Unsupported FAT type: `{0}`")]
    UnsupportedFATType(String),

    /// A cluster number outside the data region was used as a chain start.
    #[error("Invalid cluster number: `{0}`")]
    InvalidClusterError(u32),

    /// A cluster chain loops, leaves the FAT or points into the reserved clusters.
    #[error("Corrupt cluster chain starting at cluster {start}: {reason}")]
    CorruptChain { start: u32, reason: String },

    /// A directory operation was asked of a regular file.
    #[error("`{0}` is not a directory")]
    NotADirectory(String),

    /// A sector read failed.
    #[error("Block read error: {0}")]
    Block(#[from] BlockError),

    /// Parsing error occurred during structure initialization
    #[error("BinRead Error: `{0}`")]
    BinReadError(#[from] binread::Error),
}
