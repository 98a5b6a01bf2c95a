//! Error types for the NTFS engine.
//!
//! Only boot sector errors are fatal to a volume. Damaged MFT records are
//! skipped during a scan and never surface here.

use thiserror::Error;

use crate::block::BlockError;

/// Errors that can occur while opening or browsing an NTFS volume.
#[derive(Error, Debug)]
pub enum NtfsError {
    /// The boot sector is short or does not carry the NTFS signature.
    #[error("Invalid NTFS boot sector: {0}")]
    InvalidBootSector(String),

    /// Only 512 and 4096 byte sectors are supported.
    #[error("Unsupported sector size: {0}. Legal values: 512 or 4096")]
    UnsupportedSectorSize(u16),

    /// The encoded MFT record size does not describe a usable record.
    #[error("Invalid MFT record size encoding: {0}")]
    InvalidRecordSize(i8),

    /// An update sequence check failed: the record was only partly written.
    #[error("Torn MFT record {record}: update sequence mismatch in sector {sector}")]
    TornRecord { record: u64, sector: usize },

    /// Browsing needs the parent links built by `resolve_tree` after a scan.
    #[error("The file tree has not been resolved; scan the volume first")]
    TreeNotResolved,

    /// A directory operation was asked of a regular file.
    #[error("`{0}` is not a directory")]
    NotADirectory(String),

    /// The worker pool for the MFT scan could not be built.
    #[error("Cannot start scan workers: {0}")]
    ThreadPool(String),

    /// A read failed.
    #[error("Block read error: {0}")]
    Block(#[from] BlockError),
}
