//! Sector reader over any seekable byte stream.
//!
//! The reader owns its handle exclusively: every read is a synchronous seek
//! followed by a read of the exact requested length.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use super::block_error::BlockError;
use crate::constants::SECTOR_SIZE;

/// Upper bound on the buffer reserved ahead of a read. Lengths usually come
/// from on-disk metadata, so larger reads grow with the bytes actually read.
const MAX_PREALLOC: usize = 1 << 20;

/// Serves fixed-size sector reads from a file, device or in-memory image.
///
/// `base` is the byte offset of the partition start within the stream; every
/// sector number is relative to it.
#[derive(Debug)]
pub struct BlockReader<R> {
    inner: R,
    base: u64,
}

impl BlockReader<File> {
    /// Opens a disk image or device path for reading.
    pub fn open(path: &Path) -> Result<Self, BlockError> {
        Self::open_at(path, 0)
    }

    /// Opens a disk image or device whose partition starts `base` bytes in.
    pub fn open_at(path: &Path, base: u64) -> Result<Self, BlockError> {
        Ok(Self::with_base(File::open(path)?, base))
    }

    /// Opens a disk image or device whose partition starts at host sector
    /// `partition_offset`.
    pub fn open_partition(path: &Path, partition_offset: u64) -> Result<Self, BlockError> {
        let base = partition_offset
            .checked_mul(SECTOR_SIZE as u64)
            .ok_or(BlockError::OutOfRange {
                base: 0,
                offset: partition_offset,
                len: SECTOR_SIZE as u64,
            })?;
        Self::open_at(path, base)
    }
}

impl<R: Read + Seek> BlockReader<R> {
    /// Wraps a stream positioned at the start of a partition.
    pub fn new(inner: R) -> Self {
        Self::with_base(inner, 0)
    }

    /// Wraps a stream whose partition starts `base` bytes in.
    pub fn with_base(inner: R, base: u64) -> Self {
        Self { inner, base }
    }

    /// Returns the partition start in bytes.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Reads exactly `len` bytes starting `offset` bytes into the partition.
    ///
    /// # Errors
    /// - `BlockError::ShortRead` if the stream ends before `len` bytes were read
    /// - `BlockError::Io` for any other I/O failure
    pub fn read_bytes(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, BlockError> {
        let buf = self.read_up_to(offset, len)?;

        if buf.len() < len {
            return Err(BlockError::ShortRead {
                offset: self.base + offset,
                expected: len,
                got: buf.len(),
            });
        }

        Ok(buf)
    }

    /// Reads at most `len` bytes starting `offset` bytes into the partition.
    ///
    /// Unlike [`BlockReader::read_bytes`], reaching the end of the stream is not
    /// an error: the returned buffer is simply shorter.
    pub fn read_up_to(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, BlockError> {
        let start = self.base.checked_add(offset).ok_or(BlockError::OutOfRange {
            base: self.base,
            offset,
            len: len as u64,
        })?;
        self.inner.seek(SeekFrom::Start(start))?;

        let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC));
        (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Length of the stream from the partition start, 0 if the stream is shorter.
    pub fn stream_len(&mut self) -> Result<u64, BlockError> {
        let end = self.inner.seek(SeekFrom::End(0))?;
        Ok(end.saturating_sub(self.base))
    }

    /// Reads `count` consecutive sectors starting at `start`.
    pub fn read_sectors(
        &mut self,
        start: u64,
        count: usize,
        sector_size: usize,
    ) -> Result<Vec<u8>, BlockError> {
        let out_of_range = || BlockError::OutOfRange {
            base: self.base,
            offset: start,
            len: count as u64,
        };
        let offset = start.checked_mul(sector_size as u64).ok_or_else(out_of_range)?;
        let len = count.checked_mul(sector_size).ok_or_else(out_of_range)?;
        self.read_bytes(offset, len)
    }

    /// Reads a list of possibly non-contiguous sectors and concatenates them in list order.
    ///
    /// Runs of adjacent sectors are fetched with a single read.
    pub fn read_sector_list(
        &mut self,
        sectors: &[u64],
        sector_size: usize,
    ) -> Result<Vec<u8>, BlockError> {
        let mut data = Vec::with_capacity(sectors.len().saturating_mul(sector_size).min(MAX_PREALLOC));
        let mut i = 0;

        while i < sectors.len() {
            let start = sectors[i];
            let mut run = 1;
            while i + run < sectors.len() && sectors[i + run] == start + run as u64 {
                run += 1;
            }

            data.extend(self.read_sectors(start, run, sector_size)?);
            i += run;
        }

        Ok(data)
    }
}
