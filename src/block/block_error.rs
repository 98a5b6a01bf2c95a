//! Error types for raw block reads.

use std::io;
use thiserror::Error;

/// Errors raised while reading sectors from the underlying stream.
#[derive(Error, Debug)]
pub enum BlockError {
    /// Wraps an I/O error raised by the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended before the requested range could be read.
    /// This is what a truncated image or a device smaller than its metadata looks like.
    #[error("Short read at byte offset {offset}: expected {expected} bytes, got {got}")]
    ShortRead { offset: u64, expected: usize, got: usize },

    /// The requested range cannot be addressed in a 64-bit stream.
    #[error("Range of {len} bytes at byte offset {offset} past partition start {base} is not addressable")]
    OutOfRange { base: u64, offset: u64, len: u64 },
}
