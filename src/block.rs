//! Raw sector access to a disk image or block device.

pub mod block_error;
pub mod reader;

pub use block_error::BlockError;
pub use reader::BlockReader;
