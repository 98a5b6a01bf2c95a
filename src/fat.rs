//! FAT32 engine: boot sector, allocation table, cluster chains and directories.

pub mod bpb;
pub mod dir_entry;
pub mod fat_error;
pub mod volume;

pub use bpb::{Bpb, FATType, VolumeGeometry};
pub use dir_entry::DirectoryEntry;
pub use fat_error::FATError;
pub use volume::{Fat32Volume, FatOptions};
