//!
//! fs_forensics: A library and CLI for read-only analysis of FAT32 and NTFS volumes.
//!
//! This crate provides tools for:
//! - Reading raw sectors from disk images and devices
//! - Following FAT32 cluster chains and decoding directories with long names
//! - Scanning the NTFS Master File Table and rebuilding the file tree
//! - Resolving paths, listing directories and reading file content through a
//!   single [`Explorer`] contract
//! - Printing volume layouts
//!
//! Nothing is ever written to the inspected volume.
//!
//! # Re-exports
//! - [`Volume`]: Probes a partition and opens the matching engine
//! - [`Fat32Volume`]: FAT32 engine
//! - [`NtfsVolume`]: NTFS engine

pub mod block;
pub mod commands;
pub mod constants;
pub mod diagnostics;
pub mod fat;
pub mod ntfs;
pub mod traits;
pub mod utils;
pub mod volume;

/// FAT32 engine (see [`fat::volume::Fat32Volume`]).
pub use crate::fat::Fat32Volume;
/// NTFS engine (see [`ntfs::volume::NtfsVolume`]).
pub use crate::ntfs::NtfsVolume;
/// Browsing contract shared by both engines.
pub use crate::traits::{Explorer, FileContent, FsEntry, NameMatch};
/// Probing handle over both engines (see [`volume::Volume`]).
pub use crate::volume::{Volume, VolumeEntry, VolumeError, VolumeOptions};
