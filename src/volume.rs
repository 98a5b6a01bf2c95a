//! Filesystem detection and a single handle over both engines.
//!
//! [`Volume`] probes the boot sector of a partition and opens the matching
//! engine. Its entries and errors wrap the engine-specific ones so callers
//! can browse either filesystem through the same [`Explorer`] calls.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::block::{BlockError, BlockReader};
use crate::constants::BOOT_SECTOR_SIZE;
use crate::diagnostics::{DiagnosticSink, LogSink};
use crate::fat::{DirectoryEntry, FATError, Fat32Volume, FatOptions};
use crate::ntfs::boot_sector::NTFS_SIGNATURE;
use crate::ntfs::{NtfsError, NtfsFileEntry, NtfsOptions, NtfsVolume};
use crate::traits::{Explorer, FileContent, FsEntry, LayoutDisplay, NameMatch};

const FAT32_FS_TYPE: &[u8; 8] = b"FAT32   ";

/// Errors surfaced by a [`Volume`].
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("FAT32: {0}")]
    Fat(#[from] FATError),

    #[error("NTFS: {0}")]
    Ntfs(#[from] NtfsError),

    #[error("Block read error: {0}")]
    Block(#[from] BlockError),

    /// The boot sector carries neither the NTFS nor the FAT32 markers.
    #[error("Unrecognised filesystem: {0}")]
    UnknownFilesystem(String),

    /// An entry from one engine was handed to the other.
    #[error("Entry does not belong to this volume")]
    ForeignEntry,
}

/// The filesystems this crate decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemKind {
    Fat32,
    Ntfs,
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilesystemKind::Fat32 => write!(f, "FAT32"),
            FilesystemKind::Ntfs => write!(f, "NTFS"),
        }
    }
}

/// Tells the filesystem apart from its boot sector.
///
/// NTFS carries its OEM id at byte 3. FAT32 is recognised by the type string
/// at byte 0x52, or failing that by a boot signature with an empty FAT16
/// root directory and FAT size and a non-zero FAT32 FAT size.
pub fn detect(boot: &[u8]) -> Option<FilesystemKind> {
    if boot.len() < BOOT_SECTOR_SIZE {
        return None;
    }
    if &boot[3..11] == NTFS_SIGNATURE {
        return Some(FilesystemKind::Ntfs);
    }
    if &boot[0x52..0x5A] == FAT32_FS_TYPE {
        return Some(FilesystemKind::Fat32);
    }

    let signed = boot[510] == 0x55 && boot[511] == 0xAA;
    let root_entries = u16::from_le_bytes([boot[0x11], boot[0x12]]);
    let fat_sz16 = u16::from_le_bytes([boot[0x16], boot[0x17]]);
    let fat_sz32 = u32::from_le_bytes([boot[0x24], boot[0x25], boot[0x26], boot[0x27]]);
    if signed && root_entries == 0 && fat_sz16 == 0 && fat_sz32 != 0 {
        return Some(FilesystemKind::Fat32);
    }

    None
}

/// An entry of either engine.
#[derive(Debug, Clone)]
pub enum VolumeEntry {
    Fat32(DirectoryEntry),
    Ntfs(NtfsFileEntry),
}

impl FsEntry for VolumeEntry {
    fn name(&self) -> &str {
        match self {
            VolumeEntry::Fat32(e) => FsEntry::name(e),
            VolumeEntry::Ntfs(e) => FsEntry::name(e),
        }
    }

    fn is_dir(&self) -> bool {
        match self {
            VolumeEntry::Fat32(e) => e.is_dir(),
            VolumeEntry::Ntfs(e) => FsEntry::is_dir(e),
        }
    }

    fn size(&self) -> u64 {
        match self {
            VolumeEntry::Fat32(e) => FsEntry::size(e),
            VolumeEntry::Ntfs(e) => FsEntry::size(e),
        }
    }

    fn id(&self) -> u64 {
        match self {
            VolumeEntry::Fat32(e) => e.id(),
            VolumeEntry::Ntfs(e) => e.id(),
        }
    }
}

impl fmt::Display for VolumeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeEntry::Fat32(e) => write!(f, "{e}"),
            VolumeEntry::Ntfs(e) => write!(f, "{e}"),
        }
    }
}

/// Options applied to whichever engine a [`Volume`] opens.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeOptions {
    /// Run the full BPB validation on FAT32 volumes.
    pub validate: bool,
    /// How path segments are matched against entry names.
    pub lookup: NameMatch,
}

/// An open FAT32 or NTFS volume.
pub enum Volume<R> {
    Fat32(Fat32Volume<R>),
    Ntfs(NtfsVolume<R>),
}

impl Volume<File> {
    /// Opens the volume starting `partition_offset` sectors into a disk image
    /// or device, choosing the engine from its boot sector.
    pub fn open(path: &Path, partition_offset: u64) -> Result<Self, VolumeError> {
        Self::open_with(path, partition_offset, VolumeOptions::default())
    }

    pub fn open_with(
        path: &Path,
        partition_offset: u64,
        options: VolumeOptions,
    ) -> Result<Self, VolumeError> {
        let reader = BlockReader::open_partition(path, partition_offset)?;
        let sink = Arc::new(LogSink::new(path.display().to_string()));
        Self::probe(reader, options, sink)
    }
}

impl<R: Read + Seek> Volume<R> {
    /// Detects the filesystem at the reader's partition start and opens it.
    ///
    /// # Errors
    /// - `VolumeError::UnknownFilesystem` if neither engine recognises the
    ///   boot sector
    /// - the engine's own error if the boot sector is recognised but unusable
    pub fn probe(
        mut reader: BlockReader<R>,
        options: VolumeOptions,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, VolumeError> {
        let boot = reader.read_up_to(0, BOOT_SECTOR_SIZE)?;

        match detect(&boot) {
            Some(FilesystemKind::Ntfs) => Ok(Volume::Ntfs(NtfsVolume::from_reader(
                reader,
                NtfsOptions {
                    lookup: options.lookup,
                },
                sink,
            )?)),
            Some(FilesystemKind::Fat32) => Ok(Volume::Fat32(Fat32Volume::from_reader(
                reader,
                FatOptions {
                    validate: options.validate,
                    lookup: options.lookup,
                },
                sink,
            )?)),
            None => Err(VolumeError::UnknownFilesystem(format!(
                "no NTFS or FAT32 boot sector at byte {}",
                reader.base()
            ))),
        }
    }

    pub fn kind(&self) -> FilesystemKind {
        match self {
            Volume::Fat32(_) => FilesystemKind::Fat32,
            Volume::Ntfs(_) => FilesystemKind::Ntfs,
        }
    }

    pub fn set_lookup(&mut self, lookup: NameMatch) {
        match self {
            Volume::Fat32(vol) => vol.set_lookup(lookup),
            Volume::Ntfs(vol) => vol.set_lookup(lookup),
        }
    }

    /// Makes the volume browsable: NTFS needs its MFT scanned and its tree
    /// resolved first, FAT32 is browsable as soon as it is open.
    pub fn prepare(&mut self) -> Result<(), VolumeError> {
        if let Volume::Ntfs(vol) = self {
            if !vol.is_resolved() {
                vol.scan_volume()?;
            }
        }
        Ok(())
    }
}

impl<R: Read + Seek> Explorer for Volume<R> {
    type Entry = VolumeEntry;
    type Error = VolumeError;

    fn root(&self) -> VolumeEntry {
        match self {
            Volume::Fat32(vol) => VolumeEntry::Fat32(vol.root()),
            Volume::Ntfs(vol) => VolumeEntry::Ntfs(vol.root()),
        }
    }

    fn resolve_path(&mut self, path: &str) -> Result<Option<VolumeEntry>, VolumeError> {
        Ok(match self {
            Volume::Fat32(vol) => vol.resolve_path(path)?.map(VolumeEntry::Fat32),
            Volume::Ntfs(vol) => vol.resolve_path(path)?.map(VolumeEntry::Ntfs),
        })
    }

    fn list_directory(&mut self, entry: &VolumeEntry) -> Result<Vec<VolumeEntry>, VolumeError> {
        match (self, entry) {
            (Volume::Fat32(vol), VolumeEntry::Fat32(e)) => Ok(vol
                .decode_directory(e)?
                .into_iter()
                .map(VolumeEntry::Fat32)
                .collect()),
            (Volume::Ntfs(vol), VolumeEntry::Ntfs(e)) => Ok(vol
                .list_directory(e)?
                .into_iter()
                .map(VolumeEntry::Ntfs)
                .collect()),
            _ => Err(VolumeError::ForeignEntry),
        }
    }

    fn read_file_content(&mut self, entry: &VolumeEntry) -> Result<FileContent, VolumeError> {
        match (self, entry) {
            (Volume::Fat32(vol), VolumeEntry::Fat32(e)) => Ok(vol.read_file_content(e)?),
            (Volume::Ntfs(vol), VolumeEntry::Ntfs(e)) => Ok(vol.read_file_content(e)?),
            _ => Err(VolumeError::ForeignEntry),
        }
    }
}

impl<R: Read + Seek> LayoutDisplay for Volume<R> {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        match self {
            Volume::Fat32(vol) => vol.display_layout(indent),
            Volume::Ntfs(vol) => vol.display_layout(indent),
        }
    }
}
