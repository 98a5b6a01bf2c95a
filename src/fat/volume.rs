//! FAT32 volume structure and operations.
//!
//! This module implements the core functions to browse a FAT32 volume:
//! - Reading the boot sector and loading the first FAT in memory
//! - Mapping clusters to sectors and following cluster chains
//! - Listing directories and resolving paths from the root
//! - Reading file content
//! - Displaying the volume layout

use std::collections::HashSet;
use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::io::{Read, Seek};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use super::bpb::{Bpb, VolumeGeometry};
use super::dir_entry::{self, DirectoryEntry};
use super::fat_error::FATError;
use crate::block::{BlockError, BlockReader};
use crate::constants::{BOOT_SECTOR_SIZE, FAT32_ENTRY_MASK, FAT32_EOC_MIN};
use crate::diagnostics::{DiagnosticSink, LogSink};
use crate::traits::{self, Explorer, FileContent, LayoutDisplay, NameMatch};

/// Size of a FAT holding one 4-byte entry per 28-bit cluster number.
const MAX_FAT_BYTES: u64 = (FAT32_ENTRY_MASK as u64 + 1) * 4;

/// Options used when opening a FAT32 volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct FatOptions {
    /// Run the full BPB validation before accepting the volume.
    pub validate: bool,
    /// How path segments are matched against entry names.
    pub lookup: NameMatch,
}

/// An open FAT32 volume.
///
/// The first FAT is held in memory for the lifetime of the handle; directory
/// contents are decoded on demand.
pub struct Fat32Volume<R> {
    reader: BlockReader<R>,
    bpb: Bpb,
    geometry: VolumeGeometry,
    fat: Vec<u8>,
    options: FatOptions,
    sink: Arc<dyn DiagnosticSink>,
}

impl Fat32Volume<File> {
    /// Opens the FAT32 volume stored in a disk image or device.
    pub fn open(path: &Path, options: FatOptions) -> Result<Self, FATError> {
        let reader = BlockReader::open(path)?;
        let sink = Arc::new(LogSink::new(path.display().to_string()));
        Self::from_reader(reader, options, sink)
    }
}

impl<R: Read + Seek> Fat32Volume<R> {
    /// Reads the boot sector and the first FAT from `reader`.
    ///
    /// # Errors
    /// - `FATError::InvalidBootSector` if sector 0 cannot be read in full or
    ///   describes an unusable geometry
    /// - the BPB validation variants when `options.validate` is set
    /// - `FATError::Block` if the FAT itself cannot be read
    pub fn from_reader(
        mut reader: BlockReader<R>,
        options: FatOptions,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, FATError> {
        let boot = reader.read_bytes(0, BOOT_SECTOR_SIZE).map_err(|err| match err {
            BlockError::ShortRead { got, .. } => FATError::InvalidBootSector(format!(
                "short read of sector 0: {got} of {BOOT_SECTOR_SIZE} bytes"
            )),
            other => FATError::Block(other),
        })?;

        let bpb = Bpb::from_bytes(&boot, options.validate)?;
        let geometry = bpb.geometry();
        if geometry.bytes_per_sector() == 0 || geometry.sectors_per_cluster() == 0 {
            return Err(FATError::InvalidBootSector(format!(
                "{} bytes per sector, {} sectors per cluster",
                geometry.bytes_per_sector(),
                geometry.sectors_per_cluster()
            )));
        }

        if geometry.fat_bytes() > MAX_FAT_BYTES {
            return Err(FATError::InvalidBootSector(format!(
                "FAT of {} bytes exceeds the {MAX_FAT_BYTES} bytes 28-bit cluster numbers can address",
                geometry.fat_bytes()
            )));
        }
        let fat = reader
            .read_sectors(
                geometry.fat_start(),
                geometry.sectors_per_fat() as usize,
                geometry.bytes_per_sector() as usize,
            )
            .map_err(|err| match err {
                BlockError::ShortRead { expected, got, .. } => FATError::InvalidBootSector(format!(
                    "FAT of {expected} bytes runs past the end of the image after {got} bytes"
                )),
                other => FATError::Block(other),
            })?;

        sink.info(&format!(
            "FAT32 volume: {} B/sector, {} sectors/cluster, FAT of {} sectors x{}, root cluster {}",
            geometry.bytes_per_sector(),
            geometry.sectors_per_cluster(),
            geometry.sectors_per_fat(),
            geometry.fat_count(),
            geometry.root_cluster()
        ));

        Ok(Self {
            reader,
            bpb,
            geometry,
            fat,
            options,
            sink,
        })
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn bpb(&self) -> &Bpb {
        &self.bpb
    }

    pub fn set_lookup(&mut self, lookup: NameMatch) {
        self.options.lookup = lookup;
    }

    /// Number of clusters a chain may span on this volume.
    ///
    /// Bounded by both the data region size and the number of FAT entries, so a
    /// header with a bogus sector count cannot lift the limit.
    pub fn total_clusters(&self) -> u32 {
        let by_fat = (self.fat.len() / 4).saturating_sub(2) as u32;
        match self.bpb.cluster_count() {
            0 => by_fat,
            by_sectors => by_sectors.min(by_fat),
        }
    }

    /// Converts a cluster number to the sectors it covers.
    ///
    /// # Errors
    /// - `FATError::InvalidClusterError` for clusters 0 and 1, which hold no data
    pub fn cluster_to_sectors(&self, cluster: u32) -> Result<Range<u64>, FATError> {
        if cluster < 2 {
            return Err(FATError::InvalidClusterError(cluster));
        }
        let spc = self.geometry.sectors_per_cluster() as u64;
        let start = self.geometry.first_data_sector() + (cluster as u64 - 2) * spc;
        Ok(start..start + spc)
    }

    /// Reads the FAT entry of `cluster`, with the reserved top 4 bits cleared.
    fn fat_entry(&self, cluster: u32) -> Option<u32> {
        crate::utils::u32_at(&self.fat, cluster as usize * 4).map(|v| v & FAT32_ENTRY_MASK)
    }

    /// Lists the clusters of the chain starting at `start`.
    ///
    /// # Errors
    /// - `FATError::InvalidClusterError` if `start` is 0 or 1
    /// - `FATError::CorruptChain` if the chain loops, points outside the FAT,
    ///   into the reserved clusters, or grows beyond the volume's cluster count
    pub fn list_clusters(&self, start: u32) -> Result<Vec<u32>, FATError> {
        if start < 2 {
            return Err(FATError::InvalidClusterError(start));
        }

        let limit = self.total_clusters() as usize;
        let corrupt = |reason: String| FATError::CorruptChain { start, reason };

        let mut clusters = vec![];
        let mut visited = HashSet::new();
        let mut cluster = start;

        loop {
            if !visited.insert(cluster) {
                return Err(corrupt(format!("cluster {cluster} visited twice")));
            }
            if clusters.len() >= limit {
                return Err(corrupt(format!("chain longer than the {limit} clusters of the volume")));
            }
            clusters.push(cluster);

            let next = self
                .fat_entry(cluster)
                .ok_or_else(|| corrupt(format!("cluster {cluster} lies outside the FAT")))?;

            if next == 0 || next >= FAT32_EOC_MIN {
                break;
            }
            if next < 2 {
                return Err(corrupt(format!("cluster {cluster} points to reserved cluster {next}")));
            }
            cluster = next;
        }

        Ok(clusters)
    }

    /// Follows the chain starting at `start` and returns every sector it covers, in order.
    pub fn follow_chain(&self, start: u32) -> Result<Vec<u64>, FATError> {
        let mut sectors = vec![];
        for cluster in self.list_clusters(start)? {
            sectors.extend(self.cluster_to_sectors(cluster)?);
        }
        Ok(sectors)
    }

    /// Reads the whole content of the chain starting at `start`.
    fn read_chain(&mut self, start: u32) -> Result<Vec<u8>, FATError> {
        let sectors = self.follow_chain(start)?;
        let data = self
            .reader
            .read_sector_list(&sectors, self.geometry.bytes_per_sector() as usize)?;
        Ok(data)
    }

    /// Decodes the entries of a directory, without "." and ".." nor deleted entries.
    ///
    /// # Errors
    /// - `FATError::NotADirectory` if `entry` is a file
    /// - `FATError::CorruptChain` and `FATError::Block` when its chain cannot be read
    pub fn decode_directory(
        &mut self,
        entry: &DirectoryEntry,
    ) -> Result<Vec<DirectoryEntry>, FATError> {
        if !entry.is_dir() {
            return Err(FATError::NotADirectory(entry.name().to_string()));
        }

        let buffer = self.read_chain(entry.first_cluster())?;
        dir_entry::decode_directory(&buffer, self.sink.as_ref())
    }

    /// Resolves a path from the root directory.
    ///
    /// Returns `Ok(None)` if any segment is missing or if an intermediate
    /// segment is a file. The empty path resolves to the root.
    pub fn resolve_path(&mut self, path: &str) -> Result<Option<DirectoryEntry>, FATError> {
        let mut current = DirectoryEntry::root(self.geometry.root_cluster());

        for segment in traits::path_segments(path) {
            if !current.is_dir() {
                return Ok(None);
            }
            let lookup = self.options.lookup;
            let found = self
                .decode_directory(&current)?
                .into_iter()
                .find(|e| lookup.matches(segment, e.name()));

            match found {
                Some(entry) => current = entry,
                None => return Ok(None),
            }
        }

        Ok(Some(current))
    }

    /// Reads a file's content, truncated to its declared size.
    ///
    /// Only plain archive entries are read; directories and entries with other
    /// attribute bits come back as [`FileContent::Unsupported`].
    pub fn read_file_content(&mut self, entry: &DirectoryEntry) -> Result<FileContent, FATError> {
        if !entry.is_plain_archive() {
            return Ok(FileContent::Unsupported(format!(
                "`{}` has attributes [{}]; only plain archive files are read",
                entry.name(),
                crate::utils::describe_attributes(entry.attr())
            )));
        }

        let size = entry.file_size() as usize;
        if size == 0 {
            return Ok(FileContent::Data(vec![]));
        }

        let mut data = self.read_chain(entry.first_cluster())?;
        if data.len() < size {
            self.sink.warn(&format!(
                "`{}` declares {size} bytes but its chain only holds {}",
                entry.name(),
                data.len()
            ));
        }
        data.truncate(size);

        Ok(FileContent::Data(data))
    }
}

impl<R: Read + Seek> Explorer for Fat32Volume<R> {
    type Entry = DirectoryEntry;
    type Error = FATError;

    fn root(&self) -> DirectoryEntry {
        DirectoryEntry::root(self.geometry.root_cluster())
    }

    fn resolve_path(&mut self, path: &str) -> Result<Option<DirectoryEntry>, FATError> {
        Fat32Volume::resolve_path(self, path)
    }

    fn list_directory(&mut self, entry: &DirectoryEntry) -> Result<Vec<DirectoryEntry>, FATError> {
        self.decode_directory(entry)
    }

    fn read_file_content(&mut self, entry: &DirectoryEntry) -> Result<FileContent, FATError> {
        Fat32Volume::read_file_content(self, entry)
    }
}

impl<R> LayoutDisplay for Fat32Volume<R> {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        let indent = " ".repeat(indent.into());
        let geo = &self.geometry;

        writeln!(out, "{}┌{:─^55}┐", indent, " FAT32 Volume Layout ")?;
        writeln!(
            out,
            "{}├{:^12}┬{:^12}┬{:^12}┬{:^16}┤",
            indent, "Region", "Start", "End", "Description"
        )?;
        writeln!(out, "{}├{:─<12}┼{:─<12}┼{:─<12}┼{:─<16}┤", indent, "", "", "", "")?;

        writeln!(
            out,
            "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
            indent,
            "Reserved",
            0,
            geo.fat_start(),
            "Boot + Reserved"
        )?;
        for i in 0..geo.fat_count() as u64 {
            let fat_i_start = geo.fat_start() + i * geo.sectors_per_fat() as u64;
            writeln!(
                out,
                "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
                indent,
                format!("FAT #{i}"),
                fat_i_start,
                fat_i_start + geo.sectors_per_fat() as u64,
                "FAT Tables"
            )?;
        }
        writeln!(
            out,
            "{}│{:<12}│{:<12}│{:<12}│{:<16}│",
            indent,
            "Data",
            geo.first_data_sector(),
            geo.total_sectors(),
            "Cluster Data"
        )?;
        writeln!(out, "{}└{:─<12}┴{:─<12}┴{:─<12}┴{:─<16}┘", indent, "", "", "", "")?;
        writeln!(
            out,
            "{}Label: {:?}  Serial: {:08X}  Root cluster: {}",
            indent,
            String::from_utf8_lossy(self.bpb.vol_lab()).trim_end(),
            self.bpb.vol_id(),
            geo.root_cluster()
        )?;

        Ok(out)
    }
}
