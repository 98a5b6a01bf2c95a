//! NTFS volume structure and operations.
//!
//! The MFT is scanned once into a flat file table. Parent links are only
//! resolved into a tree after the scan has completed, so the order in which
//! records are read never matters.

use rayon::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::attribute::DataBody;
use super::boot_sector::BootSector;
use super::ntfs_error::NtfsError;
use super::record::{self, MftRecord, NtfsFileEntry};
use crate::block::{BlockError, BlockReader};
use crate::constants::{BOOT_SECTOR_SIZE, NTFS_ROOT_RECORD};
use crate::diagnostics::{DiagnosticSink, LogSink};
use crate::traits::{self, Explorer, FileContent, FsEntry, LayoutDisplay, NameMatch};

/// Options used when opening an NTFS volume.
#[derive(Debug, Clone, Copy, Default)]
pub struct NtfsOptions {
    /// How path segments are matched against entry names.
    pub lookup: NameMatch,
}

/// Tuning of an MFT scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Worker threads; `None` lets the pool size itself to the host.
    pub threads: Option<usize>,
    /// Records read with one I/O and parsed as one parallel batch.
    pub batch_records: usize,
    /// Number of records to examine instead of the estimate from the boot sector.
    pub record_limit: Option<u64>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            threads: None,
            batch_records: 1024,
            record_limit: None,
        }
    }
}

/// Shared flag used to stop a scan from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of an MFT scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Record slots read from the MFT.
    pub examined: u64,
    /// Slots that produced a file entry.
    pub parsed: u64,
    /// Unallocated, torn or nameless slots.
    pub skipped: u64,
    /// The scan was stopped through its [`CancelToken`].
    pub cancelled: bool,
    /// The image ended before the estimated record count.
    pub truncated: bool,
}

/// Parent/child links between the entries of the file table.
#[derive(Debug, Default)]
pub struct FileTree {
    /// Record number to position in the file table.
    index: HashMap<u64, usize>,
    /// Directory record number to the positions of its children.
    children: HashMap<u64, Vec<usize>>,
    /// Entries not reachable from the root: missing parent or parent cycle.
    orphans: Vec<usize>,
}

/// An open NTFS volume.
pub struct NtfsVolume<R> {
    reader: BlockReader<R>,
    boot: BootSector,
    options: NtfsOptions,
    sink: Arc<dyn DiagnosticSink>,
    files: Vec<NtfsFileEntry>,
    tree: Option<FileTree>,
}

impl NtfsVolume<File> {
    /// Opens the NTFS volume starting `partition_offset` sectors into a disk
    /// image or device.
    pub fn open(path: &Path, partition_offset: u64, options: NtfsOptions) -> Result<Self, NtfsError> {
        let reader = BlockReader::open_partition(path, partition_offset)?;
        let sink = Arc::new(LogSink::new(path.display().to_string()));
        Self::from_reader(reader, options, sink)
    }
}

/// Turns one record slot into a file entry, or `None` if it holds none.
fn decode_slot(number: u64, bytes: &[u8], sink: &dyn DiagnosticSink) -> Option<NtfsFileEntry> {
    let mut mft_record = MftRecord::new(number, bytes.to_vec())?;
    if let Err(err) = mft_record.apply_fixup() {
        sink.warn(&err.to_string());
        return None;
    }
    record::parse_record(&mft_record, sink)
}

impl<R: Read + Seek> NtfsVolume<R> {
    /// Reads and checks the boot sector at the reader's partition start.
    ///
    /// # Errors
    /// - `NtfsError::InvalidBootSector` if the sector is short or foreign
    /// - `NtfsError::UnsupportedSectorSize` and `NtfsError::InvalidRecordSize`
    ///   for geometries this engine does not handle
    pub fn from_reader(
        mut reader: BlockReader<R>,
        options: NtfsOptions,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self, NtfsError> {
        let buf = reader.read_up_to(0, BOOT_SECTOR_SIZE)?;
        let boot = BootSector::from_bytes(&buf)?;

        sink.info(&format!(
            "NTFS volume: {} B/sector, {} sectors/cluster, MFT at cluster {}, {} B records",
            boot.bytes_per_sector(),
            boot.sectors_per_cluster(),
            boot.mft_cluster(),
            boot.record_size()
        ));

        Ok(Self {
            reader,
            boot,
            options,
            sink,
            files: vec![],
            tree: None,
        })
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.boot
    }

    pub fn set_lookup(&mut self, lookup: NameMatch) {
        self.options.lookup = lookup;
    }

    /// Byte offset of the MFT from the partition start.
    pub fn mft_offset(&self) -> u64 {
        self.boot.mft_offset()
    }

    /// Number of records a scan examines by default.
    ///
    /// This is the size of the area in front of the MFT divided by the record
    /// size; it is only an approximation and reads past the end of the image
    /// simply end the scan.
    pub fn record_count_estimate(&self) -> u64 {
        self.mft_offset() / self.boot.record_size() as u64
    }

    /// Reads record `number` of the MFT with its fixups applied.
    ///
    /// A short read, an offset past the address space, a missing `FILE`
    /// signature or a torn record all mean "no record" and yield `Ok(None)`.
    pub fn read_mft_record(&mut self, number: u64) -> Result<Option<MftRecord>, NtfsError> {
        let size = self.boot.record_size() as u64;
        let Some(offset) = number
            .checked_mul(size)
            .and_then(|rel| rel.checked_add(self.mft_offset()))
        else {
            return Ok(None);
        };

        let bytes = match self.reader.read_bytes(offset, size as usize) {
            Ok(bytes) => bytes,
            Err(BlockError::ShortRead { .. } | BlockError::OutOfRange { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let Some(mut mft_record) = MftRecord::new(number, bytes) else {
            return Ok(None);
        };
        if let Err(err) = mft_record.apply_fixup() {
            self.sink.warn(&err.to_string());
            return Ok(None);
        }
        Ok(Some(mft_record))
    }

    /// Scans the MFT into the file table.
    ///
    /// Records are read in batches of `options.batch_records` slots and each
    /// batch is parsed on a bounded worker pool. Results are kept in record
    /// order. Cancellation is checked between batches; a cancelled scan keeps
    /// the entries parsed so far but leaves the tree unresolved.
    ///
    /// # Errors
    /// - `NtfsError::ThreadPool` if the workers cannot be started
    /// - `NtfsError::Block` if a read fails for a reason other than the end
    ///   of the image
    pub fn scan(&mut self, options: &ScanOptions, cancel: &CancelToken) -> Result<ScanReport, NtfsError> {
        self.files.clear();
        self.tree = None;

        let total = options
            .record_limit
            .unwrap_or_else(|| self.record_count_estimate());
        let record_size = self.boot.record_size() as usize;
        let mft_offset = self.mft_offset();
        let batch = options.batch_records.max(1) as u64;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.threads.unwrap_or(0))
            .build()
            .map_err(|err| NtfsError::ThreadPool(err.to_string()))?;

        let mut report = ScanReport::default();
        let mut next = 0u64;

        while next < total {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let count = batch.min(total - next);
            let Some(offset) = next
                .checked_mul(record_size as u64)
                .and_then(|rel| rel.checked_add(mft_offset))
            else {
                report.truncated = true;
                break;
            };
            let buf = self
                .reader
                .read_up_to(offset, (count as usize).saturating_mul(record_size))?;
            let whole = (buf.len() / record_size) as u64;

            let sink = self.sink.as_ref();
            let first = next;
            let parsed: Vec<Option<NtfsFileEntry>> = pool.install(|| {
                buf.par_chunks_exact(record_size)
                    .enumerate()
                    .map(|(i, slot)| decode_slot(first + i as u64, slot, sink))
                    .collect()
            });

            report.examined += whole;
            for entry in parsed {
                match entry {
                    Some(entry) => {
                        self.files.push(entry);
                        report.parsed += 1;
                    }
                    None => report.skipped += 1,
                }
            }

            next += whole;
            if whole < count {
                report.truncated = true;
                break;
            }
        }

        self.sink.info(&format!(
            "Scanned {} valid files out of {} MFT records ({} skipped){}",
            report.parsed,
            report.examined,
            report.skipped,
            if report.cancelled { ", cancelled" } else { "" }
        ));
        if report.truncated {
            self.sink.warn(&format!(
                "MFT ended after {} of {total} estimated records",
                report.examined
            ));
        }

        Ok(report)
    }

    /// Scans the whole MFT with default options and resolves the tree.
    pub fn scan_volume(&mut self) -> Result<ScanReport, NtfsError> {
        let report = self.scan(&ScanOptions::default(), &CancelToken::new())?;
        self.resolve_tree();
        Ok(report)
    }

    /// Links every entry of the file table to its parent.
    ///
    /// Record 5 is the root. Entries that cannot be reached from it, because
    /// their parent is missing or their parents form a cycle, are collected
    /// as orphans.
    pub fn resolve_tree(&mut self) {
        let mut tree = FileTree::default();

        for (pos, entry) in self.files.iter().enumerate() {
            tree.index.entry(entry.record_number()).or_insert(pos);
        }
        for (pos, entry) in self.files.iter().enumerate() {
            if entry.parent_ref() == entry.record_number() {
                continue;
            }
            tree.children.entry(entry.parent_ref()).or_default().push(pos);
        }

        let mut reachable = HashSet::from([NTFS_ROOT_RECORD]);
        let mut queue = VecDeque::from([NTFS_ROOT_RECORD]);
        while let Some(dir) = queue.pop_front() {
            for &pos in tree.children.get(&dir).into_iter().flatten() {
                let number = self.files[pos].record_number();
                if reachable.insert(number) {
                    queue.push_back(number);
                }
            }
        }

        tree.orphans = self
            .files
            .iter()
            .enumerate()
            .filter(|(_, entry)| !reachable.contains(&entry.record_number()))
            .map(|(pos, _)| pos)
            .collect();

        if !tree.orphans.is_empty() {
            self.sink.warn(&format!(
                "{} entries are not reachable from the root directory",
                tree.orphans.len()
            ));
        }

        self.tree = Some(tree);
    }

    pub fn is_resolved(&self) -> bool {
        self.tree.is_some()
    }

    /// Every entry found by the last scan, in record order.
    pub fn files(&self) -> &[NtfsFileEntry] {
        &self.files
    }

    /// Looks up an entry by record number.
    pub fn entry(&self, number: u64) -> Option<&NtfsFileEntry> {
        match &self.tree {
            Some(tree) => tree.index.get(&number).map(|&pos| &self.files[pos]),
            None => self.files.iter().find(|e| e.record_number() == number),
        }
    }

    /// Children of the directory `number`, deleted entries included.
    ///
    /// # Errors
    /// - `NtfsError::TreeNotResolved` before [`NtfsVolume::resolve_tree`]
    pub fn children(&self, number: u64) -> Result<Vec<&NtfsFileEntry>, NtfsError> {
        let tree = self.tree.as_ref().ok_or(NtfsError::TreeNotResolved)?;
        Ok(tree
            .children
            .get(&number)
            .into_iter()
            .flatten()
            .map(|&pos| &self.files[pos])
            .collect())
    }

    /// Entries not reachable from the root.
    pub fn orphans(&self) -> Result<Vec<&NtfsFileEntry>, NtfsError> {
        let tree = self.tree.as_ref().ok_or(NtfsError::TreeNotResolved)?;
        Ok(tree.orphans.iter().map(|&pos| &self.files[pos]).collect())
    }

    /// Builds the full path of record `number` by walking up its parents.
    ///
    /// Paths whose parent chain breaks or loops are rooted at `/<orphan>`.
    pub fn entry_path(&self, number: u64) -> Option<String> {
        let mut entry = self.entry(number)?;
        let mut parts = vec![];
        let mut seen = HashSet::new();

        let rooted = loop {
            if entry.record_number() == NTFS_ROOT_RECORD {
                break true;
            }
            if !seen.insert(entry.record_number()) {
                break false;
            }
            parts.push(entry.name().to_string());
            match self.entry(entry.parent_ref()) {
                Some(parent) => entry = parent,
                None => break false,
            }
        };

        parts.reverse();
        let prefix = if rooted { "" } else { "/<orphan>" };
        Some(format!("{prefix}/{}", parts.join("/")))
    }

    /// Entries whose name contains `needle`, ignoring ASCII case.
    pub fn find_by_name(&self, needle: &str) -> Vec<&NtfsFileEntry> {
        let needle = needle.to_ascii_lowercase();
        self.files
            .iter()
            .filter(|e| e.name().to_ascii_lowercase().contains(&needle))
            .collect()
    }

    /// Record 5 with its "." name cleared, or a stand-in if it was not found.
    pub fn root(&self) -> NtfsFileEntry {
        match self.entry(NTFS_ROOT_RECORD) {
            Some(root) => {
                let mut root = root.clone();
                root.clear_name();
                root
            }
            None => NtfsFileEntry::synthetic_root(NTFS_ROOT_RECORD),
        }
    }

    /// Resolves a path from the root directory. Deleted entries are not matched.
    ///
    /// # Errors
    /// - `NtfsError::TreeNotResolved` before the tree has been resolved
    pub fn resolve_path(&mut self, path: &str) -> Result<Option<NtfsFileEntry>, NtfsError> {
        let mut current = self.root();

        for segment in traits::path_segments(path) {
            if !current.is_dir() {
                return Ok(None);
            }
            let lookup = self.options.lookup;
            let found = self
                .children(current.record_number())?
                .into_iter()
                .find(|e| e.in_use() && lookup.matches(segment, e.name()))
                .cloned();

            match found {
                Some(entry) => current = entry,
                None => return Ok(None),
            }
        }

        if self.tree.is_none() {
            return Err(NtfsError::TreeNotResolved);
        }
        Ok(Some(current))
    }

    /// Lists the live children of a directory.
    pub fn list_directory(&self, entry: &NtfsFileEntry) -> Result<Vec<NtfsFileEntry>, NtfsError> {
        if !entry.is_directory() {
            return Err(NtfsError::NotADirectory(entry.name().to_string()));
        }
        Ok(self
            .children(entry.record_number())?
            .into_iter()
            .filter(|e| e.in_use())
            .cloned()
            .collect())
    }

    /// Reads the unnamed `$DATA` stream of a file.
    ///
    /// Resident content is returned as is. Non-resident content is read
    /// through its data runs, sparse runs reading as zeros, and truncated to
    /// the stream's real size. Directories, compressed or encrypted streams,
    /// records without `$DATA` and streams declaring more bytes than the
    /// whole image come back as [`FileContent::Unsupported`].
    pub fn read_file_content(&mut self, entry: &NtfsFileEntry) -> Result<FileContent, NtfsError> {
        if entry.is_directory() {
            return Ok(FileContent::Unsupported(format!("`{}` is a directory", entry.name())));
        }

        let (real_size, runs) = match entry.data() {
            None => {
                return Ok(FileContent::Unsupported(format!(
                    "`{}` has no unnamed $DATA stream",
                    entry.name()
                )));
            }
            Some(DataBody::Resident(bytes)) => return Ok(FileContent::Data(bytes.clone())),
            Some(DataBody::NonResident { compressed: true, .. }) => {
                return Ok(FileContent::Unsupported(format!(
                    "`{}` is compressed or encrypted",
                    entry.name()
                )));
            }
            Some(DataBody::NonResident {
                real_size, runs, ..
            }) => (*real_size, runs),
        };

        let image_bytes = self.reader.stream_len()?;
        if real_size > image_bytes {
            return Ok(FileContent::Unsupported(format!(
                "`{}` declares {real_size} bytes, more than the {image_bytes} bytes of the image",
                entry.name()
            )));
        }

        let cluster = self.boot.bytes_per_cluster();
        let volume_bytes = self.boot.volume_bytes();
        let mut data = vec![];

        for run in runs {
            let remaining = real_size - data.len() as u64;
            if remaining == 0 {
                break;
            }
            let to_read = run.length.saturating_mul(cluster).min(remaining);

            match run.lcn {
                None => data.resize(data.len() + to_read as usize, 0),
                Some(lcn) => {
                    let start = lcn.saturating_mul(cluster);
                    if start.saturating_add(to_read) > volume_bytes {
                        self.sink.warn(&format!(
                            "`{}`: run at cluster {lcn} lies outside the volume",
                            entry.name()
                        ));
                        break;
                    }
                    data.extend(self.reader.read_bytes(start, to_read as usize)?);
                }
            }
        }

        if (data.len() as u64) < real_size {
            self.sink.warn(&format!(
                "`{}` declares {real_size} bytes but its runs only hold {}",
                entry.name(),
                data.len()
            ));
        }

        Ok(FileContent::Data(data))
    }
}

impl<R: Read + Seek> Explorer for NtfsVolume<R> {
    type Entry = NtfsFileEntry;
    type Error = NtfsError;

    fn root(&self) -> NtfsFileEntry {
        NtfsVolume::root(self)
    }

    fn resolve_path(&mut self, path: &str) -> Result<Option<NtfsFileEntry>, NtfsError> {
        NtfsVolume::resolve_path(self, path)
    }

    fn list_directory(&mut self, entry: &NtfsFileEntry) -> Result<Vec<NtfsFileEntry>, NtfsError> {
        NtfsVolume::list_directory(self, entry)
    }

    fn read_file_content(&mut self, entry: &NtfsFileEntry) -> Result<FileContent, NtfsError> {
        NtfsVolume::read_file_content(self, entry)
    }
}

impl<R: Read + Seek> LayoutDisplay for NtfsVolume<R> {
    fn display_layout(&self, indent: u8) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        let indent = " ".repeat(indent.into());
        let boot = &self.boot;

        writeln!(out, "{}┌{:─^45}┐", indent, " NTFS Boot Sector ")?;
        let rows: [(&str, String); 10] = [
            ("OEM ID", String::from_utf8_lossy(boot.oem_id()).trim_end().to_string()),
            ("Bytes per sector", boot.bytes_per_sector().to_string()),
            ("Sectors per cluster", boot.sectors_per_cluster().to_string()),
            ("Bytes per cluster", boot.bytes_per_cluster().to_string()),
            ("Total sectors", boot.total_sectors().to_string()),
            ("MFT cluster", boot.mft_cluster().to_string()),
            ("MFT mirror cluster", boot.mft_mirror_cluster().to_string()),
            ("MFT record size", boot.record_size().to_string()),
            ("Volume serial", format!("{:016X}", boot.serial())),
            ("Partition start", format!("byte {}", self.reader.base())),
        ];
        for (name, value) in rows {
            writeln!(out, "{}│{:<22}│{:>22}│", indent, name, value)?;
        }
        writeln!(out, "{}└{:─<22}┴{:─<22}┘", indent, "", "")?;

        Ok(out)
    }
}
