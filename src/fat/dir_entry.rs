//! FAT32 directory entry structure and parsing.
//!
//! Each directory entry is 32 bytes. A regular (8.3) entry may be preceded by
//! long file name fragments, stored last fragment first, which together carry
//! the entry's full UTF-16 name.

use binread::{BinRead, BinReaderExt};
use chrono::{NaiveDate, NaiveDateTime};
use getset::{CopyGetters, Getters};
use std::fmt;
use std::io;

use super::fat_error::FATError;
use crate::constants::DIR_ENTRY_SIZE;
use crate::diagnostics::DiagnosticSink;
use crate::traits::FsEntry;
use crate::utils::{self, ATTR_ARCHIVE, ATTR_DIRECTORY, ATTR_LONG_NAME, ATTR_VOLUME_ID};

/// First name byte marking the end of a directory.
pub const END_OF_DIRECTORY: u8 = 0x00;
/// First name byte marking a deleted entry.
pub const DELETED_ENTRY: u8 = 0xE5;
/// First name byte standing for a real 0xE5 lead character.
const KANJI_LEAD: u8 = 0x05;
/// Bit set in the sequence number of the last (first stored) LFN fragment.
const LAST_LFN_FRAGMENT: u8 = 0x40;

/// On-disk layout of a regular 32-byte directory entry.
#[derive(BinRead, Debug, Clone)]
#[br(little)]
struct RawDirEntry {
    /// Filename in 8.3 format, space padded
    name: [u8; 11],
    attr: u8,
    _n_t_res: u8,
    _crt_time_tenth: u8,
    crt_time: u16,
    crt_date: u16,
    lst_acc_date: u16,
    fst_clus_hi: u16,
    wrt_time: u16,
    wrt_date: u16,
    fst_clus_lo: u16,
    file_size: u32,
}

impl RawDirEntry {
    fn from_slice(buf: &[u8]) -> Result<Self, FATError> {
        let mut reader = io::Cursor::new(buf);
        reader.read_le().map_err(FATError::from)
    }

    /// Decodes the 8.3 name as `name.ext`, lower-cased.
    fn short_name(&self) -> String {
        let mut raw = self.name;
        if raw[0] == KANJI_LEAD {
            raw[0] = DELETED_ENTRY;
        }

        let decode = |bytes: &[u8]| -> String {
            bytes
                .iter()
                .map(|b| *b as char)
                .collect::<String>()
                .trim_end()
                .to_lowercase()
        };
        let base = decode(&raw[0..8]);
        let ext = decode(&raw[8..11]);

        if ext.is_empty() {
            base
        } else {
            format!("{base}.{ext}")
        }
    }

    fn cluster_number(&self) -> u32 {
        ((self.fst_clus_hi as u32) << 16) | self.fst_clus_lo as u32
    }
}

/// Checksum of an 8.3 name, as stored in each of its LFN fragments.
pub fn lfn_checksum(short_name: &[u8; 11]) -> u8 {
    short_name
        .iter()
        .fold(0u8, |sum, b| ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(*b))
}

/// One long file name fragment (attribute 0x0F).
#[derive(Debug, Clone, Copy)]
pub struct LfnFragment {
    raw: [u8; DIR_ENTRY_SIZE],
}

impl LfnFragment {
    /// Wraps a 32-byte slot holding a long file name fragment.
    pub fn from_slot(slot: &[u8]) -> Option<Self> {
        let raw: [u8; DIR_ENTRY_SIZE] = slot.get(..DIR_ENTRY_SIZE)?.try_into().ok()?;
        Some(Self { raw })
    }

    /// Sequence number (1-based) of this fragment within the name.
    pub fn sequence(&self) -> u8 {
        self.raw[0] & !LAST_LFN_FRAGMENT & 0x1F
    }

    pub fn checksum(&self) -> u8 {
        self.raw[13]
    }

    /// The 13 UTF-16 code units carried by this fragment, as raw bytes.
    fn name_bytes(&self) -> impl Iterator<Item = &u8> {
        self.raw[1..11]
            .iter()
            .chain(self.raw[14..26].iter())
            .chain(self.raw[28..32].iter())
    }
}

/// Rebuilds a long name from its fragments.
///
/// Fragments are ordered by ascending sequence number whatever order they
/// are given in, then decoded as UTF-16 up to the first NUL.
pub fn reconstruct_long_name(fragments: &[LfnFragment]) -> String {
    let mut ordered: Vec<&LfnFragment> = fragments.iter().collect();
    ordered.sort_by_key(|f| f.sequence());

    let bytes: Vec<u8> = ordered
        .iter()
        .flat_map(|f| f.name_bytes().copied())
        .collect();
    utils::utf16le_string(&bytes)
}

/// A decoded FAT32 directory entry.
///
/// Entries are plain values: they keep no reference to the volume they came from.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct DirectoryEntry {
    /// Long name when present, otherwise the lower-cased 8.3 name
    name: String,
    /// The raw 8.3 name as stored
    #[getset(get = "pub")]
    short_name: [u8; 11],
    #[getset(get_copy = "pub")]
    attr: u8,
    #[getset(get_copy = "pub")]
    first_cluster: u32,
    #[getset(get_copy = "pub")]
    file_size: u32,
    /// First name byte as stored (0xE5 for deleted entries)
    #[getset(get_copy = "pub")]
    marker: u8,
    #[getset(get_copy = "pub")]
    crt_date: u16,
    #[getset(get_copy = "pub")]
    crt_time: u16,
    #[getset(get_copy = "pub")]
    wrt_date: u16,
    #[getset(get_copy = "pub")]
    wrt_time: u16,
    #[getset(get_copy = "pub")]
    lst_acc_date: u16,
}

impl DirectoryEntry {
    /// The synthetic entry standing for the root directory.
    pub fn root(root_cluster: u32) -> Self {
        Self {
            name: String::new(),
            short_name: [b' '; 11],
            attr: ATTR_DIRECTORY,
            first_cluster: root_cluster,
            file_size: 0,
            marker: 0,
            crt_date: 0,
            crt_time: 0,
            wrt_date: 0,
            wrt_time: 0,
            lst_acc_date: 0,
        }
    }

    /// Decodes a regular 32-byte entry, naming it with `long_name` when one was rebuilt.
    pub fn from_slot(slot: &[u8], long_name: Option<String>) -> Result<Self, FATError> {
        let raw = RawDirEntry::from_slice(slot)?;
        let name = long_name.unwrap_or_else(|| raw.short_name());

        Ok(Self {
            name,
            short_name: raw.name,
            attr: raw.attr,
            first_cluster: raw.cluster_number(),
            file_size: raw.file_size,
            marker: raw.name[0],
            crt_date: raw.crt_date,
            crt_time: raw.crt_time,
            wrt_date: raw.wrt_date,
            wrt_time: raw.wrt_time,
            lst_acc_date: raw.lst_acc_date,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    pub fn is_deleted(&self) -> bool {
        self.marker == DELETED_ENTRY
    }

    /// Whether the attribute mask is exactly "archive": a plain readable file.
    pub fn is_plain_archive(&self) -> bool {
        const KNOWN: u8 = 0x3F & !ATTR_VOLUME_ID;
        self.attr & KNOWN == ATTR_ARCHIVE
    }

    pub fn created(&self) -> Option<NaiveDateTime> {
        utils::fat_datetime(self.crt_date, self.crt_time)
    }

    pub fn modified(&self) -> Option<NaiveDateTime> {
        utils::fat_datetime(self.wrt_date, self.wrt_time)
    }

    pub fn accessed(&self) -> Option<NaiveDate> {
        utils::fat_date(self.lst_acc_date)
    }
}

impl FsEntry for DirectoryEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_dir(&self) -> bool {
        DirectoryEntry::is_dir(self)
    }

    fn size(&self) -> u64 {
        self.file_size as u64
    }

    fn id(&self) -> u64 {
        self.first_cluster as u64
    }
}

impl fmt::Display for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" [{}] {}B",
            self.name,
            utils::describe_attributes(self.attr),
            self.file_size
        )
    }
}

fn is_dot_entry(slot: &[u8]) -> bool {
    slot.first() == Some(&b'.') && slot.get(11).is_some_and(|a| a & ATTR_DIRECTORY != 0)
}

/// Decodes the raw content of a directory.
///
/// The first two slots of a subdirectory hold "." and ".."; they are skipped
/// when they are dot entries and decoded like any other slot otherwise (the
/// root directory has no dot entries). LFN fragments are
/// buffered until the regular entry they belong to. A 0x00 first byte ends
/// the directory, 0xE5 entries and the volume label are left out.
pub fn decode_directory(
    buffer: &[u8],
    sink: &dyn DiagnosticSink,
) -> Result<Vec<DirectoryEntry>, FATError> {
    let mut entries = vec![];
    let mut fragments: Vec<LfnFragment> = vec![];

    for (idx, slot) in buffer.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
        if idx < 2 && is_dot_entry(slot) {
            continue;
        }

        let marker = slot[0];
        if marker == END_OF_DIRECTORY {
            break;
        }

        if slot[11] == ATTR_LONG_NAME {
            if marker == DELETED_ENTRY {
                fragments.clear();
            } else if let Some(fragment) = LfnFragment::from_slot(slot) {
                // Stored last fragment first, so each new one goes in front.
                fragments.insert(0, fragment);
            }
            continue;
        }

        let long_name = if fragments.is_empty() {
            None
        } else {
            let short: [u8; 11] = slot[0..11].try_into().unwrap_or([b' '; 11]);
            let expected = lfn_checksum(&short);
            if fragments.iter().any(|f| f.checksum() != expected) {
                sink.warn(&format!(
                    "LFN checksum mismatch for short name {:?} (expected 0x{expected:02X})",
                    String::from_utf8_lossy(&short)
                ));
            }
            let name = reconstruct_long_name(&fragments);
            fragments.clear();
            Some(name)
        };

        if marker == DELETED_ENTRY || slot[11] & ATTR_VOLUME_ID != 0 {
            continue;
        }

        entries.push(DirectoryEntry::from_slot(slot, long_name)?);
    }

    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;

    /// Builds a regular 32-byte entry.
    pub(crate) fn short_slot(name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> Vec<u8> {
        let mut slot = vec![0u8; 32];
        slot[0..11].copy_from_slice(name);
        slot[11] = attr;
        slot[14..16].copy_from_slice(&0x6000u16.to_le_bytes());
        slot[16..18].copy_from_slice(&0x0021u16.to_le_bytes());
        slot[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
        slot[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
        slot[28..32].copy_from_slice(&size.to_le_bytes());
        slot
    }

    /// Builds the LFN fragments for `long`, in on-disk order (last fragment first).
    pub(crate) fn lfn_slots(long: &str, short: &[u8; 11]) -> Vec<Vec<u8>> {
        let mut units: Vec<u16> = long.encode_utf16().collect();
        if units.len() % 13 != 0 {
            units.push(0);
        }
        while units.len() % 13 != 0 {
            units.push(0xFFFF);
        }

        let checksum = lfn_checksum(short);
        let count = units.len() / 13;
        let mut slots = vec![];
        for (i, chunk) in units.chunks(13).enumerate() {
            let mut slot = vec![0u8; 32];
            let mut seq = (i + 1) as u8;
            if i + 1 == count {
                seq |= LAST_LFN_FRAGMENT;
            }
            slot[0] = seq;
            slot[11] = ATTR_LONG_NAME;
            slot[13] = checksum;
            let bytes: Vec<u8> = chunk.iter().flat_map(|u| u.to_le_bytes()).collect();
            slot[1..11].copy_from_slice(&bytes[0..10]);
            slot[14..26].copy_from_slice(&bytes[10..22]);
            slot[28..32].copy_from_slice(&bytes[22..26]);
            slots.push(slot);
        }
        slots.reverse();
        slots
    }

    fn dots() -> Vec<u8> {
        let mut buf = short_slot(b".          ", ATTR_DIRECTORY, 5, 0);
        buf.extend(short_slot(b"..         ", ATTR_DIRECTORY, 0, 0));
        buf
    }

    #[test]
    fn short_names_are_lower_cased() {
        let mut buf = dots();
        buf.extend(short_slot(b"README  TXT", ATTR_ARCHIVE, 7, 12));
        buf.extend(short_slot(b"DOCS       ", ATTR_DIRECTORY, 8, 0));

        let entries = decode_directory(&buf, &MemorySink::new()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["readme.txt", "docs"]);
        assert_eq!(entries[0].first_cluster(), 7);
        assert_eq!(entries[0].file_size(), 12);
        assert!(entries[1].is_dir());
    }

    #[test]
    fn long_name_spanning_three_fragments() {
        let long = "Quarterly Financial Report 2024.xlsx";
        let short = b"QUARTE~1XLS";
        let mut buf = dots();
        for slot in lfn_slots(long, short) {
            buf.extend(slot);
        }
        buf.extend(short_slot(short, ATTR_ARCHIVE, 9, 4096));

        let sink = MemorySink::new();
        let entries = decode_directory(&buf, &sink).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), long);
        assert_eq!(entries[0].short_name(), short);
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn reconstruction_orders_by_sequence_and_stops_at_nul() {
        let short = b"HELLOW~1TXT";
        let stored = lfn_slots("hello world, long name.txt", short);
        let fragments: Vec<LfnFragment> = stored
            .iter()
            .map(|s| LfnFragment::from_slot(s).unwrap())
            .collect();

        // Descending (on-disk) order and ascending order give the same name.
        assert_eq!(reconstruct_long_name(&fragments), "hello world, long name.txt");
        let mut ascending = fragments.clone();
        ascending.reverse();
        assert_eq!(reconstruct_long_name(&ascending), "hello world, long name.txt");
    }

    #[test]
    fn checksum_mismatch_is_reported_but_name_kept() {
        let mut buf = dots();
        for slot in lfn_slots("notes for court.txt", b"NOTESF~1TXT") {
            buf.extend(slot);
        }
        buf.extend(short_slot(b"OTHER   TXT", ATTR_ARCHIVE, 4, 1));

        let sink = MemorySink::new();
        let entries = decode_directory(&buf, &sink).unwrap();
        assert_eq!(entries[0].name(), "notes for court.txt");
        assert_eq!(sink.at_level(log::Level::Warn).len(), 1);
    }

    #[test]
    fn deleted_entries_are_dropped_and_zero_ends_listing() {
        let mut buf = dots();
        buf.extend(short_slot(b"KEEP    TXT", ATTR_ARCHIVE, 3, 1));
        let mut deleted = short_slot(b"GONE    TXT", ATTR_ARCHIVE, 4, 1);
        deleted[0] = DELETED_ENTRY;
        buf.extend(deleted);
        buf.extend(vec![0u8; 32]);
        buf.extend(short_slot(b"HIDDEN  TXT", ATTR_ARCHIVE, 5, 1));

        let entries = decode_directory(&buf, &MemorySink::new()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["keep.txt"]);
    }

    #[test]
    fn zero_first_slot_ends_an_empty_root() {
        let mut buf = vec![0u8; 32];
        buf.extend(short_slot(b"STALE   TXT", ATTR_ARCHIVE, 3, 1));
        assert!(decode_directory(&buf, &MemorySink::new()).unwrap().is_empty());

        let mut buf = short_slot(b".          ", ATTR_DIRECTORY, 3, 0);
        buf.extend(vec![0u8; 32]);
        buf.extend(short_slot(b"STALE   TXT", ATTR_ARCHIVE, 4, 1));
        assert!(decode_directory(&buf, &MemorySink::new()).unwrap().is_empty());
    }

    #[test]
    fn deleted_long_name_does_not_leak_into_next_entry() {
        let short = b"SECRET~1DOC";
        let mut buf = dots();
        for mut slot in lfn_slots("secret plans.doc", short) {
            slot[0] = DELETED_ENTRY;
            buf.extend(slot);
        }
        let mut gone = short_slot(short, ATTR_ARCHIVE, 6, 10);
        gone[0] = DELETED_ENTRY;
        buf.extend(gone);
        buf.extend(short_slot(b"NEXT    TXT", ATTR_ARCHIVE, 7, 1));

        let entries = decode_directory(&buf, &MemorySink::new()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "next.txt");
    }

    #[test]
    fn root_keeps_first_slots_and_hides_volume_label() {
        let mut buf = short_slot(b"EVIDENCE   ", ATTR_VOLUME_ID, 0, 0);
        buf.extend(short_slot(b"FIRST   TXT", ATTR_ARCHIVE, 3, 1));
        buf.extend(short_slot(b"SECOND  TXT", ATTR_ARCHIVE, 4, 1));

        let entries = decode_directory(&buf, &MemorySink::new()).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["first.txt", "second.txt"]);
    }

    #[test]
    fn cluster_number_combines_both_halves() {
        let buf = short_slot(b"BIG     BIN", ATTR_ARCHIVE, 0x0001_0003, 1);
        let entry = DirectoryEntry::from_slot(&buf, None).unwrap();
        assert_eq!(entry.first_cluster(), 0x0001_0003);
        assert_eq!(entry.created().unwrap().to_string(), "1980-01-01 12:00:00");
    }

    #[test]
    fn plain_archive_detection() {
        let file = DirectoryEntry::from_slot(&short_slot(b"A       TXT", 0x20, 3, 1), None).unwrap();
        let ro = DirectoryEntry::from_slot(&short_slot(b"B       TXT", 0x21, 3, 1), None).unwrap();
        let dir = DirectoryEntry::from_slot(&short_slot(b"C          ", 0x10, 3, 0), None).unwrap();
        assert!(file.is_plain_archive());
        assert!(!ro.is_plain_archive());
        assert!(!dir.is_plain_archive());
    }
}
