//! MFT records and the file entries decoded from them.

use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use std::fmt;

use super::attribute::{Attribute, AttributeType, DataBody, RawAttribute};
use super::ntfs_error::NtfsError;
use crate::diagnostics::DiagnosticSink;
use crate::traits::FsEntry;
use crate::utils::u16_at;

/// Signature opening every allocated MFT record.
pub const FILE_SIGNATURE: &[u8; 4] = b"FILE";

/// Shortest buffer holding a usable record header.
pub const MIN_RECORD_LEN: usize = 42;

const HEADER_FLAG_IN_USE: u16 = 0x0001;
const HEADER_FLAG_DIRECTORY: u16 = 0x0002;

/// One raw MFT record.
#[derive(Debug, Clone)]
pub struct MftRecord {
    number: u64,
    bytes: Vec<u8>,
}

impl MftRecord {
    /// Wraps the bytes of record `number`.
    ///
    /// Returns `None` when the buffer is too short or lacks the `FILE`
    /// signature: that is how an unallocated slot looks, not an error.
    pub fn new(number: u64, bytes: Vec<u8>) -> Option<Self> {
        if bytes.len() < MIN_RECORD_LEN || !bytes.starts_with(FILE_SIGNATURE) {
            return None;
        }
        Some(Self { number, bytes })
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn flags(&self) -> u16 {
        u16_at(&self.bytes, 22).unwrap_or(0)
    }

    pub fn in_use(&self) -> bool {
        self.flags() & HEADER_FLAG_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags() & HEADER_FLAG_DIRECTORY != 0
    }

    /// Restores the sector tails saved in the update sequence array.
    ///
    /// The last two bytes of every stride of the record hold the update
    /// sequence number; the real bytes live in the array. The stride is the
    /// record length divided by the number of protected strides.
    ///
    /// # Errors
    /// - `NtfsError::TornRecord` if a tail does not hold the sequence number
    pub fn apply_fixup(&mut self) -> Result<(), NtfsError> {
        let usa_offset = u16_at(&self.bytes, 4).unwrap_or(0) as usize;
        let usa_count = u16_at(&self.bytes, 6).unwrap_or(0) as usize;

        if usa_count < 2 || usa_offset + usa_count * 2 > self.bytes.len() {
            return Ok(());
        }
        let stride = self.bytes.len() / (usa_count - 1);
        if stride < 2 {
            return Ok(());
        }

        let check = [self.bytes[usa_offset], self.bytes[usa_offset + 1]];
        for sector in 1..usa_count {
            let tail = sector * stride - 2;
            if self.bytes[tail..tail + 2] != check {
                return Err(NtfsError::TornRecord {
                    record: self.number,
                    sector,
                });
            }
            let saved = usa_offset + sector * 2;
            self.bytes[tail] = self.bytes[saved];
            self.bytes[tail + 1] = self.bytes[saved + 1];
        }

        Ok(())
    }
}

/// A file or directory decoded from one MFT record.
#[derive(Debug, Clone, PartialEq, Getters, CopyGetters)]
pub struct NtfsFileEntry {
    name: String,
    #[getset(get_copy = "pub")]
    record_number: u64,
    #[getset(get_copy = "pub")]
    parent_ref: u64,
    #[getset(get_copy = "pub")]
    size: u64,
    #[getset(get_copy = "pub")]
    created: Option<DateTime<Utc>>,
    #[getset(get_copy = "pub")]
    modified: Option<DateTime<Utc>>,
    #[getset(get_copy = "pub")]
    accessed: Option<DateTime<Utc>>,
    #[getset(get_copy = "pub")]
    is_directory: bool,
    #[getset(get_copy = "pub")]
    in_use: bool,
    /// Attribute types seen in the record, in first-seen order.
    #[getset(get = "pub")]
    attributes: Vec<AttributeType>,
    /// Content of the unnamed `$DATA` stream.
    #[getset(get = "pub")]
    data: Option<DataBody>,
}

impl NtfsFileEntry {
    /// An entry standing in for the root when record 5 was not found.
    pub(crate) fn synthetic_root(record_number: u64) -> Self {
        Self {
            name: String::new(),
            record_number,
            parent_ref: record_number,
            size: 0,
            created: None,
            modified: None,
            accessed: None,
            is_directory: true,
            in_use: true,
            attributes: vec![],
            data: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn clear_name(&mut self) {
        self.name.clear();
    }
}

impl FsEntry for NtfsFileEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_dir(&self) -> bool {
        self.is_directory
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn id(&self) -> u64 {
        self.record_number
    }
}

impl fmt::Display for NtfsFileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let created = self
            .created
            .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| String::from("N/A"));
        write!(
            f,
            "{:<8} {:<4} {:>12} {:<16} {}{}",
            self.record_number,
            if self.is_directory { "DIR" } else { "FILE" },
            self.size,
            created,
            self.name,
            if self.in_use { "" } else { " (deleted)" }
        )
    }
}

/// Decodes the attribute list of `record` into a file entry.
///
/// Walking stops at the list terminator, at a zero length, or at the first
/// attribute that does not fit in the record; in that last case what was
/// decoded so far is kept. A record without a `$FILE_NAME` yields `None`.
pub fn parse_record(record: &MftRecord, sink: &dyn DiagnosticSink) -> Option<NtfsFileEntry> {
    let bytes = record.bytes();
    let number = record.number();

    let mut name: Option<String> = None;
    let mut parent_ref = 0;
    let mut fn_directory = false;
    let mut times = (None, None, None);
    let mut data: Option<DataBody> = None;
    let mut attributes: Vec<AttributeType> = vec![];

    let mut offset = u16_at(bytes, 20)? as usize;
    loop {
        let Some(raw) = RawAttribute::at(bytes, offset) else {
            if !RawAttribute::is_terminator(bytes, offset) {
                sink.warn(&format!(
                    "record {number}: malformed attribute at offset {offset}, keeping what was parsed"
                ));
            }
            break;
        };

        if !attributes.contains(&raw.kind) {
            attributes.push(raw.kind);
        }

        match raw.decode() {
            Some(Attribute::StandardInformation {
                created,
                modified,
                accessed,
            }) => times = (created, modified, accessed),
            Some(Attribute::FileName(fname)) => {
                if name.is_none() {
                    parent_ref = fname.parent_ref;
                    fn_directory = fname.is_directory();
                    name = Some(fname.name);
                }
            }
            Some(Attribute::Data { stream, body }) => {
                if stream.is_empty() && data.is_none() {
                    data = Some(body);
                }
            }
            Some(Attribute::Other(_)) => {}
            None => sink.debug(&format!(
                "record {number}: {} attribute at offset {offset} is too short to decode",
                raw.kind
            )),
        }

        offset += raw.len();
    }

    Some(NtfsFileEntry {
        name: name?,
        record_number: number,
        parent_ref,
        size: data.as_ref().map_or(0, DataBody::size),
        created: times.0,
        modified: times.1,
        accessed: times.2,
        is_directory: fn_directory || record.is_directory(),
        in_use: record.in_use(),
        attributes,
        data,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use crate::ntfs::attribute::tests::{file_name, non_resident_data, resident};
    use log::Level;

    pub(crate) const RECORD_SIZE: usize = 1024;

    /// Assembles a 1024-byte record from attribute blobs.
    ///
    /// The update sequence array sits at offset 48 and covers both 512-byte
    /// strides; attributes start at 56.
    pub(crate) fn record_bytes(flags: u16, attrs: &[Vec<u8>]) -> Vec<u8> {
        let mut rec = vec![0u8; RECORD_SIZE];
        rec[0..4].copy_from_slice(FILE_SIGNATURE);
        rec[4..6].copy_from_slice(&48u16.to_le_bytes());
        rec[6..8].copy_from_slice(&3u16.to_le_bytes());
        rec[20..22].copy_from_slice(&56u16.to_le_bytes());
        rec[22..24].copy_from_slice(&flags.to_le_bytes());

        let mut offset = 56;
        for attr in attrs {
            rec[offset..offset + attr.len()].copy_from_slice(attr);
            offset += attr.len();
        }
        rec[offset..offset + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());

        // Protect both stride tails with update sequence number 0x0001.
        for stride in 1..3 {
            let tail = stride * 512 - 2;
            let saved = 48 + stride * 2;
            rec[saved] = rec[tail];
            rec[saved + 1] = rec[tail + 1];
            rec[tail] = 0x01;
            rec[tail + 1] = 0x00;
        }
        rec[48] = 0x01;
        rec[49] = 0x00;
        rec
    }

    pub(crate) fn standard_information() -> Vec<u8> {
        let mut content = vec![0u8; 72];
        // 2024-01-01 00:00:00 UTC
        content[24..32].copy_from_slice(&133_485_408_000_000_000u64.to_le_bytes());
        content[32..40].copy_from_slice(&133_485_408_000_000_000u64.to_le_bytes());
        resident(0x10, &content)
    }

    fn parse(bytes: Vec<u8>) -> (Option<NtfsFileEntry>, MemorySink) {
        let sink = MemorySink::new();
        let mut record = MftRecord::new(30, bytes).unwrap();
        record.apply_fixup().unwrap();
        (parse_record(&record, &sink), sink)
    }

    #[test]
    fn unallocated_slots_are_not_records() {
        assert!(MftRecord::new(0, vec![0u8; RECORD_SIZE]).is_none());
        assert!(MftRecord::new(0, b"FILE".to_vec()).is_none());
    }

    #[test]
    fn resident_data_sets_size() {
        let (entry, _) = parse(record_bytes(
            0x01,
            &[
                standard_information(),
                resident(0x30, &file_name(5, "small.txt", false)),
                resident(0x80, &[b'x'; 100]),
            ],
        ));
        let entry = entry.unwrap();
        assert_eq!(entry.name(), "small.txt");
        assert_eq!(entry.size(), 100);
        assert_eq!(entry.parent_ref(), 5);
        assert!(entry.in_use());
        assert!(!entry.is_directory());
        assert_eq!(
            entry.created().map(|d| d.format("%Y-%m-%d").to_string()),
            Some(String::from("2024-01-01"))
        );
        assert_eq!(
            entry.attributes(),
            &vec![AttributeType::StandardInformation, AttributeType::FileName, AttributeType::Data]
        );
    }

    #[test]
    fn non_resident_data_uses_real_size() {
        let (entry, _) = parse(record_bytes(
            0x01,
            &[
                resident(0x30, &file_name(5, "big.bin", false)),
                non_resident_data(5_000_000, &[0x21, 0x10, 0x00, 0x01], 0),
            ],
        ));
        assert_eq!(entry.unwrap().size(), 5_000_000);
    }

    #[test]
    fn first_file_name_wins() {
        let (entry, _) = parse(record_bytes(
            0x03,
            &[
                resident(0x30, &file_name(5, "Long Directory Name", true)),
                resident(0x30, &file_name(7, "LONGDI~1", true)),
            ],
        ));
        let entry = entry.unwrap();
        assert_eq!(entry.name(), "Long Directory Name");
        assert_eq!(entry.parent_ref(), 5);
        assert!(entry.is_directory());
        assert_eq!(entry.attributes(), &vec![AttributeType::FileName]);
    }

    #[test]
    fn named_streams_are_only_tagged() {
        // Stream name "Z" stored after the content.
        let mut named = resident(0x80, b"zone");
        named.extend([b'Z', 0, 0, 0, 0, 0, 0, 0]);
        let len = named.len() as u32;
        named[4..8].copy_from_slice(&len.to_le_bytes());
        named[9] = 1;
        named[10..12].copy_from_slice(&((len - 8) as u16).to_le_bytes());

        let (entry, _) = parse(record_bytes(
            0x01,
            &[
                resident(0x30, &file_name(5, "a.txt", false)),
                named,
                resident(0x80, b"main"),
            ],
        ));
        let entry = entry.unwrap();
        assert_eq!(entry.size(), 4);
        assert_eq!(entry.data(), &Some(DataBody::Resident(b"main".to_vec())));
    }

    #[test]
    fn overrunning_attribute_keeps_earlier_ones() {
        let mut broken = resident(0x80, &[0u8; 16]);
        broken[4..8].copy_from_slice(&4000u32.to_le_bytes());
        let (entry, sink) = parse(record_bytes(
            0x01,
            &[resident(0x30, &file_name(5, "kept.txt", false)), broken],
        ));
        let entry = entry.unwrap();
        assert_eq!(entry.name(), "kept.txt");
        assert_eq!(entry.size(), 0);
        assert_eq!(sink.at_level(Level::Warn).len(), 1);
    }

    #[test]
    fn record_without_file_name_is_skipped() {
        let (entry, _) = parse(record_bytes(0x01, &[standard_information()]));
        assert!(entry.is_none());
    }

    #[test]
    fn deleted_records_stay_visible() {
        let (entry, _) = parse(record_bytes(
            0x00,
            &[resident(0x30, &file_name(5, "gone.doc", false))],
        ));
        assert!(!entry.unwrap().in_use());
    }

    #[test]
    fn torn_record_is_detected() {
        let mut bytes = record_bytes(0x01, &[resident(0x30, &file_name(5, "x", false))]);
        bytes[1022] = 0x02;
        let mut record = MftRecord::new(9, bytes).unwrap();
        assert!(matches!(
            record.apply_fixup(),
            Err(NtfsError::TornRecord { record: 9, sector: 2 })
        ));
    }
}
