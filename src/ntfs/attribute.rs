//! NTFS attribute decoding.
//!
//! An MFT record holds a list of typed attributes. Each one starts with a
//! common header, followed either by its content inline (resident) or by a
//! list of data runs pointing to clusters elsewhere on the volume
//! (non-resident).

use chrono::{DateTime, Utc};
use std::fmt;

use crate::utils::{ntfs_time, u8_at, u16_at, u32_at, u64_at, utf16le_string};

/// Type code terminating an attribute list.
pub const ATTR_END: u32 = 0xFFFF_FFFF;

/// File-Name flag marking a directory.
pub const FILE_NAME_DIRECTORY: u64 = 0x1000_0000;

/// Mask keeping the record number of a file reference.
pub const FILE_REFERENCE_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

const COMMON_HEADER_LEN: usize = 16;
const RESIDENT_HEADER_LEN: usize = 24;
const NON_RESIDENT_HEADER_LEN: usize = 0x40;

const FLAG_COMPRESSED: u16 = 0x0001;
const FLAG_ENCRYPTED: u16 = 0x4000;

/// The attribute types defined by NTFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    StandardInformation,
    AttributeList,
    FileName,
    ObjectId,
    SecurityDescriptor,
    VolumeName,
    VolumeInformation,
    Data,
    IndexRoot,
    IndexAllocation,
    Bitmap,
    ReparsePoint,
    EaInformation,
    Ea,
    PropertySet,
    LoggedUtilityStream,
    Unknown(u32),
}

impl AttributeType {
    pub fn from_code(code: u32) -> Self {
        match code {
            0x10 => AttributeType::StandardInformation,
            0x20 => AttributeType::AttributeList,
            0x30 => AttributeType::FileName,
            0x40 => AttributeType::ObjectId,
            0x50 => AttributeType::SecurityDescriptor,
            0x60 => AttributeType::VolumeName,
            0x70 => AttributeType::VolumeInformation,
            0x80 => AttributeType::Data,
            0x90 => AttributeType::IndexRoot,
            0xA0 => AttributeType::IndexAllocation,
            0xB0 => AttributeType::Bitmap,
            0xC0 => AttributeType::ReparsePoint,
            0xD0 => AttributeType::EaInformation,
            0xE0 => AttributeType::Ea,
            0xF0 => AttributeType::PropertySet,
            0x100 => AttributeType::LoggedUtilityStream,
            other => AttributeType::Unknown(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            AttributeType::StandardInformation => 0x10,
            AttributeType::AttributeList => 0x20,
            AttributeType::FileName => 0x30,
            AttributeType::ObjectId => 0x40,
            AttributeType::SecurityDescriptor => 0x50,
            AttributeType::VolumeName => 0x60,
            AttributeType::VolumeInformation => 0x70,
            AttributeType::Data => 0x80,
            AttributeType::IndexRoot => 0x90,
            AttributeType::IndexAllocation => 0xA0,
            AttributeType::Bitmap => 0xB0,
            AttributeType::ReparsePoint => 0xC0,
            AttributeType::EaInformation => 0xD0,
            AttributeType::Ea => 0xE0,
            AttributeType::PropertySet => 0xF0,
            AttributeType::LoggedUtilityStream => 0x100,
            AttributeType::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeType::StandardInformation => "$STANDARD_INFORMATION",
            AttributeType::AttributeList => "$ATTRIBUTE_LIST",
            AttributeType::FileName => "$FILE_NAME",
            AttributeType::ObjectId => "$OBJECT_ID",
            AttributeType::SecurityDescriptor => "$SECURITY_DESCRIPTOR",
            AttributeType::VolumeName => "$VOLUME_NAME",
            AttributeType::VolumeInformation => "$VOLUME_INFORMATION",
            AttributeType::Data => "$DATA",
            AttributeType::IndexRoot => "$INDEX_ROOT",
            AttributeType::IndexAllocation => "$INDEX_ALLOCATION",
            AttributeType::Bitmap => "$BITMAP",
            AttributeType::ReparsePoint => "$REPARSE_POINT",
            AttributeType::EaInformation => "$EA_INFORMATION",
            AttributeType::Ea => "$EA",
            AttributeType::PropertySet => "$PROPERTY_SET",
            AttributeType::LoggedUtilityStream => "$LOGGED_UTILITY_STREAM",
            AttributeType::Unknown(code) => return write!(f, "UNKNOWN_{code:#x}"),
        };
        f.write_str(name)
    }
}

/// A contiguous extent of a non-resident attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRun {
    /// First logical cluster of the run, `None` for a sparse run.
    pub lcn: Option<u64>,
    /// Run length in clusters.
    pub length: u64,
}

/// Decodes a data run list.
///
/// Each run starts with a header byte whose low nibble is the size of the
/// length field and high nibble the size of the signed offset field, the
/// offset being relative to the previous run. Decoding stops at the 0x00
/// terminator or at the first run that does not fit.
pub fn decode_data_runs(data: &[u8]) -> Vec<DataRun> {
    let mut runs = Vec::new();
    let mut pos = 0;
    let mut prev_lcn: i64 = 0;

    while let Some(header) = data.get(pos).copied() {
        if header == 0 {
            break;
        }
        pos += 1;

        let length_size = (header & 0x0F) as usize;
        let offset_size = (header >> 4) as usize;

        if length_size == 0 || length_size > 8 || offset_size > 8 {
            break;
        }
        if pos + length_size + offset_size > data.len() {
            break;
        }

        let mut length: u64 = 0;
        for i in 0..length_size {
            length |= (data[pos + i] as u64) << (i * 8);
        }
        pos += length_size;

        if offset_size == 0 {
            runs.push(DataRun { lcn: None, length });
            continue;
        }

        let mut offset: i64 = 0;
        for i in 0..offset_size {
            offset |= (data[pos + i] as i64) << (i * 8);
        }
        // Sign-extend
        if offset_size < 8 && (data[pos + offset_size - 1] & 0x80) != 0 {
            offset |= -1i64 << (offset_size * 8);
        }
        pos += offset_size;

        prev_lcn = match prev_lcn.checked_add(offset) {
            Some(lcn) if lcn >= 0 => lcn,
            _ => break,
        };
        runs.push(DataRun {
            lcn: Some(prev_lcn as u64),
            length,
        });
    }

    runs
}

/// Content of a `$DATA` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataBody {
    /// Bytes stored inline in the record.
    Resident(Vec<u8>),
    /// Bytes stored in clusters described by data runs.
    NonResident {
        real_size: u64,
        allocated_size: u64,
        runs: Vec<DataRun>,
        /// Compressed or encrypted streams cannot be read as plain runs.
        compressed: bool,
    },
}

impl DataBody {
    /// Logical size of the stream in bytes.
    pub fn size(&self) -> u64 {
        match self {
            DataBody::Resident(bytes) => bytes.len() as u64,
            DataBody::NonResident { real_size, .. } => *real_size,
        }
    }
}

/// Decoded `$FILE_NAME` content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileName {
    /// Record number of the containing directory.
    pub parent_ref: u64,
    pub parent_seq: u16,
    pub flags: u64,
    pub namespace: u8,
    pub name: String,
}

impl FileName {
    pub fn is_directory(&self) -> bool {
        self.flags & FILE_NAME_DIRECTORY != 0
    }
}

/// An attribute with the content this engine interprets.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    StandardInformation {
        created: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
        accessed: Option<DateTime<Utc>>,
    },
    FileName(FileName),
    Data {
        /// Empty for the unnamed (default) stream.
        stream: String,
        body: DataBody,
    },
    /// Any other type, recorded as a tag only.
    Other(AttributeType),
}

/// One attribute as laid out in a record, not yet interpreted.
#[derive(Debug)]
pub struct RawAttribute<'a> {
    pub kind: AttributeType,
    /// The whole attribute, header included.
    bytes: &'a [u8],
}

impl<'a> RawAttribute<'a> {
    /// Borrows the attribute starting at `offset`.
    ///
    /// Returns `None` at the end of the list: a terminator, a zero length, a
    /// header that does not fit or a length running past the record. The
    /// caller tells these apart with [`RawAttribute::is_terminator`].
    pub fn at(record: &'a [u8], offset: usize) -> Option<Self> {
        let code = u32_at(record, offset)?;
        if code == ATTR_END {
            return None;
        }
        let len = u32_at(record, offset + 4)? as usize;
        if len < COMMON_HEADER_LEN {
            return None;
        }
        let bytes = record.get(offset..offset.checked_add(len)?)?;
        Some(Self {
            kind: AttributeType::from_code(code),
            bytes,
        })
    }

    /// Whether the list legitimately ends at `offset`.
    pub fn is_terminator(record: &[u8], offset: usize) -> bool {
        matches!(u32_at(record, offset), Some(ATTR_END))
            || matches!(u32_at(record, offset + 4), Some(0))
    }

    /// Declared length of the attribute, header included.
    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_non_resident(&self) -> bool {
        u8_at(self.bytes, 8).is_some_and(|b| b != 0)
    }

    /// The attribute's stream name, empty when unnamed.
    pub fn name(&self) -> String {
        let len = u8_at(self.bytes, 9).unwrap_or(0) as usize;
        if len == 0 {
            return String::new();
        }
        let offset = u16_at(self.bytes, 10).unwrap_or(0) as usize;
        self.bytes
            .get(offset..offset + len * 2)
            .map(utf16le_string)
            .unwrap_or_default()
    }

    /// Resident content: length at +16, offset at +20, both bounds checked.
    fn resident_content(&self) -> Option<&'a [u8]> {
        if self.bytes.len() < RESIDENT_HEADER_LEN {
            return None;
        }
        let len = u32_at(self.bytes, 16)? as usize;
        let offset = u16_at(self.bytes, 20)? as usize;
        self.bytes.get(offset..offset.checked_add(len)?)
    }

    fn non_resident_body(&self) -> Option<DataBody> {
        if self.bytes.len() < NON_RESIDENT_HEADER_LEN {
            return None;
        }
        let runs_offset = u16_at(self.bytes, 0x20)? as usize;
        let flags = u16_at(self.bytes, 0x0C)?;
        let compression_unit = u16_at(self.bytes, 0x22)?;
        let runs = self
            .bytes
            .get(runs_offset..)
            .map(decode_data_runs)
            .unwrap_or_default();

        Some(DataBody::NonResident {
            real_size: u64_at(self.bytes, 0x30)?,
            allocated_size: u64_at(self.bytes, 0x28)?,
            runs,
            compressed: flags & (FLAG_COMPRESSED | FLAG_ENCRYPTED) != 0 || compression_unit != 0,
        })
    }

    /// Interprets the attribute.
    ///
    /// Returns `None` when the content is too short for its type; the type
    /// is still worth tagging in that case.
    pub fn decode(&self) -> Option<Attribute> {
        match self.kind {
            AttributeType::StandardInformation => {
                let content = self.resident_content()?;
                if content.len() < 48 {
                    return None;
                }
                Some(Attribute::StandardInformation {
                    created: u64_at(content, 24).and_then(ntfs_time),
                    modified: u64_at(content, 32).and_then(ntfs_time),
                    accessed: u64_at(content, 40).and_then(ntfs_time),
                })
            }
            AttributeType::FileName => {
                let content = self.resident_content()?;
                if content.len() < 66 {
                    return None;
                }
                let reference = u64_at(content, 0)?;
                let name_len = content[64] as usize;
                let name = content.get(66..66 + name_len * 2)?;
                Some(Attribute::FileName(FileName {
                    parent_ref: reference & FILE_REFERENCE_MASK,
                    parent_seq: (reference >> 48) as u16,
                    flags: u64_at(content, 56)?,
                    namespace: content[65],
                    name: utf16le_string(name),
                }))
            }
            AttributeType::Data => {
                let body = if self.is_non_resident() {
                    self.non_resident_body()?
                } else {
                    DataBody::Resident(self.resident_content()?.to_vec())
                };
                Some(Attribute::Data {
                    stream: self.name(),
                    body,
                })
            }
            other => Some(Attribute::Other(other)),
        }
    }
}
