//! Decoding helpers shared by the FAT32 and NTFS engines.
//!
//! Every integer extractor is bounds checked and returns `None` when the buffer
//! is too short, so truncated structures never panic the parsers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::fmt::Write;

/// FAT attribute bit for read-only entries.
pub const ATTR_READ_ONLY: u8 = 0x01;
/// FAT attribute bit for hidden entries.
pub const ATTR_HIDDEN: u8 = 0x02;
/// FAT attribute bit for system entries.
pub const ATTR_SYSTEM: u8 = 0x04;
/// FAT attribute bit for the volume label entry.
pub const ATTR_VOLUME_ID: u8 = 0x08;
/// FAT attribute bit for directories.
pub const ATTR_DIRECTORY: u8 = 0x10;
/// FAT attribute bit for archive (regular file) entries.
pub const ATTR_ARCHIVE: u8 = 0x20;
/// Attribute value marking a long file name fragment.
pub const ATTR_LONG_NAME: u8 = 0x0F;

/// Number of 100ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_DIFF: i64 = 116_444_736_000_000_000;

/// Extracts a 8-bit unsigned integer from a buffer at a given offset.
pub fn u8_at(buffer: &[u8], offset: usize) -> Option<u8> {
    buffer.get(offset).copied()
}

/// Extracts a little-endian 16-bit unsigned integer from a buffer at a given offset.
pub fn u16_at(buffer: &[u8], offset: usize) -> Option<u16> {
    let bytes = buffer.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes(bytes.try_into().ok()?))
}

/// Extracts a little-endian 32-bit unsigned integer from a buffer at a given offset.
pub fn u32_at(buffer: &[u8], offset: usize) -> Option<u32> {
    let bytes = buffer.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// Extracts a little-endian 64-bit unsigned integer from a buffer at a given offset.
pub fn u64_at(buffer: &[u8], offset: usize) -> Option<u64> {
    let bytes = buffer.get(offset..offset.checked_add(8)?)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// Decodes little-endian UTF-16 bytes, stopping at the first NUL code unit.
///
/// Invalid surrogates are replaced rather than rejected: a damaged name is
/// still worth showing to an examiner.
pub fn utf16le_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

/// Describes a FAT attribute byte with the letters `D`, `A`, `R`, `H` and `S`.
///
/// # Examples
/// ```
/// use fs_forensics::utils::describe_attributes;
/// assert_eq!(describe_attributes(0x10), "D");
/// assert_eq!(describe_attributes(0x23), "ARH");
/// ```
pub fn describe_attributes(attr: u8) -> String {
    const LETTERS: [(u8, char); 5] = [
        (ATTR_DIRECTORY, 'D'),
        (ATTR_ARCHIVE, 'A'),
        (ATTR_READ_ONLY, 'R'),
        (ATTR_HIDDEN, 'H'),
        (ATTR_SYSTEM, 'S'),
    ];

    LETTERS
        .iter()
        .filter(|(bit, _)| attr & bit != 0)
        .map(|(_, letter)| *letter)
        .collect()
}

/// Decodes a packed FAT date (`yyyyyyym mmmddddd`, years since 1980).
///
/// Returns `None` for fields that do not form a calendar date, such as the
/// all-zero date written by some tools.
pub fn fat_date(raw: u16) -> Option<NaiveDate> {
    let year = ((raw >> 9) & 0x7F) as i32 + 1980;
    let month = ((raw >> 5) & 0x0F) as u32;
    let day = (raw & 0x1F) as u32;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Decodes a packed FAT time (`hhhhhmmm mmmsssss`, seconds in 2s units).
pub fn fat_time(raw: u16) -> Option<NaiveTime> {
    let hour = ((raw >> 11) & 0x1F) as u32;
    let minute = ((raw >> 5) & 0x3F) as u32;
    let second = (raw & 0x1F) as u32 * 2;
    NaiveTime::from_hms_opt(hour, minute, second)
}

/// Combines a packed FAT date and time.
pub fn fat_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    Some(fat_date(date)?.and_time(fat_time(time)?))
}

/// Converts an NTFS timestamp (100ns intervals since 1601-01-01 UTC).
///
/// A zero timestamp means "never set" and yields `None`, as do values outside
/// the range chrono can represent.
pub fn ntfs_time(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let since_unix = i64::try_from(filetime).ok()? - FILETIME_UNIX_DIFF;
    let secs = since_unix.div_euclid(10_000_000);
    let nanos = (since_unix.rem_euclid(10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Formats a buffer as a classic 16-bytes-per-line hex dump.
///
/// Each line holds the offset, the hex bytes and their printable ASCII form.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();

    for (i, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|b| {
                if (32..=126).contains(b) {
                    *b as char
                } else {
                    '.'
                }
            })
            .collect();
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{:08X}: {:<48}  {}", i * 16, hex.join(" "), ascii);
    }

    out
}
