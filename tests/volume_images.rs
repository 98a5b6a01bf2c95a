// End-to-end browsing of synthetic FAT32 and NTFS images written to disk.

use fs_forensics::fat::dir_entry::lfn_checksum;
use fs_forensics::ntfs::NtfsError;
use fs_forensics::volume::FilesystemKind;
use fs_forensics::{Explorer, FileContent, FsEntry, NameMatch, Volume, VolumeError};
use std::io::Write;
use tempfile::NamedTempFile;

const SECTOR: usize = 512;

fn write_image(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

// ---------------------------------------------------------------------------
// FAT32
// ---------------------------------------------------------------------------

const FAT_RESERVED: usize = 32;
const FAT_SECTORS: usize = 1;
const FAT_DATA: usize = FAT_RESERVED + 2 * FAT_SECTORS;
const FAT_CLUSTERS: usize = 64;

struct Fat32Image {
    bytes: Vec<u8>,
}

impl Fat32Image {
    fn new() -> Self {
        let total = FAT_DATA + FAT_CLUSTERS;
        let mut bytes = vec![0u8; total * SECTOR];
        bytes[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        bytes[3..11].copy_from_slice(b"MSWIN4.1");
        bytes[0x0B..0x0D].copy_from_slice(&(SECTOR as u16).to_le_bytes());
        bytes[0x0D] = 1;
        bytes[0x0E..0x10].copy_from_slice(&(FAT_RESERVED as u16).to_le_bytes());
        bytes[0x10] = 2;
        bytes[0x20..0x24].copy_from_slice(&(total as u32).to_le_bytes());
        bytes[0x24..0x28].copy_from_slice(&(FAT_SECTORS as u32).to_le_bytes());
        bytes[0x2C..0x30].copy_from_slice(&2u32.to_le_bytes());
        bytes[0x43..0x47].copy_from_slice(&0xCAFE_F00Du32.to_le_bytes());
        bytes[0x47..0x52].copy_from_slice(b"EVIDENCE   ");
        bytes[0x52..0x5A].copy_from_slice(b"FAT32   ");
        bytes[510] = 0x55;
        bytes[511] = 0xAA;

        let mut image = Self { bytes };
        image.set_fat(0, 0x0FFF_FFF8);
        image.set_fat(1, 0x0FFF_FFFF);
        image
    }

    fn set_fat(&mut self, cluster: u32, value: u32) {
        for copy in 0..2 {
            let off = (FAT_RESERVED + copy * FAT_SECTORS) * SECTOR + cluster as usize * 4;
            self.bytes[off..off + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    fn chain(&mut self, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(last) = clusters.last() {
            self.set_fat(*last, 0x0FFF_FFFF);
        }
    }

    fn write_cluster(&mut self, cluster: u32, data: &[u8]) {
        let off = (FAT_DATA + cluster as usize - 2) * SECTOR;
        self.bytes[off..off + data.len()].copy_from_slice(data);
    }
}

fn short_entry(name: &[u8; 11], attr: u8, cluster: u32, size: u32) -> Vec<u8> {
    let mut slot = vec![0u8; 32];
    slot[0..11].copy_from_slice(name);
    slot[11] = attr;
    slot[14..16].copy_from_slice(&0x6000u16.to_le_bytes());
    slot[16..18].copy_from_slice(&0x5821u16.to_le_bytes());
    slot[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
    slot[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
    slot[28..32].copy_from_slice(&size.to_le_bytes());
    slot
}

/// Long name slots for `long`, in on-disk order (last fragment first).
fn lfn_entries(long: &str, short: &[u8; 11]) -> Vec<u8> {
    let mut units: Vec<u16> = long.encode_utf16().collect();
    if units.len() % 13 != 0 {
        units.push(0);
    }
    while units.len() % 13 != 0 {
        units.push(0xFFFF);
    }

    let checksum = lfn_checksum(short);
    let count = units.len() / 13;
    let mut out = vec![];
    for seq in (1..=count).rev() {
        let part = &units[(seq - 1) * 13..seq * 13];
        let mut slot = vec![0u8; 32];
        slot[0] = seq as u8 | if seq == count { 0x40 } else { 0 };
        slot[11] = 0x0F;
        slot[13] = checksum;
        let offsets = (1..11).step_by(2).chain((14..26).step_by(2)).chain((28..32).step_by(2));
        for (unit, off) in part.iter().zip(offsets) {
            slot[off..off + 2].copy_from_slice(&unit.to_le_bytes());
        }
        out.extend(slot);
    }
    out
}

/// Root: "Evidence Notes.txt" (clusters 4 -> 6, 600 bytes) and "photos/" (3),
/// which holds a read-only "cat.jpg" (7).
fn fat32_image() -> Vec<u8> {
    let mut image = Fat32Image::new();
    image.chain(&[2]);
    image.chain(&[3]);
    image.chain(&[4, 6]);
    image.chain(&[7]);

    let mut root = lfn_entries("Evidence Notes.txt", b"EVIDEN~1TXT");
    root.extend(short_entry(b"EVIDEN~1TXT", 0x20, 4, 600));
    root.extend(short_entry(b"PHOTOS     ", 0x10, 3, 0));
    image.write_cluster(2, &root);

    let mut photos = short_entry(b".          ", 0x10, 3, 0);
    photos.extend(short_entry(b"..         ", 0x10, 0, 0));
    photos.extend(short_entry(b"CAT     JPG", 0x21, 7, 10));
    image.write_cluster(3, &photos);

    image.write_cluster(4, &[b'n'; SECTOR]);
    image.write_cluster(5, &[b'x'; SECTOR]);
    image.write_cluster(6, &[b'e'; SECTOR]);
    image.write_cluster(7, b"\xFF\xD8\xFF\xE0 jpeg");
    image.bytes
}

#[test]
fn fat32_image_behind_a_partition_offset() {
    let offset_sectors = 63;
    let mut bytes = vec![0u8; offset_sectors * SECTOR];
    bytes.extend(fat32_image());
    let file = write_image(&bytes);

    let mut volume = Volume::open(file.path(), offset_sectors as u64).unwrap();
    assert_eq!(volume.kind(), FilesystemKind::Fat32);
    volume.prepare().unwrap();

    let root = volume.root();
    let names: Vec<String> = volume
        .list_directory(&root)
        .unwrap()
        .iter()
        .map(|e| e.name().to_string())
        .collect();
    assert_eq!(names, vec!["Evidence Notes.txt", "photos"]);

    let notes = volume.resolve_path("Evidence Notes.txt").unwrap().unwrap();
    assert_eq!(notes.size(), 600);
    match volume.read_file_content(&notes).unwrap() {
        FileContent::Data(data) => {
            assert_eq!(data.len(), 600);
            assert!(data[..SECTOR].iter().all(|b| *b == b'n'));
            assert!(data[SECTOR..].iter().all(|b| *b == b'e'));
        }
        other => panic!("unexpected {other:?}"),
    }

    let cat = volume.resolve_path("\\photos\\cat.jpg").unwrap().unwrap();
    assert!(matches!(
        volume.read_file_content(&cat).unwrap(),
        FileContent::Unsupported(_)
    ));

    let paths: Vec<String> = volume
        .build_tree(root)
        .map(|node| node.unwrap().path)
        .collect();
    assert_eq!(
        paths,
        vec!["/", "/Evidence Notes.txt", "/photos", "/photos/cat.jpg"]
    );
}

#[test]
fn fat32_lookup_is_exact_unless_asked_otherwise() {
    let file = write_image(&fat32_image());
    let mut volume = Volume::open(file.path(), 0).unwrap();

    assert!(volume.resolve_path("PHOTOS/CAT.JPG").unwrap().is_none());
    volume.set_lookup(NameMatch::IgnoreAsciiCase);
    assert!(volume.resolve_path("PHOTOS/CAT.JPG").unwrap().is_some());
}

// ---------------------------------------------------------------------------
// NTFS
// ---------------------------------------------------------------------------

const RECORD: usize = 1024;
const MFT_CLUSTER: usize = 32;
const DATA_CLUSTER: usize = 80;

fn ntfs_boot_sector() -> Vec<u8> {
    let mut boot = vec![0u8; SECTOR];
    boot[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
    boot[3..11].copy_from_slice(b"NTFS    ");
    boot[0x0B..0x0D].copy_from_slice(&(SECTOR as u16).to_le_bytes());
    boot[0x0D] = 1;
    boot[0x28..0x30].copy_from_slice(&128u64.to_le_bytes());
    boot[0x30..0x38].copy_from_slice(&(MFT_CLUSTER as u64).to_le_bytes());
    boot[0x38..0x40].copy_from_slice(&2u64.to_le_bytes());
    boot[0x40] = 0xF6;
    boot[510] = 0x55;
    boot[511] = 0xAA;
    boot
}

fn resident_attr(code: u32, content: &[u8]) -> Vec<u8> {
    let len = (24 + content.len()).div_ceil(8) * 8;
    let mut attr = vec![0u8; len];
    attr[0..4].copy_from_slice(&code.to_le_bytes());
    attr[4..8].copy_from_slice(&(len as u32).to_le_bytes());
    attr[16..20].copy_from_slice(&(content.len() as u32).to_le_bytes());
    attr[20..22].copy_from_slice(&24u16.to_le_bytes());
    attr[24..24 + content.len()].copy_from_slice(content);
    attr
}

fn file_name_attr(parent: u64, name: &str, dir: bool) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut content = vec![0u8; 66 + units.len() * 2];
    content[0..8].copy_from_slice(&(parent | (3u64 << 48)).to_le_bytes());
    let flags: u64 = if dir { 0x1000_0000 } else { 0x20 };
    content[56..64].copy_from_slice(&flags.to_le_bytes());
    content[64] = units.len() as u8;
    for (i, unit) in units.iter().enumerate() {
        content[66 + i * 2..68 + i * 2].copy_from_slice(&unit.to_le_bytes());
    }
    resident_attr(0x30, &content)
}

fn non_resident_data_attr(real_size: u64, lcn: u8, clusters: u8) -> Vec<u8> {
    let mut attr = vec![0u8; 0x48];
    attr[0..4].copy_from_slice(&0x80u32.to_le_bytes());
    attr[4..8].copy_from_slice(&0x48u32.to_le_bytes());
    attr[8] = 1;
    attr[0x20..0x22].copy_from_slice(&0x40u16.to_le_bytes());
    attr[0x28..0x30].copy_from_slice(&(clusters as u64 * SECTOR as u64).to_le_bytes());
    attr[0x30..0x38].copy_from_slice(&real_size.to_le_bytes());
    attr[0x38..0x40].copy_from_slice(&real_size.to_le_bytes());
    attr[0x40..0x43].copy_from_slice(&[0x11, clusters, lcn]);
    attr
}

/// A 1024-byte record protected by a two-stride update sequence array.
fn mft_record(flags: u16, attrs: &[Vec<u8>]) -> Vec<u8> {
    let mut rec = vec![0u8; RECORD];
    rec[0..4].copy_from_slice(b"FILE");
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

    rec[48..50].copy_from_slice(&0x0007u16.to_le_bytes());
    for stride in 1..3 {
        let tail = stride * SECTOR - 2;
        let saved = 48 + stride * 2;
        rec[saved] = rec[tail];
        rec[saved + 1] = rec[tail + 1];
        rec[tail..tail + 2].copy_from_slice(&0x0007u16.to_le_bytes());
    }
    rec
}

/// Root (5), "Users/" (6), "Users/report.txt" (7, resident) and
/// "disk.log" (8, non-resident, 2 clusters at 80). The MFT sits at cluster
/// 32, so the scan estimates 16 record slots.
fn ntfs_image() -> Vec<u8> {
    let mut bytes = vec![0u8; (DATA_CLUSTER + 2) * SECTOR];
    bytes[..SECTOR].copy_from_slice(&ntfs_boot_sector());

    let records = [
        (5, mft_record(0x03, &[file_name_attr(5, ".", true)])),
        (6, mft_record(0x03, &[file_name_attr(5, "Users", true)])),
        (
            7,
            mft_record(
                0x01,
                &[file_name_attr(6, "report.txt", false), resident_attr(0x80, b"case 2024-117")],
            ),
        ),
        (
            8,
            mft_record(
                0x01,
                &[file_name_attr(5, "disk.log", false), non_resident_data_attr(900, DATA_CLUSTER as u8, 2)],
            ),
        ),
    ];
    for (number, record) in records {
        let off = MFT_CLUSTER * SECTOR + number * RECORD;
        bytes[off..off + RECORD].copy_from_slice(&record);
    }

    let data = DATA_CLUSTER * SECTOR;
    bytes[data..data + 2 * SECTOR].fill(b'L');
    bytes
}

#[test]
fn ntfs_image_needs_a_scan_before_browsing() {
    let file = write_image(&ntfs_image());
    let mut volume = Volume::open(file.path(), 0).unwrap();
    assert_eq!(volume.kind(), FilesystemKind::Ntfs);

    assert!(matches!(
        volume.resolve_path("Users"),
        Err(VolumeError::Ntfs(NtfsError::TreeNotResolved))
    ));

    volume.prepare().unwrap();
    let report = volume.resolve_path("Users/report.txt").unwrap().unwrap();
    assert_eq!(report.size(), 13);
    assert_eq!(
        volume.read_file_content(&report).unwrap(),
        FileContent::Data(b"case 2024-117".to_vec())
    );

    let log = volume.resolve_path("/disk.log").unwrap().unwrap();
    match volume.read_file_content(&log).unwrap() {
        FileContent::Data(data) => {
            assert_eq!(data.len(), 900);
            assert!(data.iter().all(|b| *b == b'L'));
        }
        other => panic!("unexpected {other:?}"),
    }

    let root = volume.root();
    let paths: Vec<String> = volume
        .build_tree(root)
        .map(|node| node.unwrap().path)
        .collect();
    assert_eq!(paths, vec!["/", "/Users", "/Users/report.txt", "/disk.log"]);
}

#[test]
fn entries_do_not_cross_volumes() {
    let fat_file = write_image(&fat32_image());
    let ntfs_file = write_image(&ntfs_image());
    let mut fat = Volume::open(fat_file.path(), 0).unwrap();
    let mut ntfs = Volume::open(ntfs_file.path(), 0).unwrap();
    ntfs.prepare().unwrap();

    let fat_root = fat.root();
    assert!(matches!(
        ntfs.list_directory(&fat_root),
        Err(VolumeError::ForeignEntry)
    ));
}

#[test]
fn unrecognised_images_are_rejected() {
    let file = write_image(&vec![0u8; 4 * SECTOR]);
    assert!(matches!(
        Volume::open(file.path(), 0),
        Err(VolumeError::UnknownFilesystem(_))
    ));
}
