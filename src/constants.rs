/// The size of a sector in bytes used to address partitions on the host.
pub const SECTOR_SIZE: usize = 512;

/// The size of the boot sector structures decoded by both engines.
pub const BOOT_SECTOR_SIZE: usize = 512;

/// The size of a FAT directory entry in bytes.
pub const DIR_ENTRY_SIZE: usize = 32;

/// FAT32 entries only use the low 28 bits.
pub const FAT32_ENTRY_MASK: u32 = 0x0FFF_FFFF;

/// Any masked FAT32 entry at or above this value ends a chain.
pub const FAT32_EOC_MIN: u32 = 0x0FFF_FFF0;

/// Record number of the NTFS root directory.
pub const NTFS_ROOT_RECORD: u64 = 5;
