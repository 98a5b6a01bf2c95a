//! NTFS engine: boot sector, MFT records, attributes and the file table.

pub mod attribute;
pub mod boot_sector;
pub mod ntfs_error;
pub mod record;
pub mod volume;

pub use attribute::{AttributeType, DataBody, DataRun};
pub use boot_sector::BootSector;
pub use ntfs_error::NtfsError;
pub use record::{MftRecord, NtfsFileEntry};
pub use volume::{CancelToken, NtfsOptions, NtfsVolume, ScanOptions, ScanReport};
