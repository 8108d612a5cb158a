//! Blank guest disk images.

use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};

/// Default guest disk size.
pub const DEFAULT_DISK_SIZE_GIB: u64 = 10;

const GIB: u64 = 1024 * 1024 * 1024;

/// Largest size whose byte length still fits in an `i64` file offset.
pub const MAX_DISK_SIZE_GIB: u64 = i64::MAX as u64 / GIB;

/// Partition entry 1 (from its CHS start byte) describing one Linux partition.
/// Some installers refuse a disk without any partition table.
const PARTITION_ENTRY: [u8; 14] = [
    0x01, 0x01, 0x00, 0x82, 0xfe, 0x3f, 0x7c, 0x3f, 0x00, 0x00, 0x00, 0xfe, 0xa3, 0x1e,
];
const PARTITION_ENTRY_OFFSET: u64 = 0x1bf;
const MBR_SIGNATURE_OFFSET: u64 = 0x1fe;

fn create_sparse(path: &Path, size_gib: u64) -> Result<File> {
    if size_gib == 0 {
        return Err(Error::Configuration("disk size must be positive".into()));
    }
    let len = size_gib
        .checked_mul(GIB)
        .filter(|len| *len <= i64::MAX as u64)
        .ok_or_else(|| Error::Configuration(format!("disk size of {size_gib} GiB is too large")))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    file.set_len(len)?;
    Ok(file)
}

/// Create a sparse, all-zero raw image of `size_gib` GiB, replacing any
/// existing file.
pub fn create_disk_image(path: &Path, size_gib: u64) -> Result<()> {
    info!(path = %path.display(), size_gib, "generating blank disk image");
    create_sparse(path, size_gib)?;
    Ok(())
}

/// Like [`create_disk_image`], with an MBR holding a single Linux partition.
pub fn create_partitioned_disk_image(path: &Path, size_gib: u64) -> Result<()> {
    info!(path = %path.display(), size_gib, "generating disk image with fake partition");
    let mut file = create_sparse(path, size_gib)?;
    file.seek(SeekFrom::Start(PARTITION_ENTRY_OFFSET))?;
    file.write_all(&PARTITION_ENTRY)?;
    file.seek(SeekFrom::Start(MBR_SIGNATURE_OFFSET))?;
    file.write_all(&[0x55, 0xaa])?;
    file.sync_all()?;
    Ok(())
}
